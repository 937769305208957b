//! Activity payload store: id -> activity
//!
//! Payloads are MessagePack (rmp-serde) inside a checksummed record, keyed by
//! `id (u32 BE)`.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use dashmap::DashMap;
use sift_core::{Activity, SiftError, SiftResult};
use sift_storage::{seal, to_bit, unseal, CommitBatch, ValueIndex, VersionProvider};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::mergeable::Mergeable;

fn id_key(id: i32) -> [u8; 4] {
    let mut key = [0u8; 4];
    BigEndian::write_u32(&mut key, to_bit(id));
    key
}

/// Activity payloads by internal id
pub struct DeltaActivityIndex {
    base: Arc<dyn ValueIndex>,
    versions: Arc<VersionProvider>,
    delta: DashMap<i32, Activity>,
    last_id: AtomicI32,
}

impl DeltaActivityIndex {
    /// Create a payload store over `base`
    pub fn new(base: Arc<dyn ValueIndex>, versions: Arc<VersionProvider>) -> SiftResult<Self> {
        let last_id = match base.row_scan()?.last() {
            Some((key, _)) if key.len() == 4 => BigEndian::read_u32(key) as i32,
            Some(_) => return Err(SiftError::corruption("activity key is not 4 bytes")),
            None => -1,
        };
        Ok(Self {
            base,
            versions,
            delta: DashMap::new(),
            last_id: AtomicI32::new(last_id),
        })
    }

    /// Payload of an id
    pub fn get(&self, id: i32) -> SiftResult<Option<Activity>> {
        if id < 0 {
            return Ok(None);
        }
        if let Some(activity) = self.delta.get(&id) {
            return Ok(Some(activity.clone()));
        }
        match self.base.get(&id_key(id))? {
            Some(record) => {
                let payload = unseal(&record)?;
                let activity = rmp_serde::from_slice(payload)
                    .map_err(|e| SiftError::corruption(format!("activity {}: {}", id, e)))?;
                Ok(Some(activity))
            }
            None => Ok(None),
        }
    }

    /// Store payloads, replacing any existing ones
    pub fn set(&self, activities: Vec<(i32, Activity)>) {
        for (id, activity) in activities {
            self.last_id.fetch_max(id, Ordering::SeqCst);
            self.delta.insert(id, activity);
        }
    }

    /// Largest id with a payload, -1 if none
    pub fn last_id(&self) -> i32 {
        self.last_id.load(Ordering::SeqCst)
    }

    /// Payloads not yet merged
    pub fn delta_count(&self) -> usize {
        self.delta.len()
    }
}

impl Mergeable for DeltaActivityIndex {
    fn name(&self) -> &str {
        "activity"
    }

    fn merge(&self) -> SiftResult<()> {
        let mut pending: Vec<(i32, Activity)> = self
            .delta
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort_by_key(|(id, _)| *id);

        let mut batch: CommitBatch = Vec::with_capacity(pending.len());
        for (id, activity) in &pending {
            let payload = rmp_serde::to_vec(activity)
                .map_err(|e| SiftError::Serialization(e.to_string()))?;
            batch.push((id_key(*id).to_vec(), seal(&payload)));
        }
        self.base.commit(batch, self.versions.next_version())?;
        for (id, activity) in pending {
            self.delta.remove_if(&id, |_, current| *current == activity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::TenantId;
    use sift_storage::MemoryValueIndex;

    fn activity(time: i64) -> Activity {
        Activity::new(TenantId::new("t"), time, 1).with_field(0, &["x"])
    }

    #[test]
    fn test_set_get_merge() {
        let base = Arc::new(MemoryValueIndex::new("activity"));
        let versions = Arc::new(VersionProvider::new());
        let index = DeltaActivityIndex::new(base.clone(), versions.clone()).unwrap();
        assert_eq!(index.last_id(), -1);
        index.set(vec![(0, activity(10)), (2, activity(30))]);
        assert_eq!(index.last_id(), 2);
        assert_eq!(index.get(2).unwrap().unwrap().time, 30);
        index.merge().unwrap();
        assert_eq!(index.delta_count(), 0);
        assert_eq!(index.get(0).unwrap().unwrap(), activity(10));
        assert!(index.get(1).unwrap().is_none());
        assert!(index.get(-1).unwrap().is_none());

        let reopened = DeltaActivityIndex::new(base, versions).unwrap();
        assert_eq!(reopened.last_id(), 2);
    }

    #[test]
    fn test_corrupt_payload_is_reported() {
        let base = Arc::new(MemoryValueIndex::new("activity"));
        base.commit(vec![(id_key(0).to_vec(), seal(&[0xc1]))], 1).unwrap();
        let index = DeltaActivityIndex::new(base, Arc::new(VersionProvider::new())).unwrap();
        assert!(index.get(0).unwrap_err().is_corruption());
    }
}
