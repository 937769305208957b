//! Sip index: the partition's WAL read position

use std::sync::Arc;

use parking_lot::Mutex;
use sift_core::{SiftError, SiftResult, Sip};
use sift_storage::{seal, unseal, ValueIndex, VersionProvider};

use crate::mergeable::Mergeable;

const SIP_KEY: &[u8] = b"sip";

/// Persisted sip cursor with an unmerged pending value
pub struct DeltaSipIndex {
    base: Arc<dyn ValueIndex>,
    versions: Arc<VersionProvider>,
    pending: Mutex<Option<Sip>>,
}

impl DeltaSipIndex {
    /// Create a sip index over `base`
    pub fn new(base: Arc<dyn ValueIndex>, versions: Arc<VersionProvider>) -> Self {
        Self {
            base,
            versions,
            pending: Mutex::new(None),
        }
    }

    fn read_base(&self) -> SiftResult<Option<Sip>> {
        match self.base.get(SIP_KEY)? {
            Some(record) => {
                let payload = unseal(&record)?;
                rmp_serde::from_slice(payload)
                    .map(Some)
                    .map_err(|e| SiftError::corruption(format!("sip: {}", e)))
            }
            None => Ok(None),
        }
    }

    /// Current sip, pending or merged
    pub fn get_sip(&self) -> SiftResult<Option<Sip>> {
        if let Some(sip) = *self.pending.lock() {
            return Ok(Some(sip));
        }
        self.read_base()
    }

    /// Advance the sip. Returns false if `sip` is not after the current one.
    pub fn set_sip(&self, sip: Sip) -> SiftResult<bool> {
        let mut pending = self.pending.lock();
        let current = match *pending {
            Some(current) => Some(current),
            None => self.read_base()?,
        };
        if current.map_or(true, |c| sip > c) {
            *pending = Some(sip);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl Mergeable for DeltaSipIndex {
    fn name(&self) -> &str {
        "sip"
    }

    fn merge(&self) -> SiftResult<()> {
        let mut pending = self.pending.lock();
        if let Some(sip) = *pending {
            let payload =
                rmp_serde::to_vec(&sip).map_err(|e| SiftError::Serialization(e.to_string()))?;
            self.base
                .commit(vec![(SIP_KEY.to_vec(), seal(&payload))], self.versions.next_version())?;
            *pending = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_storage::MemoryValueIndex;

    fn sip_index() -> DeltaSipIndex {
        DeltaSipIndex::new(
            Arc::new(MemoryValueIndex::new("sip")),
            Arc::new(VersionProvider::new()),
        )
    }

    #[test]
    fn test_store_and_get_unmerged() {
        let index = sip_index();
        assert_eq!(index.get_sip().unwrap(), None);
        assert!(index.set_sip(Sip::new(1, 2)).unwrap());
        assert!(index.set_sip(Sip::new(3, 4)).unwrap());
        assert_eq!(index.get_sip().unwrap(), Some(Sip::new(3, 4)));
    }

    #[test]
    fn test_store_and_get_merged() {
        let index = sip_index();
        index.set_sip(Sip::new(1, 2)).unwrap();
        index.merge().unwrap();
        index.set_sip(Sip::new(3, 4)).unwrap();
        index.merge().unwrap();
        assert_eq!(index.get_sip().unwrap(), Some(Sip::new(3, 4)));
    }

    #[test]
    fn test_sip_only_advances() {
        let index = sip_index();
        index.set_sip(Sip::new(5, 5)).unwrap();
        index.merge().unwrap();
        assert!(!index.set_sip(Sip::new(4, 9)).unwrap());
        assert!(!index.set_sip(Sip::new(5, 5)).unwrap());
        assert_eq!(index.get_sip().unwrap(), Some(Sip::new(5, 5)));
    }
}
