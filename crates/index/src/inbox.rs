//! Inbox index: ids delivered to each stream, plus the stream's last activity index
//!
//! Postings are keyed `P ++ stream`; last activity indexes are keyed
//! `L ++ stream` in the same base. Indexing into an inbox never moves its
//! last activity index; only `set_last_activity_index` does.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use dashmap::DashMap;
use sift_core::{SiftError, SiftResult, StreamId};
use sift_storage::{seal, to_bit, unseal, BitmapAndLastId, Bitmaps, ValueIndex, VersionProvider};

use crate::delta::DeltaPostings;
use crate::mergeable::Mergeable;

const POSTINGS_PREFIX: u8 = b'P';
const LAST_ACTIVITY_PREFIX: u8 = b'L';

fn prefixed(prefix: u8, stream: &StreamId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + stream.as_bytes().len());
    key.push(prefix);
    key.extend_from_slice(stream.as_bytes());
    key
}

/// Per-stream inbox postings
pub struct DeltaInboxIndex<B: Bitmaps> {
    postings: DeltaPostings<B>,
    base: Arc<dyn ValueIndex>,
    versions: Arc<VersionProvider>,
    last_activity: DashMap<StreamId, i32>,
}

impl<B: Bitmaps> DeltaInboxIndex<B> {
    /// Create an inbox index over `base`
    pub fn new(
        bitmaps: Arc<B>,
        base: Arc<dyn ValueIndex>,
        versions: Arc<VersionProvider>,
        stripes: usize,
    ) -> Self {
        Self {
            postings: DeltaPostings::new(
                "inbox",
                bitmaps,
                Arc::clone(&base),
                Arc::clone(&versions),
                stripes,
            ),
            base,
            versions,
            last_activity: DashMap::new(),
        }
    }

    /// Deliver ids to a stream
    pub fn append(&self, stream: &StreamId, ids: &[i32]) {
        let bits: Vec<u32> = ids.iter().map(|id| to_bit(*id)).collect();
        self.postings.set(&prefixed(POSTINGS_PREFIX, stream), &bits);
    }

    /// Ids delivered to a stream, `None` if it never received any
    pub fn get_inbox(&self, stream: &StreamId) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        self.postings.view(&prefixed(POSTINGS_PREFIX, stream))
    }

    /// Last activity index of a stream, -1 if never set
    pub fn get_last_activity_index(&self, stream: &StreamId) -> SiftResult<i32> {
        if let Some(index) = self.last_activity.get(stream) {
            return Ok(*index);
        }
        match self.base.get(&prefixed(LAST_ACTIVITY_PREFIX, stream))? {
            Some(record) => {
                let payload = unseal(&record)?;
                if payload.len() != 4 {
                    return Err(SiftError::corruption("last activity index is not 4 bytes"));
                }
                Ok(LittleEndian::read_i32(payload))
            }
            None => Ok(-1),
        }
    }

    /// Record a stream's last activity index
    pub fn set_last_activity_index(&self, stream: &StreamId, index: i32) {
        self.last_activity.insert(stream.clone(), index);
    }

    /// Bytes held by unmerged deltas
    pub fn size_in_memory(&self) -> u64 {
        self.postings.size_in_memory() + self.last_activity.len() as u64 * 4
    }
}

impl<B: Bitmaps> Mergeable for DeltaInboxIndex<B> {
    fn name(&self) -> &str {
        self.postings.name()
    }

    fn merge(&self) -> SiftResult<()> {
        self.postings.merge_all()?;

        let pending: Vec<(StreamId, i32)> = self
            .last_activity
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let batch = pending
            .iter()
            .map(|(stream, index)| {
                let mut payload = [0u8; 4];
                LittleEndian::write_i32(&mut payload, *index);
                (prefixed(LAST_ACTIVITY_PREFIX, stream), seal(&payload))
            })
            .collect();
        self.base.commit(batch, self.versions.next_version())?;
        for (stream, index) in pending {
            self.last_activity.remove_if(&stream, |_, v| *v == index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_storage::{MemoryValueIndex, RoaringBitmaps};

    fn inbox() -> DeltaInboxIndex<RoaringBitmaps> {
        DeltaInboxIndex::new(
            Arc::new(RoaringBitmaps::new()),
            Arc::new(MemoryValueIndex::new("inbox")),
            Arc::new(VersionProvider::new()),
            8,
        )
    }

    #[test]
    fn test_empty_inbox_without_creating() {
        let index = inbox();
        assert!(index.get_inbox(&StreamId::new("s")).unwrap().is_none());
    }

    #[test]
    fn test_indexed_ids_visible() {
        let index = inbox();
        let stream = StreamId::new("s");
        index.append(&stream, &[1, 4]);
        index.merge().unwrap();
        index.append(&stream, &[7]);
        let ids: Vec<u32> = index.get_inbox(&stream).unwrap().unwrap().bitmap.iter().collect();
        assert_eq!(ids, vec![1, 4, 7]);
    }

    #[test]
    fn test_last_activity_index_not_set_automatically() {
        let index = inbox();
        let stream = StreamId::new("s");
        assert_eq!(index.get_last_activity_index(&stream).unwrap(), -1);
        index.append(&stream, &[3]);
        assert_eq!(index.get_last_activity_index(&stream).unwrap(), -1);
        index.set_last_activity_index(&stream, 3);
        assert_eq!(index.get_last_activity_index(&stream).unwrap(), 3);
        index.merge().unwrap();
        assert_eq!(index.get_last_activity_index(&stream).unwrap(), 3);
        assert_eq!(
            index.get_last_activity_index(&StreamId::new("other")).unwrap(),
            -1
        );
    }
}
