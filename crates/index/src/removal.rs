//! Removal index: one bitmap of tombstoned ids

use std::sync::Arc;

use sift_core::SiftResult;
use sift_storage::{to_bit, BitmapAndLastId, Bitmaps, ValueIndex, VersionProvider};

use crate::delta::DeltaPostings;
use crate::mergeable::Mergeable;

const REMOVAL_KEY: &[u8] = b"removal";

/// Tombstoned ids of a partition
pub struct DeltaRemovalIndex<B: Bitmaps> {
    postings: DeltaPostings<B>,
}

impl<B: Bitmaps> DeltaRemovalIndex<B> {
    /// Create a removal index over `base`
    pub fn new(bitmaps: Arc<B>, base: Arc<dyn ValueIndex>, versions: Arc<VersionProvider>) -> Self {
        Self {
            postings: DeltaPostings::new("removal", bitmaps, base, versions, 1),
        }
    }

    /// Tombstone ids
    pub fn set(&self, ids: &[i32]) {
        let bits: Vec<u32> = ids.iter().map(|id| to_bit(*id)).collect();
        self.postings.set(REMOVAL_KEY, &bits);
    }

    /// Lift tombstones
    pub fn remove(&self, ids: &[i32]) {
        let bits: Vec<u32> = ids.iter().map(|id| to_bit(*id)).collect();
        self.postings.remove(REMOVAL_KEY, &bits);
    }

    /// Every tombstoned id
    pub fn get_index(&self) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        self.postings.view(REMOVAL_KEY)
    }

    /// Whether `id` is tombstoned
    pub fn is_removed(&self, id: i32) -> SiftResult<bool> {
        Ok(match self.get_index()? {
            Some(removed) => self.postings.bitmaps().is_set(&removed.bitmap, to_bit(id)),
            None => false,
        })
    }

    /// Bytes held by unmerged deltas
    pub fn size_in_memory(&self) -> u64 {
        self.postings.size_in_memory()
    }
}

impl<B: Bitmaps> Mergeable for DeltaRemovalIndex<B> {
    fn name(&self) -> &str {
        self.postings.name()
    }

    fn merge(&self) -> SiftResult<()> {
        self.postings.merge_all().map(|_| ())
    }
}
