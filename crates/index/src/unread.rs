//! Unread tracking: ids in each stream not yet read

use std::sync::Arc;

use sift_core::{SiftResult, StreamId};
use sift_storage::{debug_string, to_bit, BitmapAndLastId, Bitmaps, ValueIndex, VersionProvider};
use tracing::{enabled, trace, Level};

use crate::delta::DeltaPostings;
use crate::mergeable::Mergeable;

/// Per-stream unread postings
pub struct DeltaUnreadTrackingIndex<B: Bitmaps> {
    postings: DeltaPostings<B>,
}

impl<B: Bitmaps> DeltaUnreadTrackingIndex<B> {
    /// Create an unread index over `base`
    pub fn new(
        bitmaps: Arc<B>,
        base: Arc<dyn ValueIndex>,
        versions: Arc<VersionProvider>,
        stripes: usize,
    ) -> Self {
        Self {
            postings: DeltaPostings::new("unread", bitmaps, base, versions, stripes),
        }
    }

    /// Mark ids unread
    pub fn append(&self, stream: &StreamId, ids: &[i32]) {
        let bits: Vec<u32> = ids.iter().map(|id| to_bit(*id)).collect();
        self.postings.set(stream.as_bytes(), &bits);
    }

    /// Unread ids of a stream
    pub fn get_unread(&self, stream: &StreamId) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        self.postings.view(stream.as_bytes())
    }

    /// Clear every id set in `read_mask`
    pub fn apply_read(&self, stream: &StreamId, read_mask: &B::Bitmap) {
        if enabled!(target: "sift::index", Level::TRACE) {
            trace!(
                target: "sift::index",
                stream = %String::from_utf8_lossy(stream.as_bytes()),
                "read mask:\n{}",
                debug_string(self.postings.bitmaps(), read_mask)
            );
        }
        let bits: Vec<u32> = self.postings.bitmaps().int_iter(read_mask).collect();
        if !bits.is_empty() {
            self.postings.remove(stream.as_bytes(), &bits);
        }
    }

    /// Set every id set in `unread_mask`
    pub fn apply_unread(&self, stream: &StreamId, unread_mask: &B::Bitmap) {
        let bits: Vec<u32> = self.postings.bitmaps().int_iter(unread_mask).collect();
        if !bits.is_empty() {
            self.postings.set(stream.as_bytes(), &bits);
        }
    }

    /// Clear every unread id up to and including `last_id`
    pub fn mark_all_read(&self, stream: &StreamId, last_id: i32) -> SiftResult<()> {
        let key = stream.as_bytes();
        let _stripe = self.postings.lock(key);
        if let Some(unread) = self.postings.view(key)? {
            let bits: Vec<u32> = self
                .postings
                .bitmaps()
                .int_iter(&unread.bitmap)
                .take_while(|id| (*id as i64) <= last_id as i64)
                .collect();
            if !bits.is_empty() {
                self.postings.remove_locked(key, &bits);
            }
        }
        Ok(())
    }

    /// Bytes held by unmerged deltas
    pub fn size_in_memory(&self) -> u64 {
        self.postings.size_in_memory()
    }
}

impl<B: Bitmaps> Mergeable for DeltaUnreadTrackingIndex<B> {
    fn name(&self) -> &str {
        self.postings.name()
    }

    fn merge(&self) -> SiftResult<()> {
        self.postings.merge_all().map(|_| ())
    }
}
