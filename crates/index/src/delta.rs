//! Base + delta postings
//!
//! Every bitmap-valued index is a [`DeltaPostings`]: merged postings live
//! checksummed in a [`ValueIndex`], pending mutations live in memory as a
//! [`TermDelta`] per key. Reads see `(base - removes) | adds` without waiting
//! for a merge.
//!
//! # Design Notes
//!
//! - **Striping**: a key's delta is only mutated, and only folded, while its
//!   stripe is held. The stripe key is derived from the record key by a plain
//!   function so the field index can stripe on the term alone.
//! - **Stage all, write once**: `multi_merge` decodes and re-encodes every
//!   requested key before committing anything. Any failure leaves the base
//!   untouched.
//! - **Generations**: a delta is dropped after a merge only if nothing touched
//!   it in the meantime. A kept delta is still correct over the new base, so
//!   re-running a merge is always safe.

use std::sync::Arc;

use dashmap::DashMap;
use sift_concurrency::StripedLocks;
use sift_core::SiftResult;
use sift_storage::{
    decode_postings, encode_postings, peek_last_id, BitmapAndLastId, Bitmaps, CommitBatch,
    ValueIndex, VersionProvider,
};
use tracing::debug;

/// Maps a record key to the key its stripe lock is chosen by
pub type StripeKeyFn = fn(&[u8]) -> &[u8];

fn whole_key(key: &[u8]) -> &[u8] {
    key
}

/// Pending mutations for one key
#[derive(Debug, Clone)]
pub struct TermDelta<BM> {
    /// Ids set since the last merge
    pub adds: BM,
    /// Ids cleared since the last merge
    pub removes: BM,
    /// Largest id ever set through this delta, -1 if none
    pub last_id: i32,
    /// Bumped on every mutation
    pub generation: u64,
}

impl<BM: Clone> TermDelta<BM> {
    /// Empty delta
    pub fn new<B: Bitmaps<Bitmap = BM>>(bitmaps: &B) -> Self {
        Self {
            adds: bitmaps.create(),
            removes: bitmaps.create(),
            last_id: -1,
            generation: 0,
        }
    }

    /// Record ids as set
    pub fn record_set<B: Bitmaps<Bitmap = BM>>(&mut self, bitmaps: &B, ids: &[u32]) {
        bitmaps.set(&mut self.adds, ids);
        bitmaps.remove(&mut self.removes, ids);
        if let Some(max) = ids.iter().max() {
            self.last_id = self.last_id.max(*max as i32);
        }
        self.generation += 1;
    }

    /// Record ids as cleared
    pub fn record_remove<B: Bitmaps<Bitmap = BM>>(&mut self, bitmaps: &B, ids: &[u32]) {
        bitmaps.remove(&mut self.adds, ids);
        bitmaps.set(&mut self.removes, ids);
        self.generation += 1;
    }

    /// Overlay this delta onto a base posting list
    pub fn overlay<B: Bitmaps<Bitmap = BM>>(
        &self,
        bitmaps: &B,
        base: Option<BitmapAndLastId<BM>>,
    ) -> BitmapAndLastId<BM> {
        match base {
            Some(base) => {
                let kept = bitmaps.and_not(&base.bitmap, &self.removes);
                BitmapAndLastId::new(bitmaps.or(&kept, &self.adds), base.last_id.max(self.last_id))
            }
            None => BitmapAndLastId::new(self.adds.clone(), self.last_id),
        }
    }

    /// Bytes held by this delta
    pub fn size_in_bytes<B: Bitmaps<Bitmap = BM>>(&self, bitmaps: &B) -> u64 {
        bitmaps.size_in_bytes(&self.adds) + bitmaps.size_in_bytes(&self.removes)
    }
}

/// Bitmap-valued store with an in-memory delta overlay
pub struct DeltaPostings<B: Bitmaps> {
    name: String,
    bitmaps: Arc<B>,
    base: Arc<dyn ValueIndex>,
    versions: Arc<VersionProvider>,
    deltas: DashMap<Vec<u8>, TermDelta<B::Bitmap>>,
    stripes: StripedLocks,
    stripe_key: StripeKeyFn,
}

impl<B: Bitmaps> DeltaPostings<B> {
    /// Store striped on the whole record key
    pub fn new(
        name: impl Into<String>,
        bitmaps: Arc<B>,
        base: Arc<dyn ValueIndex>,
        versions: Arc<VersionProvider>,
        stripes: usize,
    ) -> Self {
        Self::with_stripe_key(name, bitmaps, base, versions, stripes, whole_key)
    }

    /// Store striped on part of the record key
    pub fn with_stripe_key(
        name: impl Into<String>,
        bitmaps: Arc<B>,
        base: Arc<dyn ValueIndex>,
        versions: Arc<VersionProvider>,
        stripes: usize,
        stripe_key: StripeKeyFn,
    ) -> Self {
        Self {
            name: name.into(),
            bitmaps,
            base,
            versions,
            deltas: DashMap::new(),
            stripes: StripedLocks::new(stripes),
            stripe_key,
        }
    }

    /// Store name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bitmap backend
    pub fn bitmaps(&self) -> &B {
        &self.bitmaps
    }

    /// Lock the stripe owning `key`
    pub fn lock(&self, key: &[u8]) -> parking_lot::MutexGuard<'_, ()> {
        self.stripes.lock((self.stripe_key)(key))
    }

    fn read_base(&self, key: &[u8]) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        match self.base.get(key)? {
            Some(record) => Ok(Some(decode_postings(&*self.bitmaps, &record)?)),
            None => Ok(None),
        }
    }

    /// Visible postings for a key, `None` if neither layer has it.
    ///
    /// Caller holds the stripe or accepts a racy read.
    pub fn view(&self, key: &[u8]) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        let base = self.read_base(key)?;
        match self.deltas.get(key) {
            Some(delta) => Ok(Some(delta.overlay(&*self.bitmaps, base))),
            None => Ok(base),
        }
    }

    /// Merged postings only, ignoring the delta
    pub fn base_view(&self, key: &[u8]) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        self.read_base(key)
    }

    /// Visible last id without decoding the base bitmap, -1 if absent
    pub fn last_id(&self, key: &[u8]) -> SiftResult<i32> {
        let base = self
            .base
            .get(key)?
            .and_then(|record| peek_last_id(&record))
            .unwrap_or(-1);
        let delta = self.deltas.get(key).map(|d| d.last_id).unwrap_or(-1);
        Ok(base.max(delta))
    }

    /// Set ids in the delta. Caller holds the stripe.
    pub fn set_locked(&self, key: &[u8], ids: &[u32]) {
        let bitmaps = &*self.bitmaps;
        self.deltas
            .entry(key.to_vec())
            .or_insert_with(|| TermDelta::new(bitmaps))
            .record_set(bitmaps, ids);
    }

    /// Clear ids in the delta. Caller holds the stripe.
    pub fn remove_locked(&self, key: &[u8], ids: &[u32]) {
        let bitmaps = &*self.bitmaps;
        self.deltas
            .entry(key.to_vec())
            .or_insert_with(|| TermDelta::new(bitmaps))
            .record_remove(bitmaps, ids);
    }

    /// Set ids under the key's stripe
    pub fn set(&self, key: &[u8], ids: &[u32]) {
        let _stripe = self.lock(key);
        self.set_locked(key, ids);
    }

    /// Clear ids under the key's stripe
    pub fn remove(&self, key: &[u8], ids: &[u32]) {
        let _stripe = self.lock(key);
        self.remove_locked(key, ids);
    }

    /// Keys that currently carry a delta
    pub fn delta_keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self.deltas.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Keys visible in either layer under `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> SiftResult<Vec<Vec<u8>>> {
        let mut keys: Vec<Vec<u8>> = self
            .base
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.extend(
            self.deltas
                .iter()
                .filter(|e| e.key().starts_with(prefix))
                .map(|e| e.key().clone()),
        );
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Fold caller-computed postings into the base under one version.
    ///
    /// `merger(i, base)` receives the decoded base for `keys[i]` and returns
    /// the postings to persist, or `None` to leave the key alone. It runs with
    /// the key's stripe held.
    pub fn multi_merge<F>(&self, keys: &[Vec<u8>], mut merger: F) -> SiftResult<usize>
    where
        F: FnMut(usize, Option<BitmapAndLastId<B::Bitmap>>) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>>,
    {
        let mut staged: CommitBatch = Vec::with_capacity(keys.len());
        let mut bytes_read = 0u64;
        for (i, key) in keys.iter().enumerate() {
            let _stripe = self.lock(key);
            let base = match self.base.get(key)? {
                Some(record) => {
                    bytes_read += record.len() as u64;
                    Some(decode_postings(&*self.bitmaps, &record)?)
                }
                None => None,
            };
            if let Some(merged) = merger(i, base)? {
                staged.push((key.clone(), encode_postings(&*self.bitmaps, &merged)?));
            }
        }

        let written = staged.len();
        if written == 0 {
            return Ok(0);
        }
        let bytes_written: u64 = staged.iter().map(|(_, v)| v.len() as u64).sum();
        let version = self.versions.next_version();
        self.base.commit(staged, version)?;
        debug!(
            target: "sift::index",
            index = %self.name,
            version,
            written,
            bytes_read,
            bytes_written,
            "multi merge committed"
        );
        Ok(written)
    }

    /// Fold the deltas of `keys` into the base, then drop unchanged deltas.
    pub fn merge_keys(&self, keys: &[Vec<u8>]) -> SiftResult<usize> {
        let mut generations: Vec<Option<u64>> = vec![None; keys.len()];
        let bitmaps = &*self.bitmaps;
        let written = self.multi_merge(keys, |i, base| {
            Ok(self.deltas.get(&keys[i]).map(|delta| {
                generations[i] = Some(delta.generation);
                delta.overlay(bitmaps, base)
            }))
        })?;

        for (key, generation) in keys.iter().zip(generations) {
            if let Some(generation) = generation {
                let _stripe = self.lock(key);
                self.deltas.remove_if(key, |_, d| d.generation == generation);
            }
        }
        Ok(written)
    }

    /// Fold every pending delta
    pub fn merge_all(&self) -> SiftResult<usize> {
        self.merge_keys(&self.delta_keys())
    }

    /// Number of keys with pending deltas
    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// Bytes held by pending deltas
    pub fn size_in_memory(&self) -> u64 {
        self.deltas
            .iter()
            .map(|e| e.value().size_in_bytes(&*self.bitmaps) + e.key().len() as u64)
            .sum()
    }

    /// Bytes held by the base
    pub fn size_on_base(&self) -> u64 {
        self.base.size_in_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_storage::{seal, MemoryValueIndex, RoaringBitmaps};

    fn postings() -> (DeltaPostings<RoaringBitmaps>, Arc<MemoryValueIndex>) {
        let base = Arc::new(MemoryValueIndex::new("test"));
        let store = DeltaPostings::new(
            "test",
            Arc::new(RoaringBitmaps::new()),
            base.clone(),
            Arc::new(VersionProvider::new()),
            8,
        );
        (store, base)
    }

    fn ids(store: &DeltaPostings<RoaringBitmaps>, key: &[u8]) -> Vec<u32> {
        match store.view(key).unwrap() {
            Some(p) => p.bitmap.iter().collect(),
            None => vec![],
        }
    }

    #[test]
    fn test_view_sees_delta_before_merge() {
        let (store, base) = postings();
        store.set(b"k", &[5, 9]);
        assert_eq!(ids(&store, b"k"), vec![5, 9]);
        assert_eq!(store.last_id(b"k").unwrap(), 9);
        assert!(base.is_empty());
    }

    #[test]
    fn test_merge_is_transparent() {
        let (store, base) = postings();
        store.set(b"k", &[5, 9]);
        let before = ids(&store, b"k");
        assert_eq!(store.merge_all().unwrap(), 1);
        assert_eq!(ids(&store, b"k"), before);
        assert_eq!(store.delta_count(), 0);
        assert_eq!(base.len(), 1);
        assert_eq!(store.last_id(b"k").unwrap(), 9);
    }

    #[test]
    fn test_remove_masks_base() {
        let (store, _) = postings();
        store.set(b"k", &[1, 2, 3]);
        store.merge_all().unwrap();
        store.remove(b"k", &[2]);
        assert_eq!(ids(&store, b"k"), vec![1, 3]);
        // last id survives removal
        assert_eq!(store.last_id(b"k").unwrap(), 3);
        store.set(b"k", &[2]);
        assert_eq!(ids(&store, b"k"), vec![1, 2, 3]);
        store.remove(b"k", &[2]);
        store.merge_all().unwrap();
        assert_eq!(ids(&store, b"k"), vec![1, 3]);
    }

    #[test]
    fn test_merge_twice_is_idempotent() {
        let (store, base) = postings();
        store.set(b"a", &[1]);
        store.set(b"b", &[2]);
        store.merge_all().unwrap();
        let version = base.version();
        assert_eq!(store.merge_all().unwrap(), 0);
        assert_eq!(base.version(), version);
        assert_eq!(ids(&store, b"a"), vec![1]);
    }

    #[test]
    fn test_multi_merge_commits_once() {
        let (store, base) = postings();
        store.set(b"a", &[1]);
        store.set(b"b", &[2]);
        store.set(b"c", &[3]);
        store.merge_all().unwrap();
        assert_eq!(base.version(), 1);
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn test_failed_staging_writes_nothing() {
        let (store, base) = postings();
        base.commit(vec![(b"bad".to_vec(), seal(&[0xff; 3]))], 100).unwrap();
        store.set(b"a", &[1]);
        store.set(b"bad", &[2]);
        let err = store.merge_all().unwrap_err();
        assert!(err.is_corruption());
        assert!(base.get(b"a").unwrap().is_none());
        // the good delta is still pending
        assert_eq!(ids(&store, b"a"), vec![1]);
    }

    #[test]
    fn test_keys_with_prefix_spans_layers() {
        let (store, _) = postings();
        store.set(b"p1", &[1]);
        store.merge_all().unwrap();
        store.set(b"p2", &[2]);
        store.set(b"q", &[3]);
        assert_eq!(
            store.keys_with_prefix(b"p").unwrap(),
            vec![b"p1".to_vec(), b"p2".to_vec()]
        );
    }

    #[test]
    fn test_size_in_memory_drops_after_merge() {
        let (store, _) = postings();
        store.set(b"k", &[1, 2, 3]);
        assert!(store.size_in_memory() > 0);
        store.merge_all().unwrap();
        assert_eq!(store.size_in_memory(), 0);
    }
}
