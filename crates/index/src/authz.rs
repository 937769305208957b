//! Authorization postings: which ids each authz token may see

use std::sync::Arc;

use sift_core::SiftResult;
use sift_storage::{debug_summary, to_bit, BitmapAndLastId, Bitmaps, ValueIndex, VersionProvider};
use tracing::{enabled, trace, Level};

use crate::delta::DeltaPostings;
use crate::mergeable::Mergeable;

/// Postings per authz token
pub struct DeltaAuthzIndex<B: Bitmaps> {
    postings: DeltaPostings<B>,
}

impl<B: Bitmaps> DeltaAuthzIndex<B> {
    /// Create an authz index over `base`
    pub fn new(
        bitmaps: Arc<B>,
        base: Arc<dyn ValueIndex>,
        versions: Arc<VersionProvider>,
        stripes: usize,
    ) -> Self {
        Self {
            postings: DeltaPostings::new("authz", bitmaps, base, versions, stripes),
        }
    }

    /// Grant `authz` visibility of `ids`
    pub fn append(&self, authz: &str, ids: &[i32]) {
        let bits: Vec<u32> = ids.iter().map(|id| to_bit(*id)).collect();
        self.postings.set(authz.as_bytes(), &bits);
    }

    /// Revoke `authz` visibility of `ids`
    pub fn remove(&self, authz: &str, ids: &[i32]) {
        let bits: Vec<u32> = ids.iter().map(|id| to_bit(*id)).collect();
        self.postings.remove(authz.as_bytes(), &bits);
    }

    /// Ids visible to one token
    pub fn get_authz(&self, authz: &str) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        self.postings.view(authz.as_bytes())
    }

    /// Ids visible to any of the tokens
    pub fn get_composite_authz(&self, authzs: &[String]) -> SiftResult<B::Bitmap> {
        let bitmaps = self.postings.bitmaps();
        let mut found = Vec::with_capacity(authzs.len());
        for authz in authzs {
            if let Some(postings) = self.get_authz(authz)? {
                found.push(postings.bitmap);
            }
        }
        let refs: Vec<&B::Bitmap> = found.iter().collect();
        if enabled!(target: "sift::index", Level::TRACE) {
            trace!(target: "sift::index", "{}", debug_summary(bitmaps, "composite authz", &refs));
        }
        Ok(bitmaps.or_many(&refs))
    }

    /// Bytes held by unmerged deltas
    pub fn size_in_memory(&self) -> u64 {
        self.postings.size_in_memory()
    }
}

impl<B: Bitmaps> Mergeable for DeltaAuthzIndex<B> {
    fn name(&self) -> &str {
        self.postings.name()
    }

    fn merge(&self) -> SiftResult<()> {
        self.postings.merge_all().map(|_| ())
    }
}
