//! Merge participation

use sift_core::SiftResult;

/// A delta index that can fold its pending mutations into its base.
///
/// `merge` must be idempotent: running it again after a partial or complete
/// merge leaves the visible state unchanged.
pub trait Mergeable: Send + Sync {
    /// Index name, used to label merge tasks and failures
    fn name(&self) -> &str;

    /// Fold pending mutations into the base
    fn merge(&self) -> SiftResult<()>;
}
