//! Sift - write-path indexing core for a partitioned activity index
//!
//! Activities arrive per partition as a WAL stream. Each partition keeps a
//! set of delta indexes in front of immutable bases; the merge credit
//! scheduler decides when a partition's deltas are folded into its bases.
//!
//! # Quick Start
//!
//! ```ignore
//! use sift::{
//!     ContextAllocator, InMemoryContextAllocator, IndexRepairs, IndexStrategy, Interrupt,
//!     PartitionAccessor, PartitionStats, SiftConfig,
//! };
//!
//! let config = SiftConfig::default();
//! let chits = config.build_chits("ingress");
//! let pool = config.build_merge_pool()?;
//! let context = InMemoryContextAllocator::new(config.term_lock_stripes)
//!     .allocate(bitmaps.clone(), &coord, schema)?;
//! let accessor = PartitionAccessor::new(
//!     bitmaps, coord, info, Some(context),
//!     Arc::new(IndexRepairs::new()), Arc::new(PartitionStats::new()),
//!     config.partition_permits,
//! );
//! accessor.index_internal(&mut batch, IndexStrategy::Ingress, false, &chits, &pool, &Interrupt::new())?;
//! ```
//!
//! # Architecture
//!
//! - `sift-core`: identities, activities, schema and the error taxonomy
//! - `sift-storage`: the bitmap engine and versioned base stores
//! - `sift-concurrency`: chits, admission semaphore, striped locks, merge pool
//! - `sift-index`: delta indexes over their bases
//! - `sift-engine`: partition context, indexer and accessor

pub use sift_concurrency::{
    AdmissionSemaphore, Executor, InlineExecutor, MergeChits, OrderedMergeChits, StripedLocks,
    WorkerPool,
};
pub use sift_core::*;
pub use sift_engine::*;
pub use sift_index::{
    DeltaActivityIndex, DeltaAuthzIndex, DeltaFieldIndex, DeltaInboxIndex, DeltaRemovalIndex,
    DeltaSipIndex, DeltaTimeIndex, DeltaUnreadTrackingIndex, FieldIndexProvider, InvertedIndex,
    Mergeable,
};
pub use sift_storage::{
    BitmapAndLastId, Bitmaps, MemoryValueIndex, RoaringBitmaps, TimeIndex, ValueIndex,
};
