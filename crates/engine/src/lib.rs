//! Partition write path for sift
//!
//! This crate ties the delta indexes to a partition lifecycle:
//! - PartitionContext: every delta index of one partition plus its locks
//! - Indexer: applies resolved activities to a context
//! - PartitionAccessor: admission, write lock, batching, merge fan-out,
//!   request and migration handles
//! - SiftConfig: `sift.toml` knobs for permits, chits and the merge pool
//!
//! The accessor is the only component that knows about:
//! - Activity id allocation through the time index
//! - When a merge is due (via the chit scheduler)
//! - Corruption stickiness

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accessor;
pub mod config;
pub mod context;
pub mod indexer;
pub mod stats;

pub use accessor::{Interrupt, MigrationHandle, PartitionAccessor, RequestHandle};
pub use config::{SiftConfig, CONFIG_FILE_NAME};
pub use context::{
    ContextAllocator, ContextBases, InMemoryContextAllocator, PartitionContext, MERGEABLE_COUNT,
};
pub use indexer::Indexer;
pub use stats::{IndexRepairs, IndexStrategy, PartitionStats, StatsSnapshot};
