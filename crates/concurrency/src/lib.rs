//! Concurrency layer for sift
//!
//! This crate implements the primitives shared across partitions:
//! - StripedLocks: bounded mutex array keyed by hash
//! - AdmissionSemaphore: FIFO counting semaphore, full-pool acquisition drains
//! - MergeChits / OrderedMergeChits: merge credit scheduler with
//!   insertion-ordered overage fairness
//! - WorkerPool / Executor / fan_out: merge sub-task execution

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chits;
pub mod pool;
pub mod semaphore;
pub mod striping;

pub use chits::{MergeChits, OrderedMergeChits};
pub use pool::{fan_out, Executor, InlineExecutor, Job, NamedTask, WorkerPool};
pub use semaphore::AdmissionSemaphore;
pub use striping::StripedLocks;
