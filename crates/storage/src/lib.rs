//! Storage layer for sift
//!
//! This crate implements the pieces every index is built on:
//! - Bitmaps: compressed bitmap capability trait, generic over backend
//! - RoaringBitmaps: container-based backend over `roaring`
//! - postings: checksummed record framing for persisted postings
//! - ValueIndex: base store with atomic batch commit, MemoryValueIndex
//! - VersionProvider: monotonic commit versions via AtomicU64

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitmaps;
pub mod postings;
pub mod roaring;
pub mod value_index;

pub use bitmaps::{debug_string, debug_summary, to_bit, BitmapAndLastId, Bitmaps, TimeIndex};
pub use postings::{decode_postings, encode_postings, peek_last_id, seal, unseal};
pub use roaring::RoaringBitmaps;
pub use value_index::{CommitBatch, MemoryValueIndex, ValueIndex, VersionProvider};
