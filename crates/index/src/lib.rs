//! Delta indexes for sift
//!
//! Every index here pairs an immutable base (a [`sift_storage::ValueIndex`])
//! with an in-memory delta that absorbs writes. Reads see `base ∪ delta`;
//! [`Mergeable::merge`] folds the delta into the base.
//!
//! - DeltaFieldIndex / FieldIndexProvider: term postings per field
//! - CardinalityLedger: per-id and global term counts for tracked fields
//! - DeltaTimeIndex: timestamp to dense id
//! - DeltaAuthzIndex, DeltaRemovalIndex, DeltaInboxIndex,
//!   DeltaUnreadTrackingIndex: keyed postings built on DeltaPostings
//! - DeltaActivityIndex: id to activity payload
//! - DeltaSipIndex: WAL read position
//!
//! # Design Notes
//!
//! Merges are idempotent. A delta entry is only dropped after its commit
//! landed and only if no write touched it in the meantime, so rerunning a
//! merge after a partial failure is always safe.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activity;
pub mod authz;
pub mod cardinality;
pub mod delta;
pub mod field;
pub mod inbox;
pub mod mergeable;
pub mod removal;
pub mod sip;
pub mod time;
pub mod unread;

pub use activity::DeltaActivityIndex;
pub use authz::DeltaAuthzIndex;
pub use cardinality::{CardinalityLedger, GLOBAL_CARDINALITY_ID};
pub use delta::{DeltaPostings, StripeKeyFn, TermDelta};
pub use field::{DeltaFieldIndex, FieldIndexProvider, InvertedIndex};
pub use inbox::DeltaInboxIndex;
pub use mergeable::Mergeable;
pub use removal::DeltaRemovalIndex;
pub use sip::DeltaSipIndex;
pub use time::{DeltaTimeIndex, NO_TIMESTAMP};
pub use unread::DeltaUnreadTrackingIndex;
