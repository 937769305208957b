//! Core types for sift
//!
//! This crate defines the foundational types used throughout the system:
//! - SiftError / SiftResult: error taxonomy of the write path
//! - PartitionCoord, PartitionCoordInfo: partition identity and lifecycle snapshot
//! - Activity, PartitionedActivity: records pulled from the WAL
//! - Schema, FieldDefinition, FieldType: field layout, read-only here
//! - Sip: WAL read position

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activity;
pub mod error;
pub mod schema;
pub mod types;

pub use activity::{Activity, ActivityAndId, ActivityType, PartitionedActivity, ReadEvent};
pub use error::{SiftError, SiftResult};
pub use schema::{FieldDefinition, FieldType, Schema};
pub use types::{
    BackingStorage, HostName, PartitionCoord, PartitionCoordInfo, PartitionId, PartitionState,
    Sip, StreamId, TenantId, TermId,
};
