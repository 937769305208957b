//! Core types for sift
//!
//! This module defines the identifiers shared by every layer:
//! - TenantId / PartitionId / HostName: components of a partition coordinate
//! - PartitionCoord: identifies one partition replica, used as a map key
//! - PartitionState / BackingStorage / PartitionCoordInfo: lifecycle snapshot
//! - TermId / StreamId: byte-string keys for postings
//! - Sip: read position used by WAL tailing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Tenant identifier (opaque bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(Arc<[u8]>);

impl TenantId {
    /// Create a tenant id from raw bytes
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(bytes.as_ref()))
    }

    /// Raw bytes of this tenant id
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Partition number within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Create a partition id
    pub fn of(id: u32) -> Self {
        Self(id)
    }

    /// Numeric value
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical name of the host serving a replica
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostName(Arc<str>);

impl HostName {
    /// Create a host name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one partition replica: tenant, partition, host.
///
/// Immutable and cheap to clone; used as the key of the chit ledger and of
/// every striped lock keyed by partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionCoord {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Partition within the tenant
    pub partition_id: PartitionId,
    /// Host serving this replica
    pub host: HostName,
}

impl PartitionCoord {
    /// Create a coordinate
    pub fn new(tenant_id: TenantId, partition_id: PartitionId, host: HostName) -> Self {
        Self {
            tenant_id,
            partition_id,
            host,
        }
    }
}

impl fmt::Display for PartitionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.tenant_id, self.partition_id, self.host)
    }
}

/// Lifecycle state of a partition replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    /// Opened but not yet caught up
    Bootstrap,
    /// Replaying the WAL into a fresh context
    Rebuilding,
    /// Serving reads and accepting writes
    Online,
    /// Not serving
    Offline,
    /// Superseded by a rebuilt replica
    Obsolete,
    /// Being replaced during a deploy
    Upgrading,
}

/// Physical backing of a partition context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackingStorage {
    /// Heap-resident indexes
    Memory,
    /// Disk-resident indexes
    Disk,
}

/// Snapshot of state and storage for one accessor.
///
/// Transitions never mutate: `copy_to_state` / `copy_to_storage` return a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionCoordInfo {
    /// Lifecycle state
    pub state: PartitionState,
    /// Physical backing
    pub storage: BackingStorage,
}

impl PartitionCoordInfo {
    /// Create an info pair
    pub fn new(state: PartitionState, storage: BackingStorage) -> Self {
        Self { state, storage }
    }

    /// Same storage, new state
    pub fn copy_to_state(&self, state: PartitionState) -> Self {
        Self {
            state,
            storage: self.storage,
        }
    }

    /// Same state, new storage
    pub fn copy_to_storage(&self, storage: BackingStorage) -> Self {
        Self {
            state: self.state,
            storage,
        }
    }
}

/// Interned term bytes; the key of a posting list within a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TermId(Arc<[u8]>);

impl TermId {
    /// Create a term id from raw bytes
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(bytes.as_ref()))
    }

    /// Raw bytes of this term
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for TermId {
    fn from(s: &str) -> Self {
        TermId::new(s.as_bytes())
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Identifies one user's inbox stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(Arc<[u8]>);

impl StreamId {
    /// Create a stream id from raw bytes
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(bytes.as_ref()))
    }

    /// Raw bytes of this stream id
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Read position of a partition within the WAL.
///
/// Ordered by clock timestamp, then activity timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sip {
    /// Wall clock of the last WAL entry seen
    pub clock_timestamp: i64,
    /// Activity timestamp of the last WAL entry seen
    pub activity_timestamp: i64,
}

impl Sip {
    /// Position before any WAL entry
    pub const INITIAL: Sip = Sip {
        clock_timestamp: 0,
        activity_timestamp: 0,
    };

    /// Create a sip
    pub fn new(clock_timestamp: i64, activity_timestamp: i64) -> Self {
        Self {
            clock_timestamp,
            activity_timestamp,
        }
    }
}
