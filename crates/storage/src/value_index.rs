//! Base store for merged index state
//!
//! A [`ValueIndex`] is the immutable "base" half of every delta index. It is
//! supplied by the storage-allocation collaborator; the write path only ever
//! reads single keys and commits whole batches.
//!
//! # Design Notes
//!
//! - **Stage all, write once**: `commit` makes every record of a batch
//!   visible together, under one version. A batch that fails to stage is never
//!   partially applied.
//! - **Version allocation outside the write lock**: callers draw a version
//!   from [`VersionProvider`] before committing.
//! - `MemoryValueIndex` keeps an ordered `BTreeMap` behind a
//!   `parking_lot::RwLock` so prefix scans come back in key order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sift_core::{SiftError, SiftResult};
use tracing::{trace, warn};

/// A batch of `(key, value)` records committed together
pub type CommitBatch = Vec<(Vec<u8>, Vec<u8>)>;

/// Key/value base store for one index
pub trait ValueIndex: Send + Sync {
    /// Store name, for logs
    fn name(&self) -> &str;

    /// Point read
    fn get(&self, key: &[u8]) -> SiftResult<Option<Arc<[u8]>>>;

    /// Atomically publish every record in `batch` under `version`.
    ///
    /// Versions must strictly increase; an out-of-order commit is rejected.
    fn commit(&self, batch: CommitBatch, version: u64) -> SiftResult<()>;

    /// Every record whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> SiftResult<Vec<(Vec<u8>, Arc<[u8]>)>>;

    /// Every record, in key order
    fn row_scan(&self) -> SiftResult<Vec<(Vec<u8>, Arc<[u8]>)>> {
        self.scan_prefix(&[])
    }

    /// Number of records
    fn len(&self) -> usize;

    /// True when the store holds no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of keys and values
    fn size_in_bytes(&self) -> u64;

    /// Version of the last successful commit, 0 before any commit
    fn version(&self) -> u64;
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<Vec<u8>, Arc<[u8]>>,
    version: u64,
    bytes: u64,
}

/// Heap-resident [`ValueIndex`]
#[derive(Debug)]
pub struct MemoryValueIndex {
    name: String,
    state: RwLock<MemoryState>,
}

impl MemoryValueIndex {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl ValueIndex for MemoryValueIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> SiftResult<Option<Arc<[u8]>>> {
        Ok(self.state.read().rows.get(key).cloned())
    }

    fn commit(&self, batch: CommitBatch, version: u64) -> SiftResult<()> {
        let mut state = self.state.write();
        if version <= state.version {
            warn!(
                target: "sift::index",
                store = %self.name,
                version,
                current = state.version,
                "out-of-order commit rejected"
            );
            return Err(SiftError::invalid_input(format!(
                "{}: commit version {} is not after {}",
                self.name, version, state.version
            )));
        }
        let records = batch.len();
        for (key, value) in batch {
            let added = (key.len() + value.len()) as u64;
            let key_len = key.len() as u64;
            if let Some(previous) = state.rows.insert(key, Arc::from(value)) {
                state.bytes -= key_len + previous.len() as u64;
            }
            state.bytes += added;
        }
        state.version = version;
        trace!(target: "sift::index", store = %self.name, version, records, "committed");
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> SiftResult<Vec<(Vec<u8>, Arc<[u8]>)>> {
        let state = self.state.read();
        Ok(state
            .rows
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    fn size_in_bytes(&self) -> u64 {
        self.state.read().bytes
    }

    fn version(&self) -> u64 {
        self.state.read().version
    }
}

/// Monotonic commit version source, shared by every index of a context.
#[derive(Debug, Default)]
pub struct VersionProvider {
    current: AtomicU64,
}

impl VersionProvider {
    /// Start at version 0; the first allocated version is 1
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Resume after `version`, e.g. the highest version found in reopened bases
    pub fn starting_after(version: u64) -> Self {
        Self {
            current: AtomicU64::new(version),
        }
    }

    /// Allocate the next version
    pub fn next_version(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last allocated version
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}
