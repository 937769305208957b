//! Write-path statistics and index repair tracking
//!
//! Counters use Relaxed ordering: they are read by a metrics collaborator and
//! synchronize nothing else.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sift_core::PartitionCoord;
use tracing::info;

/// Why a batch is being indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategy {
    /// Live tailing of the WAL
    Ingress,
    /// Replaying the WAL into a fresh context
    Rebuild,
    /// Catching up from a sip cursor
    Sip,
}

impl IndexStrategy {
    /// Lowercase name for logs and stat keys
    pub fn name(&self) -> &'static str {
        match self {
            IndexStrategy::Ingress => "ingress",
            IndexStrategy::Rebuild => "rebuild",
            IndexStrategy::Sip => "sip",
        }
    }
}

/// Snapshot of [`PartitionStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Records scanned per strategy, including those for other partitions
    pub ingressed: Vec<(IndexStrategy, u64)>,
    /// Largest id with an activity payload
    pub last_id: i32,
    /// Largest indexed timestamp
    pub largest_timestamp: i64,
    /// Completed merges
    pub merges: u64,
}

/// Per-partition write-path counters
#[derive(Debug)]
pub struct PartitionStats {
    ingressed: DashMap<IndexStrategy, u64>,
    last_id: AtomicI32,
    largest_timestamp: AtomicI64,
    merges: AtomicU64,
}

impl Default for PartitionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionStats {
    /// Empty counters
    pub fn new() -> Self {
        Self {
            ingressed: DashMap::new(),
            last_id: AtomicI32::new(-1),
            largest_timestamp: AtomicI64::new(i64::MIN),
            merges: AtomicU64::new(0),
        }
    }

    /// Count records scanned under a strategy
    pub fn ingressed(&self, strategy: IndexStrategy, count: u64) {
        *self.ingressed.entry(strategy).or_insert(0) += count;
    }

    /// Record the partition's last id and largest timestamp after a batch
    pub fn indexed(&self, last_id: i32, largest_timestamp: i64) {
        self.last_id.store(last_id, Ordering::Relaxed);
        self.largest_timestamp.store(largest_timestamp, Ordering::Relaxed);
    }

    /// Count a completed merge
    pub fn merged(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut ingressed: Vec<(IndexStrategy, u64)> =
            self.ingressed.iter().map(|e| (*e.key(), *e.value())).collect();
        ingressed.sort();
        StatsSnapshot {
            ingressed,
            last_id: self.last_id.load(Ordering::Relaxed),
            largest_timestamp: self.largest_timestamp.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
        }
    }
}

/// Tracks, per strategy and partition, whether the last pass repaired anything
#[derive(Debug, Default)]
pub struct IndexRepairs {
    repairing: DashMap<(IndexStrategy, PartitionCoord), bool>,
}

impl IndexRepairs {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// A pass consumed `count` records
    pub fn repaired(&self, strategy: IndexStrategy, coord: &PartitionCoord, count: usize) {
        let previous = self.repairing.insert((strategy, coord.clone()), true);
        if previous != Some(true) {
            info!(
                target: "sift::partition",
                strategy = strategy.name(),
                coord = %coord,
                count,
                "partition is repairing"
            );
        }
    }

    /// A pass found nothing to do
    pub fn current(&self, strategy: IndexStrategy, coord: &PartitionCoord) {
        let previous = self.repairing.insert((strategy, coord.clone()), false);
        if previous == Some(true) {
            info!(
                target: "sift::partition",
                strategy = strategy.name(),
                coord = %coord,
                "partition is current"
            );
        }
    }

    /// Whether the last pass repaired; `None` before any pass
    pub fn is_repairing(&self, strategy: IndexStrategy, coord: &PartitionCoord) -> Option<bool> {
        self.repairing
            .get(&(strategy, coord.clone()))
            .map(|r| *r.value())
    }
}
