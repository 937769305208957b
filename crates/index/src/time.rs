//! Delta time index
//!
//! Maps activity timestamps to dense internal ids. Ids are handed out in
//! arrival order starting at 0 and never reassigned: asking for the id of a
//! timestamp that already has one returns the existing id.
//!
//! All ids live in memory for lookups; ids assigned since the last merge are
//! the delta and are persisted to the base (`id BE -> sealed ts LE`) on merge.
//! Range lookups binary search the timestamp column, so they assume the
//! partition receives timestamps in ascending order.

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use parking_lot::RwLock;
use sift_core::{SiftError, SiftResult};
use sift_storage::{seal, unseal, CommitBatch, TimeIndex, ValueIndex, VersionProvider};
use tracing::debug;

use crate::mergeable::Mergeable;

/// Timestamp that never resolves to an id
pub const NO_TIMESTAMP: i64 = -1;

#[derive(Debug, Default)]
struct TimeState {
    timestamps: Vec<i64>,
    ids: HashMap<i64, i32>,
    merged: usize,
    smallest: Option<i64>,
    largest: Option<i64>,
}

impl TimeState {
    fn assign(&mut self, timestamp: i64) -> i32 {
        if let Some(id) = self.ids.get(&timestamp) {
            return *id;
        }
        let id = self.timestamps.len() as i32;
        self.timestamps.push(timestamp);
        self.ids.insert(timestamp, id);
        self.smallest = Some(self.smallest.map_or(timestamp, |s| s.min(timestamp)));
        self.largest = Some(self.largest.map_or(timestamp, |l| l.max(timestamp)));
        id
    }
}

/// Timestamp to id mapping with a merged base
pub struct DeltaTimeIndex {
    base: Arc<dyn ValueIndex>,
    versions: Arc<VersionProvider>,
    state: RwLock<TimeState>,
}

impl DeltaTimeIndex {
    /// Empty time index over `base`
    pub fn new(base: Arc<dyn ValueIndex>, versions: Arc<VersionProvider>) -> Self {
        Self {
            base,
            versions,
            state: RwLock::new(TimeState::default()),
        }
    }

    /// Reload previously merged ids from `base`
    pub fn open(base: Arc<dyn ValueIndex>, versions: Arc<VersionProvider>) -> SiftResult<Self> {
        let mut state = TimeState::default();
        for (key, record) in base.row_scan()? {
            if key.len() != 4 {
                return Err(SiftError::corruption(format!(
                    "time index key of {} bytes",
                    key.len()
                )));
            }
            let id = BigEndian::read_u32(&key) as usize;
            let payload = unseal(&record)?;
            if payload.len() != 8 || id != state.timestamps.len() {
                return Err(SiftError::corruption(format!("time index gap at id {}", id)));
            }
            state.assign(LittleEndian::read_i64(payload));
        }
        state.merged = state.timestamps.len();
        Ok(Self {
            base,
            versions,
            state: RwLock::new(state),
        })
    }

    /// Ids for timestamps, assigning new ones as needed.
    ///
    /// `-1` maps to `-1`; a known timestamp maps to its existing id.
    pub fn next_id(&self, timestamps: &[i64]) -> Vec<i32> {
        let mut state = self.state.write();
        timestamps
            .iter()
            .map(|t| if *t == NO_TIMESTAMP { -1 } else { state.assign(*t) })
            .collect()
    }

    /// Timestamp of an id, if assigned
    pub fn timestamp(&self, id: i32) -> Option<i64> {
        if id < 0 {
            return None;
        }
        self.state.read().timestamps.get(id as usize).copied()
    }

    /// Ids assigned since the last merge
    pub fn delta_count(&self) -> usize {
        let state = self.state.read();
        state.timestamps.len() - state.merged
    }

    /// Approximate bytes held by unmerged ids
    pub fn size_in_memory(&self) -> u64 {
        // timestamp column plus the reverse map entry
        self.delta_count() as u64 * 20
    }
}

impl TimeIndex for DeltaTimeIndex {
    fn last_id(&self) -> i32 {
        self.state.read().timestamps.len() as i32 - 1
    }

    fn smallest_timestamp(&self) -> i64 {
        self.state.read().smallest.unwrap_or(i64::MAX)
    }

    fn largest_timestamp(&self) -> i64 {
        self.state.read().largest.unwrap_or(i64::MIN)
    }

    fn contains(&self, timestamps: &[i64]) -> Vec<bool> {
        let state = self.state.read();
        timestamps.iter().map(|t| state.ids.contains_key(t)).collect()
    }

    fn get_exact_id(&self, timestamp: i64) -> i32 {
        self.state.read().ids.get(&timestamp).copied().unwrap_or(-1)
    }

    fn smallest_exclusive_timestamp_index(&self, timestamp: i64) -> i32 {
        self.state.read().timestamps.partition_point(|t| *t <= timestamp) as i32
    }

    fn largest_inclusive_timestamp_index(&self, timestamp: i64) -> i32 {
        self.state.read().timestamps.partition_point(|t| *t <= timestamp) as i32 - 1
    }
}

impl Mergeable for DeltaTimeIndex {
    fn name(&self) -> &str {
        "time"
    }

    fn merge(&self) -> SiftResult<()> {
        let (batch, upto) = {
            let state = self.state.read();
            let batch: CommitBatch = state.timestamps[state.merged..]
                .iter()
                .enumerate()
                .map(|(offset, ts)| {
                    let mut key = vec![0u8; 4];
                    BigEndian::write_u32(&mut key, (state.merged + offset) as u32);
                    let mut payload = [0u8; 8];
                    LittleEndian::write_i64(&mut payload, *ts);
                    (key, seal(&payload))
                })
                .collect();
            (batch, state.timestamps.len())
        };
        if batch.is_empty() {
            return Ok(());
        }
        let written = batch.len();
        self.base.commit(batch, self.versions.next_version())?;
        let mut state = self.state.write();
        state.merged = state.merged.max(upto);
        debug!(target: "sift::index", index = "time", written, "merged time index");
        Ok(())
    }
}
