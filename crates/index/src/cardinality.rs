//! Cardinality ledger for tracked fields
//!
//! One record per `(field_id, term)` key: a count for each id plus the running
//! global count under [`GLOBAL_CARDINALITY_ID`]. The ledger is loaded from its
//! base on open and stays resident; writes mark an entry dirty and
//! [`CardinalityLedger::merge`] persists every dirty entry under one version.
//!
//! ```text
//! payload = { [id i32 BE][count i64 BE] }*   (sealed, ids ascending)
//! ```

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use sift_core::{SiftError, SiftResult};
use sift_storage::{seal, unseal, CommitBatch, ValueIndex, VersionProvider};
use tracing::debug;

/// Id under which the ledger keeps a term's global count
pub const GLOBAL_CARDINALITY_ID: i32 = -1;

const PAIR_LEN: usize = 12;

#[derive(Debug, Default)]
struct LedgerEntry {
    counts: FxHashMap<i32, i64>,
    generation: u64,
    dirty: bool,
}

fn encode_counts(counts: &FxHashMap<i32, i64>) -> Vec<u8> {
    let mut pairs: Vec<(i32, i64)> = counts.iter().map(|(id, c)| (*id, *c)).collect();
    pairs.sort_unstable();
    let mut payload = vec![0u8; pairs.len() * PAIR_LEN];
    for (chunk, (id, count)) in payload.chunks_exact_mut(PAIR_LEN).zip(pairs) {
        BigEndian::write_i32(&mut chunk[..4], id);
        BigEndian::write_i64(&mut chunk[4..], count);
    }
    seal(&payload)
}

fn decode_counts(record: &[u8]) -> SiftResult<FxHashMap<i32, i64>> {
    let payload = unseal(record)?;
    if payload.len() % PAIR_LEN != 0 {
        return Err(SiftError::corruption(format!(
            "cardinality record of {} bytes",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(PAIR_LEN)
        .map(|chunk| (BigEndian::read_i32(&chunk[..4]), BigEndian::read_i64(&chunk[4..])))
        .collect())
}

/// Per-id and global term counts over a base store
pub struct CardinalityLedger {
    base: Arc<dyn ValueIndex>,
    versions: Arc<VersionProvider>,
    entries: DashMap<Vec<u8>, LedgerEntry>,
}

impl CardinalityLedger {
    /// Empty ledger over a fresh base
    pub fn new(base: Arc<dyn ValueIndex>, versions: Arc<VersionProvider>) -> Self {
        Self {
            base,
            versions,
            entries: DashMap::new(),
        }
    }

    /// Load every persisted record of `base`.
    ///
    /// # Errors
    ///
    /// `Corruption` when a record fails its checksum or does not decode.
    pub fn open(base: Arc<dyn ValueIndex>, versions: Arc<VersionProvider>) -> SiftResult<Self> {
        let entries = DashMap::new();
        for (key, record) in base.row_scan()? {
            let counts = decode_counts(&record)?;
            entries.insert(
                key,
                LedgerEntry {
                    counts,
                    ..LedgerEntry::default()
                },
            );
        }
        debug!(
            target: "sift::index",
            store = %base.name(),
            terms = entries.len(),
            "cardinality ledger loaded"
        );
        Ok(Self {
            base,
            versions,
            entries,
        })
    }

    /// Count stored for `id`, 0 when unknown
    pub fn get(&self, key: &[u8], id: i32) -> i64 {
        self.entries
            .get(key)
            .and_then(|entry| entry.counts.get(&id).copied())
            .unwrap_or(0)
    }

    /// Counts for several ids; negative ids report 0
    pub fn get_many(&self, key: &[u8], ids: &[i32]) -> Vec<i64> {
        let entry = self.entries.get(key);
        ids.iter()
            .map(|id| {
                if *id < 0 {
                    return 0;
                }
                entry
                    .as_ref()
                    .and_then(|e| e.counts.get(id).copied())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Replace per-id counts and move the global count by the difference
    pub fn overwrite(&self, key: &[u8], ids: &[i32], counts: &[i64]) {
        let mut entry = self.entries.entry(key.to_vec()).or_default();
        let mut delta = 0i64;
        for (id, count) in ids.iter().zip(counts) {
            let existing = entry.counts.insert(*id, *count).unwrap_or(0);
            delta += count - existing;
        }
        *entry.counts.entry(GLOBAL_CARDINALITY_ID).or_insert(0) += delta;
        entry.generation += 1;
        entry.dirty = true;
    }

    /// Entries written since their last merge
    pub fn dirty_count(&self) -> usize {
        self.entries.iter().filter(|e| e.dirty).count()
    }

    /// Persist every dirty entry under one version.
    ///
    /// An entry stays dirty if it was written again while the commit ran.
    pub fn merge(&self) -> SiftResult<usize> {
        let mut staged: CommitBatch = Vec::new();
        let mut generations = Vec::new();
        for entry in self.entries.iter().filter(|e| e.dirty) {
            staged.push((entry.key().clone(), encode_counts(&entry.counts)));
            generations.push(entry.generation);
        }
        if staged.is_empty() {
            return Ok(0);
        }

        let keys: Vec<Vec<u8>> = staged.iter().map(|(key, _)| key.clone()).collect();
        let version = self.versions.next_version();
        self.base.commit(staged, version)?;
        for (key, generation) in keys.iter().zip(generations) {
            if let Some(mut entry) = self.entries.get_mut(key) {
                if entry.generation == generation {
                    entry.dirty = false;
                }
            }
        }
        debug!(
            target: "sift::index",
            store = %self.base.name(),
            version,
            written = keys.len(),
            "cardinality ledger merged"
        );
        Ok(keys.len())
    }
}
