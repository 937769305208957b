//! Merge credit scheduler
//!
//! A shared budget of "chits" bounds how much unmerged write volume may pile
//! up across all partitions. Every indexed record takes a chit; every merge
//! refunds everything its partition took. Once the budget is overdrawn the
//! overage is handed out in ledger insertion order: the partition that started
//! accumulating first, and partitions holding more volume, merge first.
//!
//! # Conservation
//!
//! `remaining() + sum(taken(c)) == total` holds whenever no `take` is in
//! flight. The credit half of `take` and the whole of `refund_all` run under
//! the coordinate's stripe lock, so a refund can never race a credit into an
//! entry that is no longer in the ledger.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use sift_core::PartitionCoord;
use tracing::debug;

use crate::striping::StripedLocks;

/// Decides when a partition's pending delta volume must be merged.
pub trait MergeChits: Send + Sync {
    /// Debit `count` chits on behalf of `coord`.
    ///
    /// Returns true if `coord` should merge now.
    fn take(&self, coord: &PartitionCoord, count: i64) -> bool;

    /// Return everything `coord` has taken and forget it.
    ///
    /// Called exactly once after each completed merge.
    fn refund_all(&self, coord: &PartitionCoord);

    /// Chits currently held by `coord`
    fn taken(&self, coord: &PartitionCoord) -> i64;

    /// Chits left in the shared budget; negative when overdrawn
    fn remaining(&self) -> i64;
}

/// Insertion-ordered [`MergeChits`] implementation.
pub struct OrderedMergeChits {
    name: String,
    remaining: Arc<AtomicI64>,
    max_overage: i64,
    lookup: DashMap<PartitionCoord, Arc<AtomicI64>>,
    ledger: Mutex<Vec<(PartitionCoord, Arc<AtomicI64>)>>,
    stripes: StripedLocks,
}

impl OrderedMergeChits {
    /// Create a scheduler drawing on `remaining`.
    ///
    /// A negative `max_overage` means the overage ceiling equals `max_chits`.
    pub fn new(
        name: impl Into<String>,
        remaining: Arc<AtomicI64>,
        max_chits: i64,
        max_overage: i64,
        stripes: usize,
    ) -> Self {
        Self {
            name: name.into(),
            remaining,
            max_overage: if max_overage >= 0 { max_overage } else { max_chits },
            lookup: DashMap::new(),
            ledger: Mutex::new(Vec::new()),
            stripes: StripedLocks::new(stripes),
        }
    }

    /// Scheduler with its own budget of `max_chits`
    pub fn with_budget(name: impl Into<String>, max_chits: i64, max_overage: i64) -> Self {
        Self::new(
            name,
            Arc::new(AtomicI64::new(max_chits)),
            max_chits,
            max_overage,
            128,
        )
    }

    /// Scheduler name, for logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective overage ceiling
    pub fn max_overage(&self) -> i64 {
        self.max_overage
    }

    /// Coordinates in the ledger, oldest first
    pub fn queued(&self) -> Vec<PartitionCoord> {
        self.ledger.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    fn can_merge(&self, coord: &PartitionCoord) -> bool {
        let chits_free = self.remaining.load(Ordering::SeqCst);
        if chits_free >= 0 {
            return false;
        }

        let taken = self.taken(coord);
        if taken <= 0 {
            return false;
        }

        let mut overage = chits_free.abs();
        let ledger = self.ledger.lock();
        for (entry, got) in ledger.iter() {
            let got = got.load(Ordering::SeqCst);
            let required_overage = self.max_overage.min(got / 2);
            if entry == coord {
                if overage >= required_overage {
                    debug!(
                        target: "sift::chits",
                        chits = %self.name,
                        coord = %coord,
                        taken = got,
                        power = 64 - (got as u64).leading_zeros(),
                        "merge granted"
                    );
                    return true;
                }
                break;
            }
            overage -= required_overage;
            if overage <= 0 {
                break;
            }
        }
        false
    }
}

impl MergeChits for OrderedMergeChits {
    fn take(&self, coord: &PartitionCoord, count: i64) -> bool {
        let chits_free = self.remaining.fetch_sub(count, Ordering::SeqCst) - count;
        {
            let _stripe = self.stripes.lock(coord);
            let existing = self.lookup.get(coord).map(|taken| Arc::clone(taken.value()));
            let taken = match existing {
                Some(taken) => taken,
                None => {
                    let taken = Arc::new(AtomicI64::new(0));
                    self.lookup.insert(coord.clone(), Arc::clone(&taken));
                    self.ledger.lock().push((coord.clone(), Arc::clone(&taken)));
                    taken
                }
            };
            taken.fetch_add(count, Ordering::SeqCst);
        }
        debug!(target: "sift::chits", chits = %self.name, free = chits_free, "took {}", count);

        self.can_merge(coord)
    }

    fn refund_all(&self, coord: &PartitionCoord) {
        let _stripe = self.stripes.lock(coord);
        if let Some((_, taken)) = self.lookup.remove(coord) {
            self.ledger.lock().retain(|(c, _)| c != coord);
            let amount = taken.load(Ordering::SeqCst);
            let chits_free = self.remaining.fetch_add(amount, Ordering::SeqCst) + amount;
            debug!(target: "sift::chits", chits = %self.name, free = chits_free, coord = %coord, "refunded");
        }
    }

    fn taken(&self, coord: &PartitionCoord) -> i64 {
        self.lookup
            .get(coord)
            .map(|taken| taken.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{HostName, PartitionId, TenantId};

    fn coord(partition: u32) -> PartitionCoord {
        PartitionCoord::new(
            TenantId::new("tenant"),
            PartitionId::of(partition),
            HostName::new("localhost"),
        )
    }

    #[test]
    fn test_no_merge_while_budget_positive() {
        let chits = OrderedMergeChits::with_budget("test", 100, 10);
        assert!(!chits.take(&coord(1), 99));
        assert_eq!(chits.remaining(), 1);
        assert_eq!(chits.taken(&coord(1)), 99);
    }

    #[test]
    fn test_single_coord_worked_example() {
        // remaining -30 after taking 40 from a budget of 10
        let chits = OrderedMergeChits::with_budget("test", 10, 100);
        assert!(chits.take(&coord(1), 40));
        assert_eq!(chits.remaining(), -30);
    }

    #[test]
    fn test_negative_max_overage_uses_max_chits() {
        let chits = OrderedMergeChits::with_budget("test", 10, -1);
        assert_eq!(chits.max_overage(), 10);
    }

    #[test]
    fn test_refund_all_restores_budget() {
        let chits = OrderedMergeChits::with_budget("test", 10, 100);
        chits.take(&coord(1), 7);
        chits.take(&coord(2), 5);
        chits.refund_all(&coord(1));
        assert_eq!(chits.remaining(), 5);
        assert_eq!(chits.taken(&coord(1)), 0);
        assert_eq!(chits.queued(), vec![coord(2)]);
        // Refunding an unknown coordinate is a no-op
        chits.refund_all(&coord(9));
        assert_eq!(chits.remaining(), 5);
    }

    #[test]
    fn test_older_entry_consumes_overage_first() {
        let chits = OrderedMergeChits::with_budget("test", 0, 1000);
        // coord 1 enters first holding 20 (requires 10 of overage)
        chits.take(&coord(1), 20);
        // coord 2 takes 10: overage 30, minus 10 for coord 1 leaves 20 >= 5
        assert!(chits.take(&coord(2), 10));
    }

    #[test]
    fn test_early_break_starves_later_entry() {
        let chits = OrderedMergeChits::with_budget("test", 5, 1000);
        chits.take(&coord(1), 4);
        chits.take(&coord(2), 4);
        // remaining -4: coord 1 and 2 each require 2, leaving exactly 0.
        // The scan stops before coord 3 even though it requires 0.
        assert!(!chits.take(&coord(3), 1));
        assert_eq!(chits.remaining(), -4);
    }

    #[test]
    fn test_larger_holder_needs_more_overage() {
        let chits = OrderedMergeChits::with_budget("test", 0, 1000);
        // 30 taken requires 15 of overage; 30 >= 15
        assert!(chits.take(&coord(1), 30));
        chits.refund_all(&coord(1));
        // shared budget overdrawn by 1 only: a 2-chit holder (requires 1) merges
        let shared = Arc::new(AtomicI64::new(1));
        let chits = OrderedMergeChits::new("test", shared, 1, 1000, 16);
        assert!(chits.take(&coord(1), 2));
    }
}
