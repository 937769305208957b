//! Partition accessor: the state machine and concurrency gate of one partition
//!
//! An accessor is an immutable snapshot of a partition's coordinate, state and
//! storage. Transitions never mutate it: [`PartitionAccessor::copy_to_state`]
//! and [`MigrationHandle::migrated`] return new accessors. State copies share
//! the context, the admission semaphore, the closed flag and the writer sets;
//! a migrated accessor starts fresh around its new context.
//!
//! # Design Notes
//!
//! - **Two independent gates**: the admission semaphore bounds concurrent
//!   readers and writers; the context's write lock serializes indexing and
//!   merging. Close and migration take every permit, which waits out every
//!   in-flight holder and, the semaphore being FIFO, blocks new ones.
//! - **Merge outside the permit**: chits are taken after the write lock and
//!   permit are released; a granted merge then takes the write lock again.
//! - **Corruption is sticky**: any error whose cause chain holds a corruption
//!   marks the context corrupt before it propagates.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use sift_concurrency::{fan_out, AdmissionSemaphore, Executor, MergeChits, NamedTask};
use sift_core::{
    Activity, ActivityAndId, ActivityType, BackingStorage, PartitionCoord, PartitionCoordInfo,
    PartitionState, PartitionedActivity, SiftError, SiftResult, Sip,
};
use sift_index::NO_TIMESTAMP;
use sift_storage::{Bitmaps, TimeIndex};
use tracing::{debug, info, warn};

use crate::context::PartitionContext;
use crate::indexer::Indexer;
use crate::stats::{IndexRepairs, IndexStrategy, PartitionStats};

/// Cooperative cancellation for an indexing thread.
///
/// Checked once after the write-lock section of
/// [`PartitionAccessor::index_internal`]; observing it clears it.
#[derive(Debug, Default)]
pub struct Interrupt {
    flag: AtomicBool,
}

impl Interrupt {
    /// A cleared flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation is pending
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Observe and clear a pending cancellation
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// Held permits, released on drop
struct Permits<'a> {
    semaphore: &'a AdmissionSemaphore,
    count: usize,
}

impl<'a> Permits<'a> {
    fn acquire(semaphore: &'a AdmissionSemaphore, count: usize) -> Self {
        semaphore.acquire(count);
        Self { semaphore, count }
    }
}

impl Drop for Permits<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.count);
    }
}

/// The state machine and concurrency gate of one partition replica
pub struct PartitionAccessor<B: Bitmaps> {
    bitmaps: Arc<B>,
    coord: PartitionCoord,
    info: PartitionCoordInfo,
    context: Option<Arc<PartitionContext<B>>>,
    stats: Arc<PartitionStats>,
    index_repairs: Arc<IndexRepairs>,
    indexer: Arc<Indexer<B>>,
    rebuild_timestamp: Arc<AtomicI64>,
    begin_writers: Arc<Mutex<FxHashSet<i32>>>,
    end_writers: Arc<Mutex<FxHashSet<i32>>>,
    semaphore: Arc<AdmissionSemaphore>,
    closed: Arc<AtomicBool>,
    last_merge_timestamp: Arc<AtomicI64>,
}

impl<B: Bitmaps> PartitionAccessor<B> {
    /// Accessor for a freshly opened partition
    pub fn new(
        bitmaps: Arc<B>,
        coord: PartitionCoord,
        info: PartitionCoordInfo,
        context: Option<Arc<PartitionContext<B>>>,
        index_repairs: Arc<IndexRepairs>,
        stats: Arc<PartitionStats>,
        permits: usize,
    ) -> Self {
        Self {
            bitmaps,
            coord,
            info,
            context,
            stats,
            index_repairs,
            indexer: Arc::new(Indexer::new()),
            rebuild_timestamp: Arc::new(AtomicI64::new(0)),
            begin_writers: Arc::new(Mutex::new(FxHashSet::default())),
            end_writers: Arc::new(Mutex::new(FxHashSet::default())),
            semaphore: Arc::new(AdmissionSemaphore::new(permits)),
            closed: Arc::new(AtomicBool::new(false)),
            last_merge_timestamp: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    /// Same partition in a new state, sharing everything else
    pub fn copy_to_state(&self, state: PartitionState) -> Self {
        Self {
            bitmaps: Arc::clone(&self.bitmaps),
            coord: self.coord.clone(),
            info: self.info.copy_to_state(state),
            context: self.context.clone(),
            stats: Arc::clone(&self.stats),
            index_repairs: Arc::clone(&self.index_repairs),
            indexer: Arc::clone(&self.indexer),
            rebuild_timestamp: Arc::clone(&self.rebuild_timestamp),
            begin_writers: Arc::clone(&self.begin_writers),
            end_writers: Arc::clone(&self.end_writers),
            semaphore: Arc::clone(&self.semaphore),
            closed: Arc::clone(&self.closed),
            last_merge_timestamp: Arc::clone(&self.last_merge_timestamp),
        }
    }

    /// Partition coordinate
    pub fn coord(&self) -> &PartitionCoord {
        &self.coord
    }

    /// State and storage
    pub fn info(&self) -> PartitionCoordInfo {
        self.info
    }

    /// Live context, if any
    pub fn context(&self) -> Option<&Arc<PartitionContext<B>>> {
        self.context.as_ref()
    }

    /// Bitmap engine
    pub fn bitmaps(&self) -> &Arc<B> {
        &self.bitmaps
    }

    /// Write-path counters
    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }

    /// Whether the partition has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wall clock millis of the last completed merge, or of creation
    pub fn last_merge_timestamp(&self) -> i64 {
        self.last_merge_timestamp.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Probes
    // ========================================================================

    /// Offline or bootstrapping on disk
    pub fn can_hot_deploy(&self) -> bool {
        matches!(
            self.info.state,
            PartitionState::Offline | PartitionState::Bootstrap
        ) && self.info.storage == BackingStorage::Disk
    }

    /// Online partitions accept writes
    pub fn is_open_for_writes(&self) -> bool {
        self.info.state == PartitionState::Online
    }

    /// Some writer has begun and not ended
    pub fn has_open_writers(&self) -> bool {
        let begin = self.begin_writers.lock();
        let end = self.end_writers.lock();
        begin.iter().any(|writer| !end.contains(writer))
    }

    /// Online partitions may be backfilled
    pub fn is_eligible_to_backfill(&self) -> bool {
        self.info.state == PartitionState::Online
    }

    /// Online in memory
    pub fn can_auto_migrate(&self) -> bool {
        self.info.storage == BackingStorage::Memory && self.info.state == PartitionState::Online
    }

    /// Timestamp recorded by the last rebuild
    pub fn rebuild_timestamp(&self) -> i64 {
        self.rebuild_timestamp.load(Ordering::Relaxed)
    }

    /// Record a rebuild timestamp, shared with every state copy
    pub fn set_rebuild_timestamp(&self, timestamp: i64) {
        self.rebuild_timestamp.store(timestamp, Ordering::Relaxed);
    }

    /// Sip of the context, `Sip::INITIAL` without one
    pub fn sip(&self) -> SiftResult<Sip> {
        match &self.context {
            Some(context) => Ok(context.sip_index().get_sip()?.unwrap_or(Sip::INITIAL)),
            None => Ok(Sip::INITIAL),
        }
    }

    /// Advance the sip; false without a context or when not advancing
    pub fn set_sip(&self, sip: Sip) -> SiftResult<bool> {
        match &self.context {
            Some(context) => context.sip_index().set_sip(sip),
            None => Ok(false),
        }
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Index every record of `activities` that belongs to this partition.
    ///
    /// Consumed records are removed from `activities`; records for other
    /// partitions stay, in order. If a batch fails, that batch and every
    /// record not yet scanned are put back in their original positions. Returns the number of activities indexed,
    /// 0 when the partition is closed or has no context.
    ///
    /// # Errors
    ///
    /// - `Corruption` when the context is or becomes corrupt
    /// - `Interrupted` when `interrupt` was raised during the batch
    /// - `MergeFailed` when a merge granted by `chits` fails
    pub fn index_internal(
        &self,
        activities: &mut Vec<PartitionedActivity>,
        strategy: IndexStrategy,
        recovery: bool,
        chits: &dyn MergeChits,
        merge_executor: &dyn Executor,
        interrupt: &Interrupt,
    ) -> SiftResult<usize> {
        let context = match &self.context {
            Some(context) => Arc::clone(context),
            None => return Ok(0),
        };
        context.check_not_corrupt()?;

        let consumed = {
            let _permit = Permits::acquire(&self.semaphore, 1);
            if self.is_closed() {
                debug!(target: "sift::partition", coord = %self.coord, "closed, nothing indexed");
                return Ok(0);
            }
            match self.index_locked(&context, activities, strategy, recovery) {
                Ok(consumed) => consumed,
                Err(e) => {
                    self.check_corruption(&context, &e);
                    return Err(e);
                }
            }
        };

        if interrupt.take() {
            return Err(SiftError::Interrupted(format!(
                "interrupted while indexing {}",
                self.coord
            )));
        }

        if chits.take(&self.coord, consumed as i64) {
            self.merge(chits, merge_executor)?;
        }
        Ok(consumed)
    }

    fn index_locked(
        &self,
        context: &PartitionContext<B>,
        activities: &mut Vec<PartitionedActivity>,
        strategy: IndexStrategy,
        recovery: bool,
    ) -> SiftResult<usize> {
        let _write = context.write_lock();

        // positions restore the caller's order if a batch fails
        let mut scan = std::mem::take(activities).into_iter().enumerate();
        let mut kept: Vec<(usize, PartitionedActivity)> = Vec::new();
        let mut batch: Vec<PartitionedActivity> = Vec::new();
        let mut batch_positions: Vec<usize> = Vec::new();
        let mut batch_type: Option<ActivityType> = None;
        let mut consumed = 0;
        let mut failure = None;

        for (position, partitioned) in scan.by_ref() {
            self.stats.ingressed(strategy, 1);
            if partitioned.partition_id != self.coord.partition_id {
                kept.push((position, partitioned));
                continue;
            }
            let effective = match partitioned.activity_type {
                ActivityType::Activity if recovery => ActivityType::Repair,
                ActivityType::End => ActivityType::Begin,
                other => other,
            };
            if batch_type != Some(effective) {
                match self.consume_typed_batch(context, batch_type, &batch, strategy) {
                    Ok(count) => {
                        consumed += count;
                        batch.clear();
                        batch_positions.clear();
                    }
                    Err(e) => {
                        kept.push((position, partitioned));
                        failure = Some(e);
                        break;
                    }
                }
                batch_type = Some(effective);
            }
            batch.push(partitioned);
            batch_positions.push(position);
        }
        if failure.is_none() {
            match self.consume_typed_batch(context, batch_type, &batch, strategy) {
                Ok(count) => {
                    consumed += count;
                    batch.clear();
                    batch_positions.clear();
                }
                Err(e) => failure = Some(e),
            }
        }

        if let Some(err) = failure {
            kept.extend(batch_positions.into_iter().zip(batch));
            kept.extend(scan);
            kept.sort_by_key(|(position, _)| *position);
            *activities = kept.into_iter().map(|(_, partitioned)| partitioned).collect();
            return Err(err);
        }
        *activities = kept.into_iter().map(|(_, partitioned)| partitioned).collect();

        if consumed > 0 {
            self.index_repairs.repaired(strategy, &self.coord, consumed);
        } else {
            self.index_repairs.current(strategy, &self.coord);
        }
        self.stats.indexed(
            context.activity_index().last_id(),
            context.time_index().largest_timestamp(),
        );
        Ok(consumed)
    }

    fn consume_typed_batch(
        &self,
        context: &PartitionContext<B>,
        batch_type: Option<ActivityType>,
        batch: &[PartitionedActivity],
        strategy: IndexStrategy,
    ) -> SiftResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        match batch_type {
            Some(ActivityType::Begin) => {
                self.handle_boundary(batch);
                Ok(0)
            }
            Some(ActivityType::Activity) => self.handle_activity(context, batch),
            Some(ActivityType::Repair) => self.handle_repair(context, batch),
            Some(ActivityType::Remove) => self.handle_remove(context, batch, strategy),
            other => {
                warn!(
                    target: "sift::partition",
                    coord = %self.coord,
                    activity_type = ?other,
                    count = batch.len(),
                    "attempt to index unsupported type"
                );
                Ok(0)
            }
        }
    }

    fn handle_boundary(&self, batch: &[PartitionedActivity]) {
        let mut begin = self.begin_writers.lock();
        let mut end = self.end_writers.lock();
        for partitioned in batch {
            match partitioned.activity_type {
                ActivityType::Begin => {
                    begin.insert(partitioned.writer_id);
                }
                ActivityType::End => {
                    end.insert(partitioned.writer_id);
                }
                _ => {}
            }
        }
    }

    fn payloads(&self, batch: &[PartitionedActivity]) -> Vec<Activity> {
        batch
            .iter()
            .filter_map(|partitioned| {
                if partitioned.activity.is_none() {
                    warn!(
                        target: "sift::partition",
                        coord = %self.coord,
                        activity_type = ?partitioned.activity_type,
                        writer_id = partitioned.writer_id,
                        "record carries no activity"
                    );
                }
                partitioned.activity.clone()
            })
            .collect()
    }

    fn handle_activity(
        &self,
        context: &PartitionContext<B>,
        batch: &[PartitionedActivity],
    ) -> SiftResult<usize> {
        let time_index = context.time_index();
        let activities = self.payloads(batch);
        let times: Vec<i64> = activities.iter().map(|a| a.time).collect();
        let contains = time_index.contains(&times);

        let passed: Vec<Activity> = activities
            .into_iter()
            .zip(contains)
            .filter(|(_, known)| !known)
            .map(|(activity, _)| activity)
            .collect();
        if passed.is_empty() {
            return Ok(0);
        }

        let timestamps: Vec<i64> = passed.iter().map(|a| a.time).collect();
        let ids = time_index.next_id(&timestamps);
        let mut seen = FxHashSet::default();
        let indexables: Vec<ActivityAndId> = passed
            .into_iter()
            .zip(ids)
            .filter(|(_, id)| *id >= 0 && seen.insert(*id))
            .map(|(activity, id)| ActivityAndId::new(activity, id))
            .collect();

        let count = indexables.len();
        self.indexer.index(context, &indexables, false)?;
        Ok(count)
    }

    fn handle_repair(
        &self,
        context: &PartitionContext<B>,
        batch: &[PartitionedActivity],
    ) -> SiftResult<usize> {
        let time_index = context.time_index();
        let activities = self.payloads(batch);
        let times: Vec<i64> = activities.iter().map(|a| a.time).collect();
        let contains = time_index.contains(&times);

        // known timestamps must not allocate
        let timestamps: Vec<i64> = times
            .iter()
            .zip(&contains)
            .map(|(time, known)| if *known { NO_TIMESTAMP } else { *time })
            .collect();
        let ids = time_index.next_id(&timestamps);

        let mut indexables: Vec<ActivityAndId> = Vec::with_capacity(activities.len());
        for ((activity, id), time) in activities.into_iter().zip(ids).zip(times) {
            let id = if id == -1 {
                time_index.get_exact_id(time)
            } else {
                id
            };
            if id >= 0 {
                indexables.push(ActivityAndId::new(activity, id));
            }
        }
        indexables.sort();
        indexables.dedup_by_key(|a| a.id);

        let count = indexables.len();
        self.indexer.index(context, &indexables, true)?;
        Ok(count)
    }

    fn handle_remove(
        &self,
        context: &PartitionContext<B>,
        batch: &[PartitionedActivity],
        strategy: IndexStrategy,
    ) -> SiftResult<usize> {
        let time_index = context.time_index();
        let mut count = 0;
        for activity in self.payloads(batch) {
            debug!(
                target: "sift::partition",
                coord = %self.coord,
                time = activity.time,
                strategy = strategy.name(),
                "handling removal"
            );
            let known = time_index
                .contains(&[activity.time])
                .first()
                .copied()
                .unwrap_or(false);
            let id = if strategy != IndexStrategy::Rebuild || known {
                time_index.get_exact_id(activity.time)
            } else {
                let id = time_index
                    .next_id(&[activity.time])
                    .first()
                    .copied()
                    .unwrap_or(-1);
                if id >= 0 {
                    self.indexer
                        .set(context, &[ActivityAndId::new(activity.clone(), id)])?;
                }
                id
            };

            if id < 0 {
                warn!(
                    target: "sift::partition",
                    coord = %self.coord,
                    time = activity.time,
                    "attempted to remove an activity that does not belong to this partition"
                );
            } else {
                self.indexer.remove(context, &activity, id)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn check_corruption(&self, context: &PartitionContext<B>, err: &SiftError) {
        if err.is_corruption() {
            warn!(
                target: "sift::partition",
                coord = %self.coord,
                error = %err,
                "corruption detected"
            );
            context.mark_corrupt();
        }
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Fold every delta index of the context into its base.
    ///
    /// Runs one sub-task per delta index on `executor` under the write lock
    /// and waits for all of them. Only after every sub-task succeeded are the
    /// partition's chits refunded.
    pub fn merge(&self, chits: &dyn MergeChits, executor: &dyn Executor) -> SiftResult<()> {
        let context = match &self.context {
            Some(context) => Arc::clone(context),
            None => return Ok(()),
        };
        context.check_not_corrupt()?;

        let elapsed = {
            let _write = context.write_lock();
            let start = Instant::now();

            let tasks: Vec<NamedTask> = context
                .mergeables()
                .into_iter()
                .enumerate()
                .map(|(i, mergeable)| {
                    let context = Arc::clone(&context);
                    let task: Box<dyn FnOnce() -> SiftResult<()> + Send> =
                        Box::new(move || context.mergeables()[i].merge());
                    (mergeable.name().to_string(), task)
                })
                .collect();

            if let Err(e) = fan_out(executor, tasks) {
                self.check_corruption(&context, &e);
                return Err(e);
            }

            let elapsed = start.elapsed().as_millis() as u64;
            chits.refund_all(&self.coord);
            self.last_merge_timestamp
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
            self.stats.merged();
            elapsed
        };

        info!(
            target: "sift::merge",
            coord = %self.coord,
            elapsed_ms = elapsed,
            power = 64 - elapsed.leading_zeros(),
            "merged partition"
        );
        Ok(())
    }

    /// Give back this partition's chits without merging
    pub fn refund_chits(&self, chits: &dyn MergeChits) {
        chits.refund_all(&self.coord);
    }

    // ========================================================================
    // Handles and close
    // ========================================================================

    /// Drain every permit, mark closed and hand the context back for disposal
    pub fn close(&self) -> Option<Arc<PartitionContext<B>>> {
        let _permits = Permits::acquire(&self.semaphore, self.semaphore.permits());
        self.close_immediate()
    }

    fn close_immediate(&self) -> Option<Arc<PartitionContext<B>>> {
        self.closed.store(true, Ordering::Release);
        info!(target: "sift::partition", coord = %self.coord, "partition closed");
        self.context.clone()
    }

    /// Admit one reader.
    ///
    /// # Errors
    ///
    /// `Unavailable` once the partition is closed.
    pub fn get_request_handle(&self) -> SiftResult<RequestHandle<B>> {
        debug!(target: "sift::partition", coord = %self.coord, "request handle requested");
        self.semaphore.acquire(1);
        if self.is_closed() {
            self.semaphore.release(1);
            return Err(SiftError::unavailable("partition is closed"));
        }
        Ok(RequestHandle {
            semaphore: Arc::clone(&self.semaphore),
            bitmaps: Arc::clone(&self.bitmaps),
            coord: self.coord.clone(),
            info: self.info,
            context: self.context.clone(),
        })
    }

    /// Take every permit, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the permits could not be drained in time or the
    /// partition is closed.
    pub fn get_migration_handle(&self, timeout: Duration) -> SiftResult<MigrationHandle<'_, B>> {
        let permits = self.semaphore.permits();
        if !self.semaphore.try_acquire_for(permits, timeout) {
            return Err(SiftError::unavailable(format!(
                "timed out after {:?} draining {}",
                timeout, self.coord
            )));
        }
        if self.is_closed() {
            self.semaphore.release(permits);
            return Err(SiftError::unavailable("partition is closed"));
        }
        Ok(MigrationHandle {
            accessor: self,
            permits,
        })
    }
}

impl<B: Bitmaps> fmt::Debug for PartitionAccessor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionAccessor")
            .field("coord", &self.coord)
            .field("info", &self.info)
            .field("rebuild_timestamp", &self.rebuild_timestamp())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One admitted reader; the permit is released on drop
pub struct RequestHandle<B: Bitmaps> {
    semaphore: Arc<AdmissionSemaphore>,
    bitmaps: Arc<B>,
    coord: PartitionCoord,
    info: PartitionCoordInfo,
    context: Option<Arc<PartitionContext<B>>>,
}

impl<B: Bitmaps> RequestHandle<B> {
    /// Bitmap engine
    pub fn bitmaps(&self) -> &Arc<B> {
        &self.bitmaps
    }

    /// Indexes to query.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the partition is not online or has no context,
    /// `Corruption` when the context is corrupt.
    pub fn request_context(&self) -> SiftResult<&Arc<PartitionContext<B>>> {
        if self.info.state != PartitionState::Online {
            return Err(SiftError::unavailable("partition is not online"));
        }
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| SiftError::unavailable("context not set"))?;
        context.check_not_corrupt()?;
        Ok(context)
    }

    /// Partition coordinate
    pub fn coord(&self) -> &PartitionCoord {
        &self.coord
    }

    /// Always true: the partition is hosted here
    pub fn is_local(&self) -> bool {
        true
    }

    /// Online partitions may be backfilled
    pub fn can_backfill(&self) -> bool {
        self.info.state == PartitionState::Online
    }
}

impl<B: Bitmaps> fmt::Debug for RequestHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("coord", &self.coord)
            .field("info", &self.info)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

impl<B: Bitmaps> Drop for RequestHandle<B> {
    fn drop(&mut self) {
        self.semaphore.release(1);
    }
}

/// Exclusive hold on a partition for migration; every permit is released on drop
pub struct MigrationHandle<'a, B: Bitmaps> {
    accessor: &'a PartitionAccessor<B>,
    permits: usize,
}

impl<B: Bitmaps> MigrationHandle<'_, B> {
    /// Whether the partition may move to `destination`
    pub fn can_migrate_to(&self, destination: BackingStorage) -> bool {
        let info = self.accessor.info;
        if info.storage == BackingStorage::Disk && destination == BackingStorage::Disk {
            return false;
        }
        info.state == PartitionState::Online
    }

    /// Current context
    pub fn context(&self) -> Option<&Arc<PartitionContext<B>>> {
        self.accessor.context.as_ref()
    }

    /// Mark closed and hand the context back. Every permit is already held.
    pub fn close_context(&self) -> Option<Arc<PartitionContext<B>>> {
        self.accessor.close_immediate()
    }

    /// Merge before handing data over
    pub fn merge(&self, chits: &dyn MergeChits, executor: &dyn Executor) -> SiftResult<()> {
        self.accessor.merge(chits, executor)
    }

    /// Accessor bound to `context`, with optionally new storage and state
    pub fn migrated(
        &self,
        context: Arc<PartitionContext<B>>,
        storage: Option<BackingStorage>,
        state: Option<PartitionState>,
    ) -> PartitionAccessor<B> {
        let mut info = self.accessor.info;
        if let Some(storage) = storage {
            info = info.copy_to_storage(storage);
        }
        if let Some(state) = state {
            info = info.copy_to_state(state);
        }
        info!(
            target: "sift::partition",
            coord = %self.accessor.coord,
            from = ?self.accessor.info,
            to = ?info,
            "partition migrated"
        );
        PartitionAccessor::new(
            Arc::clone(&self.accessor.bitmaps),
            self.accessor.coord.clone(),
            info,
            Some(context),
            Arc::clone(&self.accessor.index_repairs),
            Arc::clone(&self.accessor.stats),
            self.permits,
        )
    }
}

impl<B: Bitmaps> fmt::Debug for MigrationHandle<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationHandle")
            .field("coord", &self.accessor.coord)
            .field("permits", &self.permits)
            .finish()
    }
}

impl<B: Bitmaps> Drop for MigrationHandle<'_, B> {
    fn drop(&mut self) {
        self.accessor.semaphore.release(self.permits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextAllocator, InMemoryContextAllocator};
    use sift_concurrency::{InlineExecutor, OrderedMergeChits};
    use sift_core::{FieldDefinition, HostName, PartitionId, Schema, TenantId};
    use sift_storage::RoaringBitmaps;

    fn coord() -> PartitionCoord {
        PartitionCoord::new(TenantId::new("t"), PartitionId::of(1), HostName::new("h"))
    }

    fn accessor(state: PartitionState) -> PartitionAccessor<RoaringBitmaps> {
        let bitmaps = Arc::new(RoaringBitmaps::new());
        let schema = Arc::new(Schema::new("s", vec![FieldDefinition::new(0, "tag")]));
        let context = InMemoryContextAllocator::new(8)
            .allocate(Arc::clone(&bitmaps), &coord(), schema)
            .unwrap();
        PartitionAccessor::new(
            bitmaps,
            coord(),
            PartitionCoordInfo::new(state, BackingStorage::Memory),
            Some(context),
            Arc::new(IndexRepairs::new()),
            Arc::new(PartitionStats::new()),
            4,
        )
    }

    fn boundary(activity_type: ActivityType, writer: i32) -> PartitionedActivity {
        PartitionedActivity::boundary(activity_type, PartitionId::of(1), writer)
    }

    #[test]
    fn test_open_writers() {
        let accessor = accessor(PartitionState::Online);
        let chits = OrderedMergeChits::with_budget("test", 1_000, -1);
        assert!(!accessor.has_open_writers());

        let mut batch = vec![boundary(ActivityType::Begin, 1), boundary(ActivityType::Begin, 2)];
        accessor
            .index_internal(&mut batch, IndexStrategy::Ingress, false, &chits, &InlineExecutor, &Interrupt::new())
            .unwrap();
        assert!(accessor.has_open_writers());

        let mut batch = vec![boundary(ActivityType::End, 1), boundary(ActivityType::End, 2)];
        accessor
            .index_internal(&mut batch, IndexStrategy::Ingress, false, &chits, &InlineExecutor, &Interrupt::new())
            .unwrap();
        assert!(!accessor.has_open_writers());
    }

    #[test]
    fn test_probes_follow_info() {
        let online = accessor(PartitionState::Online);
        assert!(online.is_open_for_writes());
        assert!(online.can_auto_migrate());
        assert!(!online.can_hot_deploy());

        let bootstrap = online.copy_to_state(PartitionState::Bootstrap);
        assert!(!bootstrap.is_open_for_writes());
        assert!(!bootstrap.is_eligible_to_backfill());
        assert_eq!(online.info().state, PartitionState::Online);
    }

    #[test]
    fn test_state_copy_shares_rebuild_timestamp_and_closed() {
        let online = accessor(PartitionState::Online);
        let offline = online.copy_to_state(PartitionState::Offline);
        online.set_rebuild_timestamp(42);
        assert_eq!(offline.rebuild_timestamp(), 42);
        assert!(offline.close().is_some());
        assert!(online.is_closed());
        assert!(online.get_request_handle().is_err());
    }

    #[test]
    fn test_request_context_requires_online() {
        let bootstrap = accessor(PartitionState::Bootstrap);
        let handle = bootstrap.get_request_handle().unwrap();
        assert!(handle.request_context().unwrap_err().is_unavailable());
        assert!(handle.is_local());
        assert!(!handle.can_backfill());
    }

    #[test]
    fn test_interrupt_is_reported_and_cleared() {
        let accessor = accessor(PartitionState::Online);
        let chits = OrderedMergeChits::with_budget("test", 1_000, -1);
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        let mut batch = vec![boundary(ActivityType::Begin, 1)];
        let err = accessor
            .index_internal(&mut batch, IndexStrategy::Ingress, false, &chits, &InlineExecutor, &interrupt)
            .unwrap_err();
        assert!(err.is_interrupted());
        assert!(!interrupt.is_interrupted());
    }

    #[test]
    fn test_sip_passthrough() {
        let accessor = accessor(PartitionState::Online);
        assert_eq!(accessor.sip().unwrap(), Sip::INITIAL);
        assert!(accessor.set_sip(Sip::new(5, 6)).unwrap());
        assert_eq!(accessor.sip().unwrap(), Sip::new(5, 6));
    }

    #[test]
    fn test_handles_render_for_diagnostics() {
        let accessor = accessor(PartitionState::Online);
        let reader = accessor.get_request_handle().unwrap();
        assert!(format!("{:?}", reader).starts_with("RequestHandle"));
        let context = format!("{:?}", reader.request_context().unwrap());
        assert!(context.contains("corrupt: false"));
        drop(reader);

        let handle = accessor.get_migration_handle(Duration::from_millis(20)).unwrap();
        assert!(format!("{:?}", handle).contains("permits: 4"));
    }

    #[test]
    fn test_migration_handle_times_out_while_reader_active() {
        let accessor = accessor(PartitionState::Online);
        let reader = accessor.get_request_handle().unwrap();
        let err = accessor
            .get_migration_handle(Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_unavailable());
        drop(reader);
        let handle = accessor.get_migration_handle(Duration::from_millis(20)).unwrap();
        assert!(handle.can_migrate_to(BackingStorage::Disk));
    }
}
