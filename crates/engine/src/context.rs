//! Partition context: the live indexes of one partition
//!
//! A context bundles every delta index of a partition with the partition's
//! write lock and its corrupt flag. Accessors share one context through an
//! `Arc` across state copies; only close or migration hands it back to the
//! caller for disposal.
//!
//! # Design Notes
//!
//! - The write lock guards indexing and merging as a whole. Reads never take it.
//! - `corrupt` is sticky: once set, every write-path entry point refuses the
//!   context.
//! - Bases are supplied by a [`ContextAllocator`]; the context never decides
//!   where data lives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use sift_concurrency::StripedLocks;
use sift_core::{BackingStorage, FieldType, PartitionCoord, Schema, SiftError, SiftResult};
use sift_index::{
    DeltaActivityIndex, DeltaAuthzIndex, DeltaFieldIndex, DeltaInboxIndex, DeltaRemovalIndex,
    DeltaSipIndex, DeltaTimeIndex, DeltaUnreadTrackingIndex, FieldIndexProvider, Mergeable,
};
use sift_storage::{Bitmaps, MemoryValueIndex, ValueIndex, VersionProvider};
use tracing::warn;

/// Number of delta indexes folded by a partition merge
pub const MERGEABLE_COUNT: usize = 9;

const BASE_COUNT: usize = 10;

/// One base store per delta index
#[derive(Clone)]
pub struct ContextBases {
    /// Timestamp to id
    pub time: Arc<dyn ValueIndex>,
    /// Activity payloads
    pub activity: Arc<dyn ValueIndex>,
    /// Primary field postings
    pub primary: Arc<dyn ValueIndex>,
    /// Cardinality ledger of tracked primary fields
    pub cardinality: Arc<dyn ValueIndex>,
    /// Latest field postings
    pub latest: Arc<dyn ValueIndex>,
    /// Authz postings
    pub authz: Arc<dyn ValueIndex>,
    /// Removed ids
    pub removal: Arc<dyn ValueIndex>,
    /// Inbox postings and last activity indexes
    pub inbox: Arc<dyn ValueIndex>,
    /// Unread postings
    pub unread: Arc<dyn ValueIndex>,
    /// Sip cursor
    pub sip: Arc<dyn ValueIndex>,
}

impl ContextBases {
    /// Fresh heap-resident bases
    pub fn in_memory() -> Self {
        fn base(name: &str) -> Arc<dyn ValueIndex> {
            Arc::new(MemoryValueIndex::new(name))
        }
        Self {
            time: base("time"),
            activity: base("activity"),
            primary: base("primary"),
            cardinality: base("cardinality"),
            latest: base("latest"),
            authz: base("authz"),
            removal: base("removal"),
            inbox: base("inbox"),
            unread: base("unread"),
            sip: base("sip"),
        }
    }

    fn all(&self) -> [&Arc<dyn ValueIndex>; BASE_COUNT] {
        [
            &self.time,
            &self.activity,
            &self.primary,
            &self.cardinality,
            &self.latest,
            &self.authz,
            &self.removal,
            &self.inbox,
            &self.unread,
            &self.sip,
        ]
    }

    /// Highest committed version across every base
    pub fn max_version(&self) -> u64 {
        self.all().iter().map(|b| b.version()).max().unwrap_or(0)
    }
}

/// The live indexes of one partition
pub struct PartitionContext<B: Bitmaps> {
    schema: Arc<Schema>,
    bitmaps: Arc<B>,
    time_index: DeltaTimeIndex,
    activity_index: DeltaActivityIndex,
    field_index_provider: FieldIndexProvider<B>,
    authz_index: DeltaAuthzIndex<B>,
    removal_index: DeltaRemovalIndex<B>,
    inbox_index: DeltaInboxIndex<B>,
    unread_tracking_index: DeltaUnreadTrackingIndex<B>,
    sip_index: DeltaSipIndex,
    stream_locks: StripedLocks,
    write_lock: Mutex<()>,
    corrupt: AtomicBool,
}

impl<B: Bitmaps> std::fmt::Debug for PartitionContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionContext")
            .field("schema", &self.schema.name)
            .field("last_id", &self.activity_index.last_id())
            .field("corrupt", &self.is_corrupt())
            .finish()
    }
}

impl<B: Bitmaps> PartitionContext<B> {
    /// Open a context over existing or fresh bases.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` when persisted time, activity or cardinality state
    /// cannot be read back.
    pub fn open(
        schema: Arc<Schema>,
        bitmaps: Arc<B>,
        bases: ContextBases,
        stripes: usize,
    ) -> SiftResult<Self> {
        let versions = Arc::new(VersionProvider::starting_after(bases.max_version()));
        let time_index = DeltaTimeIndex::open(Arc::clone(&bases.time), Arc::clone(&versions))?;
        let activity_index =
            DeltaActivityIndex::new(Arc::clone(&bases.activity), Arc::clone(&versions))?;
        let field_index_provider = FieldIndexProvider::new(
            &schema,
            Arc::clone(&bitmaps),
            Arc::clone(&bases.primary),
            Arc::clone(&bases.latest),
            Arc::clone(&bases.cardinality),
            Arc::clone(&versions),
            stripes,
        )?;
        Ok(Self {
            authz_index: DeltaAuthzIndex::new(
                Arc::clone(&bitmaps),
                Arc::clone(&bases.authz),
                Arc::clone(&versions),
                stripes,
            ),
            removal_index: DeltaRemovalIndex::new(
                Arc::clone(&bitmaps),
                Arc::clone(&bases.removal),
                Arc::clone(&versions),
            ),
            inbox_index: DeltaInboxIndex::new(
                Arc::clone(&bitmaps),
                Arc::clone(&bases.inbox),
                Arc::clone(&versions),
                stripes,
            ),
            unread_tracking_index: DeltaUnreadTrackingIndex::new(
                Arc::clone(&bitmaps),
                Arc::clone(&bases.unread),
                Arc::clone(&versions),
                stripes,
            ),
            sip_index: DeltaSipIndex::new(Arc::clone(&bases.sip), versions),
            stream_locks: StripedLocks::new(stripes),
            write_lock: Mutex::new(()),
            corrupt: AtomicBool::new(false),
            schema,
            bitmaps,
            time_index,
            activity_index,
            field_index_provider,
        })
    }

    /// Tenant schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Bitmap engine
    pub fn bitmaps(&self) -> &Arc<B> {
        &self.bitmaps
    }

    /// Timestamp to id
    pub fn time_index(&self) -> &DeltaTimeIndex {
        &self.time_index
    }

    /// Activity payloads
    pub fn activity_index(&self) -> &DeltaActivityIndex {
        &self.activity_index
    }

    /// Both field indexes
    pub fn field_index_provider(&self) -> &FieldIndexProvider<B> {
        &self.field_index_provider
    }

    /// Field index of one type
    pub fn field_index(&self, field_type: FieldType) -> &DeltaFieldIndex<B> {
        self.field_index_provider.get_field_index(field_type)
    }

    /// Authz postings
    pub fn authz_index(&self) -> &DeltaAuthzIndex<B> {
        &self.authz_index
    }

    /// Removed ids
    pub fn removal_index(&self) -> &DeltaRemovalIndex<B> {
        &self.removal_index
    }

    /// Inbox postings
    pub fn inbox_index(&self) -> &DeltaInboxIndex<B> {
        &self.inbox_index
    }

    /// Unread postings
    pub fn unread_tracking_index(&self) -> &DeltaUnreadTrackingIndex<B> {
        &self.unread_tracking_index
    }

    /// Sip cursor
    pub fn sip_index(&self) -> &DeltaSipIndex {
        &self.sip_index
    }

    /// Per-stream locks for inbox and unread updates
    pub fn stream_locks(&self) -> &StripedLocks {
        &self.stream_locks
    }

    /// Take the partition write lock
    pub fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Every delta index, in merge order
    pub fn mergeables(&self) -> [&dyn Mergeable; MERGEABLE_COUNT] {
        [
            &self.time_index,
            self.field_index(FieldType::Primary),
            self.field_index(FieldType::Latest),
            &self.authz_index,
            &self.removal_index,
            &self.inbox_index,
            &self.unread_tracking_index,
            &self.activity_index,
            &self.sip_index,
        ]
    }

    /// Flag the context corrupt. Never cleared.
    pub fn mark_corrupt(&self) {
        if !self.corrupt.swap(true, Ordering::AcqRel) {
            warn!(target: "sift::partition", "partition context marked corrupt");
        }
    }

    /// Whether corruption was ever observed
    pub fn is_corrupt(&self) -> bool {
        self.corrupt.load(Ordering::Acquire)
    }

    /// `Err(Corruption)` once the context is corrupt
    pub fn check_not_corrupt(&self) -> SiftResult<()> {
        if self.is_corrupt() {
            Err(SiftError::corruption("partition context is corrupt"))
        } else {
            Ok(())
        }
    }

    /// Bytes held by unmerged deltas
    pub fn size_in_memory(&self) -> u64 {
        self.field_index_provider.size_in_memory()
            + self.authz_index.size_in_memory()
            + self.removal_index.size_in_memory()
            + self.inbox_index.size_in_memory()
            + self.unread_tracking_index.size_in_memory()
            + self.time_index.size_in_memory()
    }
}

/// Storage-allocation collaborator: builds contexts for a coordinate
pub trait ContextAllocator<B: Bitmaps>: Send + Sync {
    /// Physical backing of the contexts this allocator builds
    fn storage(&self) -> BackingStorage;

    /// Build a context for `coord`
    fn allocate(
        &self,
        bitmaps: Arc<B>,
        coord: &PartitionCoord,
        schema: Arc<Schema>,
    ) -> SiftResult<Arc<PartitionContext<B>>>;
}

/// Allocates contexts over fresh [`MemoryValueIndex`] bases
#[derive(Debug, Clone, Copy)]
pub struct InMemoryContextAllocator {
    stripes: usize,
}

impl InMemoryContextAllocator {
    /// Allocator whose contexts use `stripes` term locks
    pub fn new(stripes: usize) -> Self {
        Self { stripes }
    }
}

impl<B: Bitmaps> ContextAllocator<B> for InMemoryContextAllocator {
    fn storage(&self) -> BackingStorage {
        BackingStorage::Memory
    }

    fn allocate(
        &self,
        bitmaps: Arc<B>,
        _coord: &PartitionCoord,
        schema: Arc<Schema>,
    ) -> SiftResult<Arc<PartitionContext<B>>> {
        Ok(Arc::new(PartitionContext::open(
            schema,
            bitmaps,
            ContextBases::in_memory(),
            self.stripes,
        )?))
    }
}
