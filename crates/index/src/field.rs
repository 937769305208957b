//! Delta field index
//!
//! Postings per `(field_id, term)`, split into a merged base and an in-memory
//! delta, plus a [`CardinalityLedger`] for the fields that track one.
//!
//! Record keys are `field_id (u32 BE) ++ term bytes`; stripe locks are chosen
//! by the term bytes alone so the lock count stays bounded no matter how many
//! fields a schema has.
//!
//! Ledger records share the postings key layout in their own base.

use std::collections::BTreeMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use sift_core::{FieldType, Schema, SiftResult, TermId};
use sift_storage::{
    to_bit, BitmapAndLastId, Bitmaps, MemoryValueIndex, ValueIndex, VersionProvider,
};
use tracing::debug;

use crate::cardinality::{CardinalityLedger, GLOBAL_CARDINALITY_ID};
use crate::delta::DeltaPostings;
use crate::mergeable::Mergeable;

const FIELD_PREFIX_LEN: usize = 4;

fn term_part(key: &[u8]) -> &[u8] {
    &key[FIELD_PREFIX_LEN.min(key.len())..]
}

fn field_key(field_id: u32, term: &TermId) -> Vec<u8> {
    let mut key = vec![0u8; FIELD_PREFIX_LEN];
    BigEndian::write_u32(&mut key, field_id);
    key.extend_from_slice(term.as_bytes());
    key
}

fn field_prefix(field_id: u32) -> Vec<u8> {
    let mut key = vec![0u8; FIELD_PREFIX_LEN];
    BigEndian::write_u32(&mut key, field_id);
    key
}

fn bits(ids: &[i32]) -> Vec<u32> {
    ids.iter().map(|id| to_bit(*id)).collect()
}

/// Postings for every field of one [`FieldType`]
pub struct DeltaFieldIndex<B: Bitmaps> {
    field_type: FieldType,
    postings: DeltaPostings<B>,
    tracked: Vec<bool>,
    ledger: CardinalityLedger,
}

impl<B: Bitmaps> DeltaFieldIndex<B> {
    /// Create a field index. `tracked[field_id]` enables that field's ledger.
    ///
    /// The ledger starts empty over a private in-memory base; use
    /// [`with_cardinality_ledger`](Self::with_cardinality_ledger) to persist it.
    pub fn new(
        field_type: FieldType,
        bitmaps: Arc<B>,
        base: Arc<dyn ValueIndex>,
        versions: Arc<VersionProvider>,
        tracked: &[bool],
        stripes: usize,
    ) -> Self {
        let ledger = CardinalityLedger::new(
            Arc::new(MemoryValueIndex::new(format!(
                "cardinality:{}",
                field_type.name()
            ))),
            Arc::clone(&versions),
        );
        Self {
            field_type,
            postings: DeltaPostings::with_stripe_key(
                format!("field:{}", field_type.name()),
                bitmaps,
                base,
                versions,
                stripes,
                term_part,
            ),
            tracked: tracked.to_vec(),
            ledger,
        }
    }

    /// Replace the ledger, typically with one opened over a persistent base
    pub fn with_cardinality_ledger(mut self, ledger: CardinalityLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Which field type this index holds
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// True when `field_id` keeps a cardinality ledger
    pub fn has_cardinalities(&self, field_id: u32) -> bool {
        self.tracked.get(field_id as usize).copied().unwrap_or(false)
    }

    /// Add ids to a term's postings
    pub fn append(&self, field_id: u32, term: &TermId, ids: &[i32], counts: Option<&[i64]>) {
        self.set(field_id, term, ids, counts);
    }

    /// Set ids in a term's postings
    pub fn set(&self, field_id: u32, term: &TermId, ids: &[i32], counts: Option<&[i64]>) {
        let key = field_key(field_id, term);
        {
            let _stripe = self.postings.lock(&key);
            self.postings.set_locked(&key, &bits(ids));
        }
        self.merge_cardinalities(field_id, term, ids, counts);
    }

    /// Set `id` only if the term currently has no postings.
    ///
    /// Returns whether the set happened; the ledger is touched only then.
    pub fn set_if_empty(
        &self,
        field_id: u32,
        term: &TermId,
        id: i32,
        count: i64,
    ) -> SiftResult<bool> {
        let key = field_key(field_id, term);
        let applied = {
            let _stripe = self.postings.lock(&key);
            let empty = match self.postings.view(&key)? {
                Some(existing) => self.postings.bitmaps().is_empty(&existing.bitmap),
                None => true,
            };
            if empty {
                self.postings.set_locked(&key, &[to_bit(id)]);
            }
            empty
        };
        if applied {
            self.merge_cardinalities(field_id, term, &[id], Some(&[count]));
        }
        Ok(applied)
    }

    /// Clear ids from a term's postings
    pub fn remove(&self, field_id: u32, term: &TermId, ids: &[i32]) {
        let key = field_key(field_id, term);
        {
            let _stripe = self.postings.lock(&key);
            self.postings.remove_locked(&key, &bits(ids));
        }
        if self.has_cardinalities(field_id) {
            let zeros = vec![0i64; ids.len()];
            self.merge_cardinalities(field_id, term, ids, Some(&zeros));
        }
    }

    /// Handle on one term's postings
    pub fn get(&self, field_id: u32, term: &TermId) -> InvertedIndex<'_, B> {
        InvertedIndex {
            index: self,
            field_id,
            term: term.clone(),
        }
    }

    /// Handle on one term's postings, creating nothing until written
    pub fn get_or_create_inverted_index(&self, field_id: u32, term: &TermId) -> InvertedIndex<'_, B> {
        self.get(field_id, term)
    }

    /// Visible postings of several terms, positionally
    pub fn multi_get(
        &self,
        field_id: u32,
        terms: &[TermId],
    ) -> SiftResult<Vec<Option<BitmapAndLastId<B::Bitmap>>>> {
        terms
            .iter()
            .map(|term| self.postings.view(&field_key(field_id, term)))
            .collect()
    }

    /// Visible last ids of several terms, -1 where absent
    pub fn multi_get_last_ids(&self, field_id: u32, terms: &[TermId]) -> SiftResult<Vec<i32>> {
        terms
            .iter()
            .map(|term| self.postings.last_id(&field_key(field_id, term)))
            .collect()
    }

    /// Visit several terms' postings.
    ///
    /// With `consider_if_last_id_greater_than` >= 0, terms whose last id is not
    /// greater than it are skipped without decoding.
    pub fn multi_tx_index<F>(
        &self,
        field_id: u32,
        terms: &[TermId],
        consider_if_last_id_greater_than: i32,
        mut tx: F,
    ) -> SiftResult<()>
    where
        F: FnMut(usize, BitmapAndLastId<B::Bitmap>) -> SiftResult<()>,
    {
        for (i, term) in terms.iter().enumerate() {
            let key = field_key(field_id, term);
            if consider_if_last_id_greater_than >= 0
                && self.postings.last_id(&key)? <= consider_if_last_id_greater_than
            {
                continue;
            }
            if let Some(postings) = self.postings.view(&key)? {
                tx(i, postings)?;
            }
        }
        Ok(())
    }

    /// Terms of a field visible in either layer
    pub fn term_ids(&self, field_id: u32) -> SiftResult<Vec<TermId>> {
        Ok(self
            .postings
            .keys_with_prefix(&field_prefix(field_id))?
            .iter()
            .map(|key| TermId::new(term_part(key)))
            .collect())
    }

    /// Ledger count for one id; -1 without a ledger, 0 when unknown
    pub fn get_cardinality(&self, field_id: u32, term: &TermId, id: i32) -> i64 {
        if !self.has_cardinalities(field_id) {
            return -1;
        }
        self.ledger.get(&field_key(field_id, term), id)
    }

    /// Ledger counts for several ids; all -1 without a ledger
    pub fn get_cardinalities(&self, field_id: u32, term: &TermId, ids: &[i32]) -> Vec<i64> {
        if !self.has_cardinalities(field_id) {
            return vec![-1; ids.len()];
        }
        self.ledger.get_many(&field_key(field_id, term), ids)
    }

    /// Ledger count across all ids
    pub fn get_global_cardinality(&self, field_id: u32, term: &TermId) -> i64 {
        self.get_cardinality(field_id, term, GLOBAL_CARDINALITY_ID)
    }

    /// Overwrite per-id counts and move the global count by the difference.
    ///
    /// No-op without a ledger or without counts.
    pub fn merge_cardinalities(
        &self,
        field_id: u32,
        term: &TermId,
        ids: &[i32],
        counts: Option<&[i64]>,
    ) {
        if let (true, Some(counts)) = (self.has_cardinalities(field_id), counts) {
            self.ledger.overwrite(&field_key(field_id, term), ids, counts);
        }
    }

    /// Fold caller-computed postings for several terms of one field.
    ///
    /// Every term is staged before anything is written; all results are
    /// committed together under one new version.
    pub fn multi_merge<F>(&self, field_id: u32, terms: &[TermId], merger: F) -> SiftResult<usize>
    where
        F: FnMut(usize, Option<BitmapAndLastId<B::Bitmap>>) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>>,
    {
        let keys: Vec<Vec<u8>> = terms.iter().map(|t| field_key(field_id, t)).collect();
        self.postings.multi_merge(&keys, merger)
    }

    /// Bytes held by unmerged deltas
    pub fn size_in_memory(&self) -> u64 {
        self.postings.size_in_memory()
    }

    /// Terms with unmerged deltas, across all fields
    pub fn delta_count(&self) -> usize {
        self.postings.delta_count()
    }

    /// Ledger terms written since the last merge
    pub fn unmerged_cardinalities(&self) -> usize {
        self.ledger.dirty_count()
    }
}

impl<B: Bitmaps> Mergeable for DeltaFieldIndex<B> {
    fn name(&self) -> &str {
        self.postings.name()
    }

    fn merge(&self) -> SiftResult<()> {
        let mut by_field: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();
        for key in self.postings.delta_keys() {
            let prefix = key[..FIELD_PREFIX_LEN.min(key.len())].to_vec();
            by_field.entry(prefix).or_default().push(key);
        }
        for (prefix, keys) in by_field {
            let written = self.postings.merge_keys(&keys)?;
            debug!(
                target: "sift::index",
                index = %self.postings.name(),
                field = BigEndian::read_u32(&prefix),
                terms = keys.len(),
                written,
                "merged field"
            );
        }
        self.ledger.merge()?;
        Ok(())
    }
}

/// Handle on one term's postings, reading through the delta
pub struct InvertedIndex<'a, B: Bitmaps> {
    index: &'a DeltaFieldIndex<B>,
    field_id: u32,
    term: TermId,
}

impl<'a, B: Bitmaps> InvertedIndex<'a, B> {
    fn key(&self) -> Vec<u8> {
        field_key(self.field_id, &self.term)
    }

    /// Visible postings (base overlaid with delta)
    pub fn get_index(&self) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        self.index.postings.view(&self.key())
    }

    /// Merged postings only
    pub fn get_base(&self) -> SiftResult<Option<BitmapAndLastId<B::Bitmap>>> {
        self.index.postings.base_view(&self.key())
    }

    /// Visible last id, -1 if the term has none
    pub fn last_id(&self) -> SiftResult<i32> {
        self.index.postings.last_id(&self.key())
    }

    /// Whether `id` is currently visible in the postings
    pub fn contains(&self, id: i32) -> SiftResult<bool> {
        Ok(match self.get_index()? {
            Some(postings) => self.index.postings.bitmaps().is_set(&postings.bitmap, to_bit(id)),
            None => false,
        })
    }

    /// Add ids without touching the ledger
    pub fn append(&self, ids: &[i32]) {
        self.index.set(self.field_id, &self.term, ids, None);
    }

    /// Clear ids without touching the ledger
    pub fn remove(&self, ids: &[i32]) {
        let key = self.key();
        let _stripe = self.index.postings.lock(&key);
        self.index.postings.remove_locked(&key, &bits(ids));
    }
}

/// One [`DeltaFieldIndex`] per [`FieldType`]
pub struct FieldIndexProvider<B: Bitmaps> {
    primary: DeltaFieldIndex<B>,
    latest: DeltaFieldIndex<B>,
}

impl<B: Bitmaps> FieldIndexProvider<B> {
    /// Build both field indexes for a schema.
    ///
    /// Only the primary index keeps cardinality ledgers; they are loaded from
    /// `cardinality_base`.
    ///
    /// # Errors
    ///
    /// `Corruption` when a persisted ledger record cannot be read back.
    pub fn new(
        schema: &Schema,
        bitmaps: Arc<B>,
        primary_base: Arc<dyn ValueIndex>,
        latest_base: Arc<dyn ValueIndex>,
        cardinality_base: Arc<dyn ValueIndex>,
        versions: Arc<VersionProvider>,
        stripes: usize,
    ) -> SiftResult<Self> {
        let tracked: Vec<bool> = schema.fields.iter().map(|f| f.track_cardinality).collect();
        let untracked = vec![false; tracked.len()];
        let ledger = CardinalityLedger::open(cardinality_base, Arc::clone(&versions))?;
        Ok(Self {
            primary: DeltaFieldIndex::new(
                FieldType::Primary,
                Arc::clone(&bitmaps),
                primary_base,
                Arc::clone(&versions),
                &tracked,
                stripes,
            )
            .with_cardinality_ledger(ledger),
            latest: DeltaFieldIndex::new(
                FieldType::Latest,
                bitmaps,
                latest_base,
                versions,
                &untracked,
                stripes,
            ),
        })
    }

    /// Field index for a type
    pub fn get_field_index(&self, field_type: FieldType) -> &DeltaFieldIndex<B> {
        match field_type {
            FieldType::Primary => &self.primary,
            FieldType::Latest => &self.latest,
        }
    }

    /// Bytes held by unmerged deltas of every field type
    pub fn size_in_memory(&self) -> u64 {
        FieldType::ALL
            .iter()
            .map(|t| self.get_field_index(*t).size_in_memory())
            .sum()
    }
}
