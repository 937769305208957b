//! Indexer: applies resolved activities to a partition context
//!
//! The accessor resolves ids through the time index; everything here works
//! on `(activity, id)` pairs and is called with the partition write lock held.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use sift_core::{Activity, ActivityAndId, FieldType, SiftResult, StreamId, TermId};
use sift_storage::Bitmaps;
use tracing::trace;

use crate::context::PartitionContext;

/// `(field_id, term) -> [(id, occurrences)]`, in id order per term
type TermPostings = BTreeMap<(u32, TermId), Vec<(i32, i64)>>;

fn collect_terms(activities: &[ActivityAndId]) -> TermPostings {
    let mut postings = TermPostings::new();
    for ActivityAndId { activity, id } in activities {
        for (field_id, terms) in &activity.field_values {
            let mut occurrences: FxHashMap<&TermId, i64> = FxHashMap::default();
            for term in terms {
                *occurrences.entry(term).or_insert(0) += 1;
            }
            for (term, count) in occurrences {
                postings
                    .entry((*field_id, term.clone()))
                    .or_default()
                    .push((*id, count));
            }
        }
    }
    postings
}

/// Writes activities into every index of a context
pub struct Indexer<B: Bitmaps> {
    _bitmaps: PhantomData<fn() -> B>,
}

impl<B: Bitmaps> Default for Indexer<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Bitmaps> Indexer<B> {
    /// Create an indexer
    pub fn new() -> Self {
        Self {
            _bitmaps: PhantomData,
        }
    }

    /// Index new or repaired activities.
    ///
    /// `activities` must be sorted by id when `repair` is set. Repairs write
    /// primary postings with `set` since the ids may already be present.
    pub fn index(
        &self,
        context: &PartitionContext<B>,
        activities: &[ActivityAndId],
        repair: bool,
    ) -> SiftResult<()> {
        if activities.is_empty() {
            return Ok(());
        }
        context.activity_index().set(
            activities
                .iter()
                .map(|a| (a.id, a.activity.clone()))
                .collect(),
        );

        let postings = collect_terms(activities);
        self.index_primary(context, &postings, repair);
        self.index_latest(context, &postings)?;

        for ActivityAndId { activity, id } in activities {
            for authz in &activity.authz {
                context.authz_index().append(authz, &[*id]);
            }
            for stream in &activity.inbox_streams {
                self.deliver(context, stream, *id);
            }
        }
        trace!(target: "sift::partition", count = activities.len(), repair, "indexed activities");
        Ok(())
    }

    /// Write activities so their rows exist, without latest or inbox delivery.
    ///
    /// Used to place a tombstone for an activity never indexed before.
    pub fn set(&self, context: &PartitionContext<B>, activities: &[ActivityAndId]) -> SiftResult<()> {
        if activities.is_empty() {
            return Ok(());
        }
        context.activity_index().set(
            activities
                .iter()
                .map(|a| (a.id, a.activity.clone()))
                .collect(),
        );
        self.index_primary(context, &collect_terms(activities), true);
        for ActivityAndId { activity, id } in activities {
            for authz in &activity.authz {
                context.authz_index().append(authz, &[*id]);
            }
        }
        Ok(())
    }

    /// Tombstone `id` and clear it from every posting the activity names
    pub fn remove(&self, context: &PartitionContext<B>, activity: &Activity, id: i32) -> SiftResult<()> {
        context.removal_index().set(&[id]);
        let primary = context.field_index(FieldType::Primary);
        let latest = context.field_index(FieldType::Latest);
        for (field_id, terms) in &activity.field_values {
            let index_latest = context
                .schema()
                .field(*field_id)
                .map_or(false, |f| f.index_latest);
            for term in terms {
                primary.remove(*field_id, term, &[id]);
                if index_latest {
                    latest.remove(*field_id, term, &[id]);
                }
            }
        }
        for authz in &activity.authz {
            context.authz_index().remove(authz, &[id]);
        }
        trace!(target: "sift::partition", id, "removed activity");
        Ok(())
    }

    fn index_primary(&self, context: &PartitionContext<B>, postings: &TermPostings, repair: bool) {
        let primary = context.field_index(FieldType::Primary);
        for ((field_id, term), ids_and_counts) in postings {
            let (ids, counts): (Vec<i32>, Vec<i64>) = ids_and_counts.iter().copied().unzip();
            let counts = primary.has_cardinalities(*field_id).then_some(counts.as_slice());
            if repair {
                primary.set(*field_id, term, &ids, counts);
            } else {
                primary.append(*field_id, term, &ids, counts);
            }
        }
    }

    /// Keep only the newest id per term in the latest index
    fn index_latest(&self, context: &PartitionContext<B>, postings: &TermPostings) -> SiftResult<()> {
        let latest = context.field_index(FieldType::Latest);
        let bitmaps = context.bitmaps();
        for ((field_id, term), ids_and_counts) in postings {
            let index_latest = context
                .schema()
                .field(*field_id)
                .map_or(false, |f| f.index_latest);
            if !index_latest {
                continue;
            }
            let newest = match ids_and_counts.iter().map(|(id, _)| *id).max() {
                Some(id) => id,
                None => continue,
            };
            let inverted = latest.get(*field_id, term);
            if let Some(existing) = inverted.get_index()? {
                if existing.last_id > newest {
                    continue;
                }
                let stale: Vec<i32> = bitmaps
                    .int_iter(&existing.bitmap)
                    .map(|bit| bit as i32)
                    .filter(|id| *id != newest)
                    .collect();
                if !stale.is_empty() {
                    latest.remove(*field_id, term, &stale);
                }
            }
            latest.set(*field_id, term, &[newest], None);
        }
        Ok(())
    }

    fn deliver(&self, context: &PartitionContext<B>, stream: &StreamId, id: i32) {
        let _stream = context.stream_locks().lock(stream.as_bytes());
        context.inbox_index().append(stream, &[id]);
        context.unread_tracking_index().append(stream, &[id]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextBases, PartitionContext};
    use sift_core::{FieldDefinition, Schema, TenantId};
    use sift_storage::RoaringBitmaps;
    use std::sync::Arc;

    fn context() -> PartitionContext<RoaringBitmaps> {
        let schema = Schema::new(
            "s",
            vec![
                FieldDefinition::new(0, "author").with_cardinality().with_latest(),
                FieldDefinition::new(1, "tag"),
            ],
        );
        PartitionContext::open(
            Arc::new(schema),
            Arc::new(RoaringBitmaps::new()),
            ContextBases::in_memory(),
            8,
        )
        .unwrap()
    }

    type Postings = sift_storage::BitmapAndLastId<<RoaringBitmaps as Bitmaps>::Bitmap>;

    fn ids(bits: Option<Postings>) -> Vec<u32> {
        bits.map(|b| b.bitmap.iter().collect()).unwrap_or_default()
    }

    fn activity(time: i64, author: &str) -> Activity {
        Activity::new(TenantId::new("t"), time, 1)
            .with_field(0, &[author])
            .with_field(1, &["x", "x", "y"])
            .with_authz(&["public"])
    }

    #[test]
    fn test_index_populates_every_index() {
        let ctx = context();
        let indexer = Indexer::new();
        let stream = StreamId::new("inbox");
        let batch = vec![
            ActivityAndId::new(activity(10, "bob").with_inbox(stream.clone()), 0),
            ActivityAndId::new(activity(20, "bob"), 1),
        ];
        indexer.index(&ctx, &batch, false).unwrap();

        let primary = ctx.field_index(FieldType::Primary);
        assert_eq!(ids(primary.get(0, &TermId::from("bob")).get_index().unwrap()), vec![0, 1]);
        assert_eq!(ids(primary.get(1, &TermId::from("x")).get_index().unwrap()), vec![0, 1]);
        assert_eq!(primary.get_global_cardinality(0, &TermId::from("bob")), 2);
        // tag does not track cardinality
        assert_eq!(primary.get_cardinality(1, &TermId::from("x"), 0), -1);

        let latest = ctx.field_index(FieldType::Latest);
        assert_eq!(ids(latest.get(0, &TermId::from("bob")).get_index().unwrap()), vec![1]);
        assert!(latest.get(1, &TermId::from("x")).get_index().unwrap().is_none());

        assert_eq!(ids(ctx.authz_index().get_authz("public").unwrap()), vec![0, 1]);
        assert_eq!(ids(ctx.inbox_index().get_inbox(&stream).unwrap()), vec![0]);
        assert_eq!(ids(ctx.unread_tracking_index().get_unread(&stream).unwrap()), vec![0]);
        assert_eq!(ctx.activity_index().get(1).unwrap().unwrap().time, 20);
    }

    #[test]
    fn test_latest_moves_forward_only() {
        let ctx = context();
        let indexer = Indexer::new();
        indexer
            .index(&ctx, &[ActivityAndId::new(activity(10, "amy"), 4)], false)
            .unwrap();
        indexer
            .index(&ctx, &[ActivityAndId::new(activity(5, "amy"), 2)], true)
            .unwrap();
        let latest = ctx.field_index(FieldType::Latest);
        assert_eq!(ids(latest.get(0, &TermId::from("amy")).get_index().unwrap()), vec![4]);
        indexer
            .index(&ctx, &[ActivityAndId::new(activity(30, "amy"), 7)], false)
            .unwrap();
        assert_eq!(ids(latest.get(0, &TermId::from("amy")).get_index().unwrap()), vec![7]);
    }

    #[test]
    fn test_repair_does_not_double_count() {
        let ctx = context();
        let indexer = Indexer::new();
        let batch = vec![ActivityAndId::new(activity(10, "bob"), 0)];
        indexer.index(&ctx, &batch, false).unwrap();
        indexer.index(&ctx, &batch, true).unwrap();
        let primary = ctx.field_index(FieldType::Primary);
        assert_eq!(primary.get_global_cardinality(0, &TermId::from("bob")), 1);
    }

    #[test]
    fn test_set_then_remove_leaves_tombstone() {
        let ctx = context();
        let indexer = Indexer::new();
        let a = activity(10, "eve");
        indexer.set(&ctx, &[ActivityAndId::new(a.clone(), 3)]).unwrap();
        indexer.remove(&ctx, &a, 3).unwrap();

        assert!(ctx.removal_index().is_removed(3).unwrap());
        let primary = ctx.field_index(FieldType::Primary);
        assert!(!primary.get(0, &TermId::from("eve")).contains(3).unwrap());
        assert_eq!(primary.get_global_cardinality(0, &TermId::from("eve")), 0);
        assert!(ids(ctx.authz_index().get_authz("public").unwrap()).is_empty());
    }
}
