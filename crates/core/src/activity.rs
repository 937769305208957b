//! Activity records consumed by the write path
//!
//! A [`PartitionedActivity`] is one entry pulled from the WAL. It is a tagged
//! union: boundary markers (`Begin`/`End`) carry only a writer id, activity
//! variants carry an [`Activity`], read-tracking variants carry a [`ReadEvent`].

use crate::types::{PartitionId, StreamId, TenantId, TermId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Kind of a partitioned WAL entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    /// A writer started writing to the partition
    Begin,
    /// A writer finished writing to the partition
    End,
    /// A new activity
    Activity,
    /// A re-delivered activity that may already be indexed
    Repair,
    /// Tombstone for an activity
    Remove,
    /// Stream read marker
    Read,
    /// Stream unread marker
    Unread,
    /// Stream read-all marker
    MarkAllRead,
}

/// A single indexed activity.
///
/// Field values are keyed by schema field id; each field may carry several terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Activity timestamp; resolved to an internal id by the time index
    pub time: i64,
    /// Writer-assigned version
    pub version: i64,
    /// Authorization tokens required to see this activity
    pub authz: Vec<String>,
    /// Terms per field id
    pub field_values: BTreeMap<u32, Vec<TermId>>,
    /// Inbox streams this activity is delivered to
    pub inbox_streams: Vec<StreamId>,
}

impl Activity {
    /// Create an activity with no fields
    pub fn new(tenant_id: TenantId, time: i64, version: i64) -> Self {
        Self {
            tenant_id,
            time,
            version,
            authz: Vec::new(),
            field_values: BTreeMap::new(),
            inbox_streams: Vec::new(),
        }
    }

    /// Builder: add terms for a field
    pub fn with_field(mut self, field_id: u32, terms: &[&str]) -> Self {
        self.field_values
            .entry(field_id)
            .or_default()
            .extend(terms.iter().map(|t| TermId::from(*t)));
        self
    }

    /// Builder: add authz tokens
    pub fn with_authz(mut self, authz: &[&str]) -> Self {
        self.authz.extend(authz.iter().map(|a| a.to_string()));
        self
    }

    /// Builder: deliver to an inbox stream
    pub fn with_inbox(mut self, stream: StreamId) -> Self {
        self.inbox_streams.push(stream);
        self
    }
}

/// A stream read/unread event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEvent {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Event time
    pub time: i64,
    /// Stream being read
    pub stream_id: StreamId,
}

/// One WAL entry routed to a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionedActivity {
    /// Entry kind
    pub activity_type: ActivityType,
    /// Destination partition
    pub partition_id: PartitionId,
    /// Writer that produced the entry
    pub writer_id: i32,
    /// Payload for activity, repair and remove entries
    pub activity: Option<Activity>,
    /// Payload for read-tracking entries
    pub read_event: Option<ReadEvent>,
}

impl PartitionedActivity {
    /// Writer boundary marker
    pub fn boundary(activity_type: ActivityType, partition_id: PartitionId, writer_id: i32) -> Self {
        debug_assert!(matches!(activity_type, ActivityType::Begin | ActivityType::End));
        Self {
            activity_type,
            partition_id,
            writer_id,
            activity: None,
            read_event: None,
        }
    }

    /// Activity-bearing entry (`Activity`, `Repair` or `Remove`)
    pub fn with_activity(
        activity_type: ActivityType,
        partition_id: PartitionId,
        writer_id: i32,
        activity: Activity,
    ) -> Self {
        Self {
            activity_type,
            partition_id,
            writer_id,
            activity: Some(activity),
            read_event: None,
        }
    }

    /// Read-tracking entry (`Read`, `Unread` or `MarkAllRead`)
    pub fn with_read_event(
        activity_type: ActivityType,
        partition_id: PartitionId,
        writer_id: i32,
        read_event: ReadEvent,
    ) -> Self {
        Self {
            activity_type,
            partition_id,
            writer_id,
            activity: None,
            read_event: Some(read_event),
        }
    }
}

/// An activity paired with its resolved internal id.
///
/// Ordered by id so repair batches can be indexed monotonically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityAndId {
    /// The activity
    pub activity: Activity,
    /// Internal id assigned by the time index
    pub id: i32,
}

impl ActivityAndId {
    /// Pair an activity with its id
    pub fn new(activity: Activity, id: i32) -> Self {
        Self { activity, id }
    }
}

impl Ord for ActivityAndId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for ActivityAndId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_builder() {
        let a = Activity::new(TenantId::new("t"), 10, 1)
            .with_field(0, &["red", "blue"])
            .with_field(0, &["green"])
            .with_authz(&["public"]);
        assert_eq!(a.field_values[&0].len(), 3);
        assert_eq!(a.authz, vec!["public".to_string()]);
    }

    #[test]
    fn test_activity_and_id_sorts_by_id() {
        let t = TenantId::new("t");
        let mut v = vec![
            ActivityAndId::new(Activity::new(t.clone(), 1, 0), 9),
            ActivityAndId::new(Activity::new(t.clone(), 2, 0), 3),
            ActivityAndId::new(Activity::new(t, 3, 0), 5),
        ];
        v.sort();
        let ids: Vec<i32> = v.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn test_activity_serde_roundtrip() {
        let a = Activity::new(TenantId::new("t"), 42, 7).with_field(3, &["x"]);
        let bytes = rmp_serde::to_vec(&a).unwrap();
        let back: Activity = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(a, back);
    }
}
