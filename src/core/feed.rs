//! Obligation change feed.
//!
//! The entity store delivers full snapshots, not diffs: every batch is
//! the complete current set of records matching a filter, so one
//! evaluation pass is a function of current state plus the fired-key
//! store. A batch arrives immediately on subscribe (deadlines that
//! passed while the user was offline) and again on every change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::model::{Obligation, ObligationId, ObligationKind, Relation, UserId};

/// One live view of an obligation collection for one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObligationFilter {
    pub user_id: UserId,
    pub kind: ObligationKind,
    pub relation: Relation,
}

impl ObligationFilter {
    pub fn matches(&self, obligation: &Obligation) -> bool {
        if obligation.kind != self.kind {
            return false;
        }
        match self.relation {
            Relation::Owner => obligation.owner_id == self.user_id,
            Relation::Responsible => obligation.responsible_id.as_ref() == Some(&self.user_id),
            Relation::Viewer => obligation.viewer_ids.contains(&self.user_id),
        }
    }
}

/// The full current set of records matching a filter, as raw store
/// records. Individual malformed records are skipped downstream.
#[derive(Clone, Debug, Default)]
pub struct ObligationBatch {
    pub records: Vec<serde_json::Value>,
}

/// A subscribable source of obligation snapshots. The receiver closing
/// means the subscription dropped; the watcher resubscribes with
/// backoff.
pub trait ObligationFeed: Send + Sync {
    fn subscribe(&self, filter: ObligationFilter) -> mpsc::Receiver<ObligationBatch>;
}

const SUBSCRIPTION_BUFFER: usize = 16;

struct Subscriber {
    filter: ObligationFilter,
    tx: mpsc::Sender<ObligationBatch>,
}

#[derive(Default)]
struct FeedInner {
    obligations: HashMap<(ObligationKind, ObligationId), Obligation>,
    subscribers: Vec<Subscriber>,
}

impl FeedInner {
    fn snapshot_for(&self, filter: &ObligationFilter) -> ObligationBatch {
        let records = self
            .obligations
            .values()
            .filter(|ob| filter.matches(ob))
            .filter_map(|ob| serde_json::to_value(ob).ok())
            .collect();
        ObligationBatch { records }
    }
}

/// In-process feed implementation backing tests and embedded use.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a record and push fresh snapshots to every
    /// subscriber whose filter matches it (before or after the change,
    /// so un-matching a filter also delivers the shrunken set).
    pub fn upsert(&self, obligation: Obligation) {
        let mut inner = self.inner.lock().unwrap();
        let key = (obligation.kind, obligation.id.clone());
        let previous = inner.obligations.insert(key, obligation.clone());

        // Collect matching snapshots first to drop dead subscribers after.
        let mut deliveries = Vec::new();
        for (index, sub) in inner.subscribers.iter().enumerate() {
            let matched_before = previous
                .as_ref()
                .map(|old| sub.filter.matches(old))
                .unwrap_or(false);
            if sub.filter.matches(&obligation) || matched_before {
                deliveries.push((index, inner.snapshot_for(&sub.filter)));
            }
        }

        let mut dead = Vec::new();
        for (index, batch) in deliveries {
            if inner.subscribers[index].tx.try_send(batch).is_err() {
                dead.push(index);
            }
        }
        for index in dead.into_iter().rev() {
            inner.subscribers.remove(index);
        }
    }

    /// Push a raw record to every subscriber, bypassing the typed map.
    /// Used to exercise the malformed-record path.
    pub fn push_raw(&self, record: serde_json::Value) {
        let inner = self.inner.lock().unwrap();
        for sub in &inner.subscribers {
            let _ = sub.tx.try_send(ObligationBatch {
                records: vec![record.clone()],
            });
        }
    }
}

impl ObligationFeed for MemoryFeed {
    fn subscribe(&self, filter: ObligationFilter) -> mpsc::Receiver<ObligationBatch> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut inner = self.inner.lock().unwrap();

        // First batch is delivered immediately.
        let _ = tx.try_send(inner.snapshot_for(&filter));

        inner.subscribers.push(Subscriber { filter, tx });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ObligationStatus;

    fn make_obligation(id: &str, owner: &str, responsible: Option<&str>) -> Obligation {
        Obligation {
            id: id.to_string(),
            owner_id: owner.to_string(),
            responsible_id: responsible.map(str::to_string),
            viewer_ids: Vec::new(),
            created_at: 1_700_000_000_000,
            due_at: None,
            status: ObligationStatus::Open,
            title: "Test".to_string(),
            kind: ObligationKind::Task,
        }
    }

    fn filter(user: &str, relation: Relation) -> ObligationFilter {
        ObligationFilter {
            user_id: user.to_string(),
            kind: ObligationKind::Task,
            relation,
        }
    }

    #[test]
    fn test_filter_matching() {
        let ob = make_obligation("t-1", "alice", Some("bob"));

        assert!(filter("alice", Relation::Owner).matches(&ob));
        assert!(!filter("bob", Relation::Owner).matches(&ob));
        assert!(filter("bob", Relation::Responsible).matches(&ob));
        assert!(!filter("alice", Relation::Viewer).matches(&ob));
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot() {
        let feed = MemoryFeed::new();
        feed.upsert(make_obligation("t-1", "alice", None));

        let mut rx = feed.subscribe(filter("alice", Relation::Owner));
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.records.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_fans_out_full_snapshot() {
        let feed = MemoryFeed::new();
        let mut rx = feed.subscribe(filter("alice", Relation::Owner));
        assert!(rx.recv().await.unwrap().records.is_empty());

        feed.upsert(make_obligation("t-1", "alice", None));
        feed.upsert(make_obligation("t-2", "alice", None));

        // Each change carries the full current set.
        assert_eq!(rx.recv().await.unwrap().records.len(), 1);
        assert_eq!(rx.recv().await.unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn test_non_matching_changes_are_not_delivered() {
        let feed = MemoryFeed::new();
        let mut rx = feed.subscribe(filter("alice", Relation::Owner));
        let _ = rx.recv().await;

        feed.upsert(make_obligation("t-9", "someone-else", None));
        assert!(rx.try_recv().is_err());
    }
}
