//! Change notification bus shared by every instance.
//!
//! The session store publishes each successful insert or update here; instances
//! register a [`ChangeFilter`] and receive matching events on their own
//! unbounded channel, which preserves per-subscriber ordering.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::dao::models::{Record, Table};

/// Identifier returned by [`ChangeBus::subscribe`].
pub type SubscriptionId = Uuid;

/// Kind of write that produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new row was inserted.
    Insert,
    /// An existing row was modified.
    Update,
}

/// A single change notification carrying the new row value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Write kind.
    pub kind: ChangeKind,
    /// Row value after the write.
    pub record: Record,
}

/// Selects which changes a subscriber receives.
///
/// `parent` is the owning poll for questions and participants and the owning
/// question for responses; `None` matches every row of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Table to watch.
    pub table: Table,
    /// Optional parent key restriction.
    pub parent: Option<Uuid>,
}

impl ChangeFilter {
    /// Watch every row of a table.
    pub fn table(table: Table) -> Self {
        Self {
            table,
            parent: None,
        }
    }

    /// Watch the rows of `table` owned by `parent`.
    pub fn scoped(table: Table, parent: Uuid) -> Self {
        Self {
            table,
            parent: Some(parent),
        }
    }

    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &Record) -> bool {
        if record.table() != self.table {
            return false;
        }
        match self.parent {
            Some(parent) => record.parent_id() == Some(parent),
            None => true,
        }
    }
}

struct Subscriber {
    filter: ChangeFilter,
    sink: mpsc::UnboundedSender<ChangeEvent>,
}

/// Fan-out hub for store change events.
#[derive(Clone, Default)]
pub struct ChangeBus {
    subscribers: Arc<DashMap<SubscriptionId, Subscriber>>,
}

impl ChangeBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for every future change matching `filter`.
    pub fn subscribe(
        &self,
        filter: ChangeFilter,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.subscribers.insert(id, Subscriber { filter, sink });
        debug!(subscription = %id, table = ?filter.table, parent = ?filter.parent, "bus subscription added");
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "bus subscription removed");
        }
        removed
    }

    /// Deliver a change to every matching subscriber, dropping the ones whose
    /// receiver has gone away.
    pub fn publish(&self, kind: ChangeKind, record: &Record) {
        self.subscribers.retain(|id, subscriber| {
            if !subscriber.filter.matches(record) {
                return true;
            }
            let event = ChangeEvent {
                kind,
                record: record.clone(),
            };
            if subscriber.sink.send(event).is_err() {
                trace!(subscription = %id, "dropping closed bus subscriber");
                return false;
            }
            true
        });
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{ParticipantEntity, PollEntity};

    #[test]
    fn scoped_subscribers_only_see_their_poll() {
        let bus = ChangeBus::new();
        let poll_a = PollEntity::new("AAAAAA".into(), "A".into());
        let poll_b = PollEntity::new("BBBBBB".into(), "B".into());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(ChangeFilter::scoped(Table::Participants, poll_a.id), tx);

        let other = ParticipantEntity::new(poll_b.id, "Bob".into());
        let mine = ParticipantEntity::new(poll_a.id, "Ann".into());
        bus.publish(ChangeKind::Insert, &other.into());
        bus.publish(ChangeKind::Insert, &mine.clone().into());

        let event = rx.try_recv().expect("matching event");
        assert_eq!(event.record, Record::Participant(mine));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receivers_are_pruned_on_publish() {
        let bus = ChangeBus::new();
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(ChangeFilter::table(Table::Polls), tx);
        drop(rx);

        bus.publish(
            ChangeKind::Insert,
            &PollEntity::new("ABCDEF".into(), "T".into()).into(),
        );
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = ChangeBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = bus.subscribe(ChangeFilter::table(Table::Polls), tx);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.publish(
            ChangeKind::Insert,
            &PollEntity::new("ABCDEF".into(), "T".into()).into(),
        );
        assert!(rx.try_recv().is_err());
    }
}
