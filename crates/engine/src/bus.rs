//! In-process event bus: durable append, then broadcast.
//!
//! `publish` is the durability gate: an event counts as published only after
//! the storage adapter accepted it, and only then is it broadcast to
//! subscribers. A storage failure therefore suppresses broadcast entirely —
//! live viewers can never see an event that a later replay would not.
//!
//! The orchestrator is the single publisher for its debate, and sequence
//! numbers are assigned under the store's global event-log lock, so every
//! subscriber observes one debate's events in publish order. Fan-out uses a
//! `tokio::sync::broadcast` channel: slow subscribers lag and lose events
//! (surfaced as `Lagged` on their receiver), they never block `publish`.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;

use ag_domain::error::Result;
use ag_domain::event::{Event, EventKind};
use ag_storage::Store;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The publish capability the orchestrator and invoker depend on.
pub trait EventSink: Send + Sync {
    /// Durably append and broadcast one event. Returns the stored event with
    /// its assigned sequence number. Never silently drops: a storage error
    /// surfaces here and nothing is broadcast.
    fn publish(&self, event: Event) -> Result<Arc<Event>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Subscription filter: by debate, by event kind set, or everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub debate_id: Option<String>,
    pub kinds: Option<HashSet<EventKind>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(debate_id) = &self.debate_id {
            if event.debate_id.as_deref() != Some(debate_id.as_str()) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventBus {
    store: Arc<dyn Store>,
    tx: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub fn new(store: Arc<dyn Store>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(16));
        Self { store, tx }
    }

    /// Subscribe to live events. The receiver sees everything published
    /// after this call; apply an [`EventFilter`] on the consumer side.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }

    /// Read back durable events matching `filter` after the given cursor,
    /// oldest first, so reconnecting subscribers can resume.
    pub fn replay(
        &self,
        filter: &EventFilter,
        after_seq: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let events =
            self.store
                .read_events(filter.debate_id.as_deref(), after_seq, limit)?;
        Ok(events.into_iter().filter(|e| filter.matches(e)).collect())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: Event) -> Result<Arc<Event>> {
        // Append-then-broadcast. The append assigns the sequence number.
        let stored = Arc::new(self.store.append_event(event)?);
        // No receivers is fine; fan-out loss is the subscriber's concern.
        let _ = self.tx.send(stored.clone());
        Ok(stored)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingStore;
    use ag_domain::config::StorageConfig;
    use ag_domain::event::EventPayload;
    use ag_storage::JsonlStore;

    fn bus(dir: &std::path::Path) -> EventBus {
        let store = Arc::new(
            JsonlStore::open(&StorageConfig {
                data_dir: dir.to_path_buf(),
                max_in_memory: 100,
                max_read_limit: 50,
            })
            .unwrap(),
        );
        EventBus::new(store, 64)
    }

    fn delta(debate_id: &str, text: &str) -> Event {
        Event::new(EventPayload::TokenDelta { text: text.into() }).for_debate(debate_id)
    }

    #[tokio::test]
    async fn publish_assigns_seq_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let mut rx = bus.subscribe();

        let stored = bus.publish(delta("d1", "hello")).unwrap();
        assert!(stored.seq > 0);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, stored.seq);
    }

    #[tokio::test]
    async fn per_debate_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let mut rx = bus.subscribe();

        for i in 0..20 {
            bus.publish(delta("d1", &format!("t{i}"))).unwrap();
        }

        let mut last_seq = 0;
        for _ in 0..20 {
            let e = rx.recv().await.unwrap();
            assert!(e.seq > last_seq);
            last_seq = e.seq;
        }
    }

    #[tokio::test]
    async fn storage_failure_suppresses_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FailingStore::wrapping(dir.path()));
        let bus = EventBus::new(store.clone(), 64);
        let mut rx = bus.subscribe();

        store.fail_event_appends(true);
        assert!(bus.publish(delta("d1", "lost")).is_err());

        store.fail_event_appends(false);
        let stored = bus.publish(delta("d1", "kept")).unwrap();

        // The only broadcast event is the durable one.
        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, stored.seq);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replay_respects_filter_and_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());

        bus.publish(delta("d1", "a")).unwrap();
        let mid = bus.publish(delta("d2", "b")).unwrap();
        bus.publish(delta("d1", "c")).unwrap();

        let filter = EventFilter {
            debate_id: Some("d1".into()),
            kinds: None,
        };
        let all_d1 = bus.replay(&filter, None, 100).unwrap();
        assert_eq!(all_d1.len(), 2);

        let after = bus.replay(&filter, Some(mid.seq), 100).unwrap();
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn filter_by_kind() {
        let filter = EventFilter {
            debate_id: None,
            kinds: Some([EventKind::DebateEnd].into_iter().collect()),
        };
        let e = delta("d1", "x");
        assert!(!filter.matches(&e));
        let end = Event::new(EventPayload::DebateEnd {
            outcome: ag_domain::debate::DebateOutcome::Consensus,
            rounds_used: 1,
        })
        .for_debate("d1");
        assert!(filter.matches(&end));
    }
}
