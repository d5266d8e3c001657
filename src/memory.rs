//! In-process transport holding tables in memory.
//!
//! Evaluates snapshot queries against its own rows and broadcasts every
//! write to the table's subscribers, unfiltered. Supports fault injection so
//! live queries can be driven through their failure paths.

use crate::error::{FetchError, SubscriptionError};
use crate::feed::{FeedMessage, FeedSink, SubscriptionId};
use crate::transport::Transport;
use crate::types::{ChangeEvent, Identity, QuerySpec, Record, SubscriptionState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Internal subscription state.
struct Subscriber {
    table: String,
    sink: FeedSink,
}

impl Subscriber {
    fn try_send(&self, message: &FeedMessage) -> bool {
        match message {
            FeedMessage::Event(event) => self.sink.event(event.clone()),
            FeedMessage::State(state) => self.sink.state(*state),
        }
    }
}

#[derive(Default)]
struct Faults {
    next_query_error: Option<String>,
    next_subscribe_refusal: Option<String>,
    query_latency: Option<Duration>,
}

/// Tables plus their change feeds, all in memory.
pub struct MemoryTransport {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscriber>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    unsubscribe_calls: AtomicU64,
    query_calls: AtomicU64,
    faults: Mutex<Faults>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            unsubscribe_calls: AtomicU64::new(0),
            query_calls: AtomicU64::new(0),
            faults: Mutex::new(Faults::default()),
        }
    }

    // --- Table contents ---

    /// Replace a table's rows without notifying subscribers.
    pub fn seed(&self, table: &str, records: Vec<Record>) {
        self.tables.write().insert(table.to_string(), records);
    }

    /// Current rows of `table`, in storage order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Store a row (replacing one with the same id) and broadcast an insert.
    pub fn insert(&self, table: &str, record: Record) {
        self.store(table, record.clone());
        self.emit(table, ChangeEvent::Insert { record });
    }

    /// Store a row and broadcast an update.
    pub fn update(&self, table: &str, record: Record) {
        self.store(table, record.clone());
        self.emit(table, ChangeEvent::Update { record });
    }

    /// Remove a row and broadcast a delete.
    pub fn delete(&self, table: &str, id: Identity) {
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.retain(|r| r.id != id);
        }
        self.emit(table, ChangeEvent::Delete { id });
    }

    fn store(&self, table: &str, record: Record) {
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();
        match rows.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
    }

    // --- Broadcasting ---

    /// Broadcast an event to `table` subscribers without touching stored rows.
    pub fn emit(&self, table: &str, event: ChangeEvent) {
        self.broadcast(table, FeedMessage::Event(event));
    }

    /// Push a state transition to every `table` subscriber. Terminal states
    /// end the subscriptions on this side.
    pub fn push_state(&self, table: &str, state: SubscriptionState) {
        self.broadcast(table, FeedMessage::State(state));

        let terminal = matches!(
            state,
            SubscriptionState::Errored | SubscriptionState::TimedOut | SubscriptionState::Closed
        );
        if terminal {
            self.subscriptions.write().retain(|_, sub| sub.table != table);
        }
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast(&self, table: &str, message: FeedMessage) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.table == table && !sub.try_send(&message) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    if !sub.sink.is_cancelled() {
                        warn!(?id, table, "dropping subscriber that stopped receiving");
                    }
                }
            }
        }
    }

    // --- Fault injection ---

    /// Make the next snapshot query fail with `message`.
    pub fn fail_next_query(&self, message: impl Into<String>) {
        self.faults.lock().next_query_error = Some(message.into());
    }

    /// Make the next subscribe call fail with `reason`.
    pub fn refuse_next_subscribe(&self, reason: impl Into<String>) {
        self.faults.lock().next_subscribe_refusal = Some(reason.into());
    }

    /// Delay every snapshot query by `latency`.
    pub fn set_query_latency(&self, latency: Option<Duration>) {
        self.faults.lock().query_latency = latency;
    }

    // --- Introspection ---

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of `unsubscribe` calls received, including repeats.
    pub fn unsubscribe_count(&self) -> u64 {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of snapshot queries received.
    pub fn query_count(&self) -> u64 {
        self.query_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn query(&self, spec: &QuerySpec) -> Result<Vec<Record>, FetchError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);

        let (error, latency) = {
            let mut faults = self.faults.lock();
            (faults.next_query_error.take(), faults.query_latency)
        };
        if let Some(latency) = latency {
            thread::sleep(latency);
        }
        if let Some(message) = error {
            return Err(FetchError::new(&spec.table, message));
        }

        let tables = self.tables.read();
        let rows = tables.get(&spec.table).ok_or_else(|| {
            FetchError::new(&spec.table, format!("relation \"{}\" does not exist", spec.table))
        })?;

        let mut matched: Vec<&Record> = rows.iter().filter(|r| spec.filter.matches(r)).collect();
        if let Some(order) = &spec.order {
            matched.sort_by(|a, b| order.compare(a, b));
        }
        if let Some(limit) = spec.limit {
            matched.truncate(limit);
        }

        Ok(matched.into_iter().map(|r| spec.projection.apply(r)).collect())
    }

    fn subscribe(&self, table: &str, sink: FeedSink) -> Result<SubscriptionId, SubscriptionError> {
        if let Some(reason) = self.faults.lock().next_subscribe_refusal.take() {
            return Err(SubscriptionError::Refused {
                table: table.to_string(),
                reason,
            });
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        sink.state(SubscriptionState::Connecting);
        sink.state(SubscriptionState::Subscribed);

        self.subscriptions.write().insert(
            id,
            Subscriber {
                table: table.to_string(),
                sink,
            },
        );
        debug!(?id, table, "memory subscription opened");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.write().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{inbox, FeedSubscription};
    use crate::types::{OrderSpec, Predicate};
    use serde_json::json;
    use std::sync::Arc;

    fn todos() -> Vec<Record> {
        vec![
            Record::new(1).with("title", "b").with("done", false).with("rank", 2),
            Record::new(2).with("title", "a").with("done", true).with("rank", 3),
            Record::new(3).with("title", "c").with("done", false).with("rank", 1),
        ]
    }

    #[test]
    fn test_query_filters_orders_limits_projects() {
        let transport = MemoryTransport::new();
        transport.seed("todos", todos());

        let spec = QuerySpec::table("todos")
            .select(["title"])
            .filter(Predicate::eq("done", false))
            .order_by(OrderSpec::desc("rank"))
            .limit(1);
        let rows = transport.query(&spec).unwrap();

        assert_eq!(rows, vec![Record::new(1).with("title", "b")]);
        assert_eq!(transport.query_count(), 1);
    }

    #[test]
    fn test_query_unknown_table() {
        let transport = MemoryTransport::new();
        let err = transport.query(&QuerySpec::table("missing")).unwrap_err();
        assert_eq!(err.table, "missing");
    }

    #[test]
    fn test_injected_query_failure_is_one_shot() {
        let transport = MemoryTransport::new();
        transport.seed("todos", todos());
        transport.fail_next_query("connection reset");

        assert!(transport.query(&QuerySpec::table("todos")).is_err());
        assert_eq!(transport.query(&QuerySpec::table("todos")).unwrap().len(), 3);
    }

    #[test]
    fn test_broadcast_only_reaches_table_subscribers() {
        let transport = Arc::new(MemoryTransport::new());
        let (tx, rx) = inbox(16);
        let _todos = FeedSubscription::open(transport.clone(), "todos", 1, tx.clone()).unwrap();
        let _notes = FeedSubscription::open(transport.clone(), "notes", 1, tx).unwrap();
        // Connecting + Subscribed for each
        assert_eq!(rx.try_iter().count(), 4);

        transport.insert("todos", Record::new(9).with("title", "new"));

        let messages: Vec<_> = rx.try_iter().map(|m| m.message).collect();
        assert_eq!(
            messages,
            vec![FeedMessage::Event(ChangeEvent::Insert {
                record: Record::new(9).with("title", "new")
            })]
        );
        assert_eq!(transport.rows("todos").len(), 1);
    }

    #[test]
    fn test_writes_update_stored_rows() {
        let transport = MemoryTransport::new();
        transport.seed("todos", todos());

        transport.update("todos", Record::new(1).with("title", "changed"));
        transport.delete("todos", Identity::from(2));

        let rows = transport.rows("todos");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("title"), Some(&json!("changed")));
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let transport = Arc::new(MemoryTransport::new());
        let (tx, _rx) = inbox(4);
        let sub = FeedSubscription::open(transport.clone(), "todos", 1, tx).unwrap();

        for i in 0..10 {
            transport.insert("todos", Record::new(i));
        }

        assert_eq!(transport.subscription_count(), 0);
        assert!(sub.has_overflowed());
    }

    #[test]
    fn test_terminal_state_ends_subscriptions() {
        let transport = Arc::new(MemoryTransport::new());
        let (tx, rx) = inbox(16);
        let _sub = FeedSubscription::open(transport.clone(), "todos", 1, tx).unwrap();
        rx.try_iter().for_each(drop);

        transport.push_state("todos", SubscriptionState::TimedOut);

        assert_eq!(transport.subscription_count(), 0);
        let message = rx.try_recv().unwrap().message;
        assert_eq!(message, FeedMessage::State(SubscriptionState::TimedOut));
    }

    #[test]
    fn test_refuse_next_subscribe() {
        let transport = Arc::new(MemoryTransport::new());
        transport.refuse_next_subscribe("permission denied");
        let (tx, _rx) = inbox(16);

        let result = FeedSubscription::open(transport.clone(), "todos", 1, tx.clone());
        assert!(matches!(result, Err(SubscriptionError::Refused { .. })));
        assert!(FeedSubscription::open(transport.clone(), "todos", 1, tx).is_ok());
    }
}
