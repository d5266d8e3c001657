//! Live query lifecycle: snapshot, subscribe, reconcile, tear down.
//!
//! A [`LiveQuery`] is owned by exactly one consumer and is driven from that
//! consumer's thread through [`LiveQuery::poll`]. Background work (the
//! snapshot worker, transport push threads) only ever talks to it through
//! channels, and everything it sends is tagged with the generation it
//! belongs to. Teardown bumps the generation, so late results from a
//! previous cycle are discarded instead of applied.
//!
//! ```text
//! Idle --activate--> Loading --snapshot + subscribe--> Active
//!                       |                                 |
//!                       +------ fetch / feed failure -----+--> Error
//! ```
//!
//! Error is not terminal: the collection keeps its last good contents and
//! [`LiveQuery::refetch`] starts a fresh cycle. A feed closed by the server
//! drops an Active query back to Idle, where [`LiveQuery::activate`] starts
//! over.

use crate::collection::{Collection, Entry};
use crate::error::{FetchError, SubscriptionError};
use crate::feed::{inbox, FeedMessage, FeedSubscription, Inbound};
use crate::optimistic::{MutationTracker, DEFAULT_TEMP_ID_PREFIX};
use crate::query::{QueryExecutor, SnapshotFetch, DEFAULT_FETCH_WORKER_NAME};
use crate::reconcile::{Applied, Reconciler};
use crate::transport::Transport;
use crate::types::{Attributes, Identity, QuerySpec, Record, SubscriptionState};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Smallest inbox that still holds the subscribe handshake
/// (`Connecting`, then `Subscribed`) before the first poll.
pub const MIN_INBOX_CAPACITY: usize = 2;

/// Live query configuration.
#[derive(Clone, Debug)]
pub struct LiveQueryConfig {
    /// Max feed messages waiting to be polled before the subscription is
    /// considered overflowed. Raised to [`MIN_INBOX_CAPACITY`] if smaller.
    /// Default: 1000
    pub inbox_capacity: usize,

    /// Prefix for temporary identities given to optimistic inserts.
    /// Default: "tmp-"
    pub temp_id_prefix: String,

    /// Thread name for snapshot workers.
    pub fetch_worker_name: String,
}

impl Default for LiveQueryConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1000,
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
            fetch_worker_name: DEFAULT_FETCH_WORKER_NAME.to_string(),
        }
    }
}

/// Where a live query is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Active,
    Error,
}

/// A collection kept in sync with one table of a remote store.
pub struct LiveQuery {
    transport: Arc<dyn Transport>,
    config: LiveQueryConfig,
    spec: QuerySpec,
    phase: Phase,
    generation: u64,
    collection: Collection,
    reconciler: Reconciler,
    inbox_tx: Sender<Inbound>,
    inbox_rx: Receiver<Inbound>,
    fetch: Option<SnapshotFetch>,
    feed: Option<FeedSubscription>,
    subscription_state: Option<SubscriptionState>,
    error: Option<FetchError>,
    subscription_error: Option<SubscriptionError>,
}

impl LiveQuery {
    /// Create an idle live query with the default configuration.
    pub fn new(transport: Arc<dyn Transport>, spec: QuerySpec) -> Self {
        Self::with_config(transport, spec, LiveQueryConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, spec: QuerySpec, mut config: LiveQueryConfig) -> Self {
        if config.inbox_capacity < MIN_INBOX_CAPACITY {
            warn!(
                requested = config.inbox_capacity,
                min = MIN_INBOX_CAPACITY,
                "inbox capacity too small, raising"
            );
            config.inbox_capacity = MIN_INBOX_CAPACITY;
        }
        let (inbox_tx, inbox_rx) = inbox(config.inbox_capacity);
        let reconciler = Reconciler::new(MutationTracker::new(config.temp_id_prefix.clone()));
        Self {
            transport,
            config,
            spec,
            phase: Phase::Idle,
            generation: 0,
            collection: Collection::new(),
            reconciler,
            inbox_tx,
            inbox_rx,
            fetch: None,
            feed: None,
            subscription_state: None,
            error: None,
            subscription_error: None,
        }
    }

    // --- Lifecycle ---

    /// Start the first cycle. Does nothing unless idle.
    pub fn activate(&mut self) {
        if self.phase == Phase::Idle {
            self.start_cycle();
        }
    }

    /// Point the live query at a different query.
    ///
    /// An identical query is ignored. Otherwise the collection is discarded,
    /// and unless idle the current cycle is torn down and a new one started.
    pub fn set_query(&mut self, spec: QuerySpec) {
        if spec == self.spec {
            return;
        }
        debug!(from = %self.spec.table, to = %spec.table, "query changed");
        self.spec = spec;
        self.collection = Collection::new();
        if self.phase == Phase::Idle {
            return;
        }
        self.teardown();
        self.start_cycle();
    }

    /// Tear down and start over. The collection stays visible until the new
    /// snapshot replaces it.
    pub fn refetch(&mut self) {
        self.teardown();
        self.start_cycle();
    }

    /// Tear down and go back to idle. Collection contents are kept.
    pub fn close(&mut self) {
        self.teardown();
        self.phase = Phase::Idle;
    }

    /// Make progress without blocking. Returns how many feed events were
    /// applied to the collection.
    pub fn poll(&mut self) -> usize {
        let outcome = self.fetch.as_ref().and_then(SnapshotFetch::poll);
        if let Some(result) = outcome {
            self.finish_fetch(result);
        }
        self.drain_inbox()
    }

    /// Block up to `timeout` for a pending snapshot, then poll. Returns
    /// true if no snapshot is pending afterwards.
    pub fn wait_for_snapshot(&mut self, timeout: Duration) -> bool {
        let outcome = self.fetch.as_ref().and_then(|fetch| fetch.wait(timeout));
        if let Some(result) = outcome {
            self.finish_fetch(result);
        }
        self.drain_inbox();
        self.fetch.is_none()
    }

    fn start_cycle(&mut self) {
        self.error = None;
        self.subscription_error = None;
        self.subscription_state = None;

        let spawned = QueryExecutor::spawn(
            Arc::clone(&self.transport),
            self.spec.clone(),
            self.generation,
            &self.config.fetch_worker_name,
        );
        match spawned {
            Ok(fetch) => {
                debug!(table = %self.spec.table, generation = self.generation, "loading");
                self.fetch = Some(fetch);
                self.phase = Phase::Loading;
            }
            Err(e) => self.fail_fetch(e),
        }
    }

    /// Cancel the fetch, release the feed, and invalidate everything the
    /// current generation may still deliver.
    fn teardown(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.cancel();
        }
        if let Some(mut feed) = self.feed.take() {
            feed.release();
        }
        self.subscription_state = None;
        self.generation += 1;

        let discarded = self.inbox_rx.try_iter().count();
        if discarded > 0 {
            trace!(discarded, "discarded queued feed messages on teardown");
        }
    }

    fn finish_fetch(&mut self, result: Result<Vec<Record>, FetchError>) {
        self.fetch = None;
        match result {
            Ok(records) => {
                debug!(table = %self.spec.table, rows = records.len(), "snapshot loaded");
                self.collection.replace_all(records);
                self.error = None;
                self.open_feed();
            }
            Err(e) => self.fail_fetch(e),
        }
    }

    fn fail_fetch(&mut self, error: FetchError) {
        warn!(%error, "snapshot fetch failed");
        self.error = Some(error);
        self.phase = Phase::Error;
    }

    fn open_feed(&mut self) {
        let opened = FeedSubscription::open(
            Arc::clone(&self.transport),
            &self.spec.table,
            self.generation,
            self.inbox_tx.clone(),
        );
        match opened {
            Ok(feed) => {
                self.feed = Some(feed);
                self.phase = Phase::Active;
            }
            Err(e) => self.fail_subscription(e),
        }
    }

    fn fail_subscription(&mut self, error: SubscriptionError) {
        warn!(%error, "change feed failed");
        if let Some(mut feed) = self.feed.take() {
            feed.release();
        }
        self.subscription_error = Some(error);
        self.phase = Phase::Error;
    }

    /// Apply what was queued when the drain started. Later arrivals wait
    /// for the next poll.
    fn drain_inbox(&mut self) -> usize {
        let mut applied = 0;
        let pending = self.inbox_rx.len();

        for _ in 0..pending {
            let Ok(inbound) = self.inbox_rx.try_recv() else {
                break;
            };
            let live = self
                .feed
                .as_ref()
                .is_some_and(|feed| feed.generation() == inbound.generation);
            if !live {
                trace!(generation = inbound.generation, current = self.generation, "discarding stale feed message");
                continue;
            }

            match inbound.message {
                FeedMessage::Event(event) => {
                    let outcome = self.reconciler.apply_event(&mut self.collection, event);
                    if outcome != Applied::Ignored {
                        applied += 1;
                    }
                }
                FeedMessage::State(state) => self.on_state(state),
            }
        }

        let overflowed = self.feed.as_ref().is_some_and(FeedSubscription::has_overflowed);
        if overflowed {
            self.fail_subscription(SubscriptionError::BufferOverflow(self.spec.table.clone()));
        }

        applied
    }

    fn on_state(&mut self, state: SubscriptionState) {
        debug!(table = %self.spec.table, ?state, "subscription state");
        self.subscription_state = Some(state);

        let table = self.spec.table.clone();
        match state {
            SubscriptionState::Connecting | SubscriptionState::Subscribed => {}
            SubscriptionState::Errored => self.fail_subscription(SubscriptionError::Errored(table)),
            SubscriptionState::TimedOut => self.fail_subscription(SubscriptionError::TimedOut(table)),
            SubscriptionState::Closed => {
                if let Some(mut feed) = self.feed.take() {
                    feed.release();
                }
                self.phase = Phase::Idle;
            }
        }
    }

    // --- Optimistic writes ---

    /// Show a not-yet-confirmed record immediately. Returns its temporary
    /// identity.
    pub fn optimistic_insert(&mut self, partial: Attributes) -> Identity {
        self.reconciler.optimistic_insert(&mut self.collection, partial)
    }

    /// Patch a record locally ahead of confirmation. Unknown ids are ignored.
    pub fn optimistic_update(&mut self, id: &Identity, patch: Attributes) {
        self.reconciler.optimistic_update(&mut self.collection, id, patch);
    }

    /// Remove a record locally. Unknown ids are ignored.
    pub fn optimistic_delete(&mut self, id: &Identity) {
        self.reconciler.optimistic_delete(&mut self.collection, id);
    }

    // --- Consumer surface ---

    /// Current records in collection order.
    pub fn data(&self) -> Vec<Record> {
        self.collection.snapshot()
    }

    pub fn entries(&self) -> &[Entry] {
        self.collection.entries()
    }

    /// True only while a snapshot read is in flight.
    pub fn loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    pub fn subscription_error(&self) -> Option<&SubscriptionError> {
        self.subscription_error.as_ref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.feed.is_some() && self.subscription_state == Some(SubscriptionState::Subscribed)
    }

    pub fn subscription_state(&self) -> Option<SubscriptionState> {
        self.subscription_state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn query(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn config(&self) -> &LiveQueryConfig {
        &self.config
    }

    /// Bumped on every teardown.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.teardown();
    }
}
