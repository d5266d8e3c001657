//! Change feed subscriptions.
//!
//! A transport pushes into a [`FeedSink`]; the sink forwards into the owning
//! live query's inbox, tagging every message with the generation it was
//! opened for. The owner holds a [`FeedSubscription`], which unsubscribes
//! exactly once, on release or drop.

use crate::error::SubscriptionError;
use crate::transport::Transport;
use crate::types::{ChangeEvent, Identity, Record, SubscriptionState};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Transport-assigned identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Payload pushed by a transport.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    State(SubscriptionState),
    Event(ChangeEvent),
}

/// A feed message as it sits in a live query's inbox.
#[derive(Clone, Debug)]
pub struct Inbound {
    pub generation: u64,
    pub message: FeedMessage,
}

/// Create a bounded inbox.
pub fn inbox(capacity: usize) -> (Sender<Inbound>, Receiver<Inbound>) {
    bounded(capacity)
}

/// Shared between a subscription and its sink.
#[derive(Debug, Default)]
struct Liveness {
    cancelled: AtomicBool,
    overflowed: AtomicBool,
}

/// Push side of a subscription, handed to the transport.
#[derive(Clone)]
pub struct FeedSink {
    table: Arc<str>,
    generation: u64,
    sender: Sender<Inbound>,
    liveness: Arc<Liveness>,
}

impl FeedSink {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once the owning subscription has been released.
    pub fn is_cancelled(&self) -> bool {
        self.liveness.cancelled.load(Ordering::Acquire)
    }

    pub fn insert(&self, record: Record) -> bool {
        self.event(ChangeEvent::Insert { record })
    }

    pub fn update(&self, record: Record) -> bool {
        self.event(ChangeEvent::Update { record })
    }

    pub fn delete(&self, id: Identity) -> bool {
        self.event(ChangeEvent::Delete { id })
    }

    pub fn event(&self, event: ChangeEvent) -> bool {
        self.send(FeedMessage::Event(event))
    }

    pub fn state(&self, state: SubscriptionState) -> bool {
        self.send(FeedMessage::State(state))
    }

    /// Returns false if the message was dropped: the subscription was
    /// released, the owner is gone, or the inbox is full.
    fn send(&self, message: FeedMessage) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let inbound = Inbound {
            generation: self.generation,
            message,
        };
        match self.sender.try_send(inbound) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.liveness.overflowed.store(true, Ordering::Release);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl fmt::Debug for FeedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSink")
            .field("table", &self.table)
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owner side of a subscription. Unsubscribes when released or dropped.
pub struct FeedSubscription {
    id: SubscriptionId,
    table: Arc<str>,
    generation: u64,
    liveness: Arc<Liveness>,
    transport: Arc<dyn Transport>,
    released: bool,
}

impl FeedSubscription {
    /// Subscribe to `table`, routing its messages into `inbox`.
    pub fn open(
        transport: Arc<dyn Transport>,
        table: &str,
        generation: u64,
        inbox: Sender<Inbound>,
    ) -> Result<Self, SubscriptionError> {
        let table: Arc<str> = Arc::from(table);
        let liveness = Arc::new(Liveness::default());
        let sink = FeedSink {
            table: Arc::clone(&table),
            generation,
            sender: inbox,
            liveness: Arc::clone(&liveness),
        };

        match transport.subscribe(&table, sink) {
            Ok(id) => {
                debug!(?id, table = %table, generation, "subscribed");
                Ok(Self {
                    id,
                    table,
                    generation,
                    liveness,
                    transport,
                    released: false,
                })
            }
            Err(e) => {
                liveness.cancelled.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if the sink had to drop a message because the inbox was full.
    pub fn has_overflowed(&self) -> bool {
        self.liveness.overflowed.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Silence the sink and unsubscribe. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.liveness.cancelled.store(true, Ordering::Release);
        self.transport.unsubscribe(self.id);
        debug!(id = ?self.id, table = %self.table, generation = self.generation, "unsubscribed");
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("id", &self.id)
            .field("table", &self.table)
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}
