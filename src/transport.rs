//! Contract a remote store has to fulfil to back live queries.

use crate::error::{FetchError, SubscriptionError};
use crate::feed::{FeedSink, SubscriptionId};
use crate::types::{QuerySpec, Record};

/// Connection to the remote store.
///
/// Injected into every [`LiveQuery`](crate::LiveQuery) at construction.
/// `query` is called from a background worker thread; `subscribe` and
/// `unsubscribe` are called from the thread that owns the live query.
pub trait Transport: Send + Sync {
    /// One-shot snapshot read honouring projection, filter, order and limit.
    fn query(&self, spec: &QuerySpec) -> Result<Vec<Record>, FetchError>;

    /// Start pushing table-scoped changes into `sink`.
    ///
    /// Implementations report state transitions through
    /// [`FeedSink::state`] and deliver events in the order they arrive,
    /// without filtering by the query predicate. A `false` return from the
    /// sink means the consumer is gone and the sink can be discarded.
    fn subscribe(&self, table: &str, sink: FeedSink) -> Result<SubscriptionId, SubscriptionError>;

    /// Stop a subscription. Must tolerate unknown or already-removed ids.
    fn unsubscribe(&self, id: SubscriptionId);
}
