//! # livesync
//!
//! Client-side live queries: a locally held collection of records kept
//! consistent with a remote table.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: one-shot read that seeds the collection
//! - **Change feed**: pushed Insert/Update/Delete events folded in as they arrive
//! - **Optimistic writes**: local changes shown immediately as provisional
//!   entries, later superseded by authoritative events
//! - **Lifecycle**: one [`LiveQuery`] per consumer, torn down and rebuilt
//!   whenever its query changes
//!
//! ## Example
//!
//! ```ignore
//! use livesync::{LiveQuery, MemoryTransport, OrderSpec, Predicate, QuerySpec, Record};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(MemoryTransport::new());
//! transport.seed("todos", vec![Record::new(1).with("title", "milk").with("done", false)]);
//!
//! let mut todos = LiveQuery::new(
//!     transport.clone(),
//!     QuerySpec::table("todos")
//!         .filter(Predicate::eq("done", false))
//!         .order_by(OrderSpec::desc("createdAt")),
//! );
//! todos.activate();
//! todos.wait_for_snapshot(std::time::Duration::from_secs(1));
//!
//! // Remote writes show up on the next poll
//! transport.insert("todos", Record::new(2).with("title", "eggs"));
//! todos.poll();
//! assert_eq!(todos.data().len(), 2);
//! ```

pub mod collection;
pub mod error;
pub mod feed;
pub mod live;
pub mod memory;
pub mod optimistic;
pub mod query;
pub mod reconcile;
pub mod transport;
pub mod types;

// Re-exports
pub use collection::{Collection, Entry};
pub use error::{FetchError, LiveQueryError, Result, SubscriptionError};
pub use feed::{FeedMessage, FeedSink, FeedSubscription, Inbound, SubscriptionId};
pub use live::{LiveQuery, LiveQueryConfig, Phase, MIN_INBOX_CAPACITY};
pub use memory::MemoryTransport;
pub use optimistic::{LocalId, MutationTracker};
pub use query::{QueryExecutor, SnapshotFetch};
pub use reconcile::{Applied, Reconciler};
pub use transport::Transport;
pub use types::*;
