//! Error types for live queries.

use thiserror::Error;

/// The snapshot query failed.
///
/// Non-fatal: a live query that hits this keeps whatever collection it
/// last held and reports the error through `LiveQuery::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Snapshot query on `{table}` failed: {message}")]
pub struct FetchError {
    pub table: String,
    pub message: String,
}

impl FetchError {
    pub fn new(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// The change feed for a table could not be opened or stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Subscription to `{table}` refused: {reason}")]
    Refused { table: String, reason: String },

    #[error("Subscription to `{0}` errored")]
    Errored(String),

    #[error("Subscription to `{0}` timed out")]
    TimedOut(String),

    #[error("Subscription to `{0}` overflowed its inbox")]
    BufferOverflow(String),
}

impl SubscriptionError {
    /// Table the failed subscription was scoped to.
    pub fn table(&self) -> &str {
        match self {
            SubscriptionError::Refused { table, .. } => table,
            SubscriptionError::Errored(table)
            | SubscriptionError::TimedOut(table)
            | SubscriptionError::BufferOverflow(table) => table,
        }
    }
}

/// Main error type for live query operations.
#[derive(Debug, Error)]
pub enum LiveQueryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LiveQueryError {
    fn from(e: serde_json::Error) -> Self {
        LiveQueryError::Serialization(e.to_string())
    }
}

/// Result type for live query operations.
pub type Result<T> = std::result::Result<T, LiveQueryError>;
