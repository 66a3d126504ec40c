//! Relay error types.

use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while relaying or consuming outbox events.
#[derive(Debug, Error)]
pub enum RelayError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A handler's engine call failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// An event payload did not have the expected shape.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A handler rejected an event.
    #[error("Handler {handler} failed: {reason}")]
    Handler { handler: &'static str, reason: String },

    /// Required configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
