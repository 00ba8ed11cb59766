//! Error hierarchy for discovery and import reconciliation.
//!
//! Only a small part of it ever reaches a caller: store connectivity problems
//! are retried at the watch-arming layer, decode failures skip a single entry,
//! and import failures are values ([`crate::ImportFailure`]) rather than errors.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Coordination store failures (connectivity, missing nodes)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed remote endpoint entries
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// An import handle refused to close cleanly
    #[error("Failed to close import of {endpoint}: {reason}")]
    CloseFailed { endpoint: String, reason: String },

    /// A single retried operation exceeded its timeout
    #[error("Retry timeout after {0:?}")]
    RetryTimeout(Duration),

    /// Retry policy exhaustion
    #[error("{0}")]
    RetryTaskFailed(String),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the watch-arming backoff should try again after this error.
    ///
    /// Every store failure except a missing node is treated as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(StoreError::Unavailable(_))
                | Error::Store(StoreError::Other(_))
                | Error::RetryTimeout(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store connection lost or not yet established
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    /// The requested node does not exist
    #[error("No node at {0}")]
    NoNode(String),

    #[error("Coordination store error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Entry payload is not a valid property map
    #[error("Malformed entry {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: bincode::Error,
    },

    /// Entry decoded but lacks a mandatory property
    #[error("Entry {key} is missing property {property}")]
    MissingProperty { key: String, property: &'static str },

    /// Transport address could not be parsed
    #[error("Entry {key} has an invalid address {address}: {source}")]
    InvalidAddress {
        key: String,
        address: String,
        #[source]
        source: url::ParseError,
    },
}
