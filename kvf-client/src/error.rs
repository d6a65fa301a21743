//! # Error Types
//!
//! Every failure the facade can report collapses into one of a few kinds so
//! callers only need to decide between "retry later" and "give up".
//!
//! - `PoolExhausted`: all connections stayed leased for the whole acquire
//!   timeout.
//! - `CacheUnavailable`: the backend could not serve the command (connect,
//!   IO, framing, or an error reply). The original failure is kept as the
//!   error source.
//! - `InvalidArgument`: the caller broke an input constraint; nothing was
//!   sent to the store.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for facade operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Normalized errors surfaced by the facade.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No pooled connection became available within the acquire timeout.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The backing store failed to serve a command.
    #[error("cache unavailable: {message}")]
    CacheUnavailable {
        message: String,
        #[source]
        source: BackendError,
    },

    /// An argument violated the operation's input constraints.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The facade configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub(crate) fn unavailable(source: BackendError) -> Self {
        CacheError::CacheUnavailable {
            message: source.to_string(),
            source,
        }
    }

    /// True when the error came from pool capacity rather than the backend.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, CacheError::PoolExhausted { .. })
    }

    /// True when the backend failed to serve the command.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::CacheUnavailable { .. })
    }
}

/// Raw failures observed on a single connection.
///
/// These never leave the crate on their own; the facade wraps them into
/// `CacheError::CacheUnavailable`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network or IO failure while connecting, reading, or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,

    /// Server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// Reply type did not match what the command returns.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    /// A reply payload that should be text was not valid UTF-8.
    #[error("invalid utf-8 in response to {0}")]
    InvalidUtf8(&'static str),

    /// Address could not be resolved to a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl BackendError {
    /// True when the connection that produced this error must not be reused.
    pub(crate) fn poisons_connection(&self) -> bool {
        matches!(self, BackendError::Io(_) | BackendError::Protocol)
    }
}
