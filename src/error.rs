//! Error types shared by the cache, retry and fetch layers
//!
//! A cache miss is an ordinary `None`, and a fetch failure is an ordinary `Err`.
//! The types here describe why a key could not be resolved.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Classification of a failed fetch, as reported by the fetch function
///
/// The retrier only looks at [`FetchErrorKind::is_retryable`]. Fetch functions
/// that cannot tell failures apart should use [`FetchErrorKind::Other`], which
/// is retried like a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The request did not complete in time
    Timeout,
    /// The connection failed or the server answered with a 5xx status
    Connection,
    /// The server asked us to slow down
    RateLimited,
    /// Authentication or cookie rejected
    Auth,
    /// The requested data does not exist
    NotFound,
    /// The request itself is malformed (bad symbol, bad parameters)
    InvalidRequest,
    /// The response body could not be decoded
    Malformed,
    /// The fetch function itself broke (for example it panicked)
    Internal,
    /// Anything the fetch function did not classify
    Other,
}

impl FetchErrorKind {
    /// Whether a failure of this kind is worth another attempt
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection | Self::RateLimited | Self::Other
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection error",
            Self::RateLimited => "rate limited",
            Self::Auth => "authentication failed",
            Self::NotFound => "not found",
            Self::InvalidRequest => "invalid request",
            Self::Malformed => "malformed response",
            Self::Internal => "internal error",
            Self::Other => "fetch failed",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by a fetch function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// An unclassified failure; retried up to the attempt cap
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Other, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors raised by the on-disk cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The record exists but could not be read or decoded
    ///
    /// Never returned by [`CacheStore::get`](crate::cache::CacheStore::get),
    /// which treats it as a miss.
    #[error("failed to read cache record {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// The record could not be written
    #[error("failed to write cache record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The record could not be removed
    #[error("failed to remove cache record {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Terminal outcome of resolving a single key
#[derive(Debug, Error)]
pub enum Error {
    /// The fetch failed with an error that is not worth retrying
    #[error(transparent)]
    Fetch(FetchError),

    /// Every attempt failed
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetryExhausted { attempts: u32, last: FetchError },

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// The batch deadline passed before the operation finished
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Whether the operation was stopped from outside rather than failing on its own
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// The last error reported by the fetch function, if any
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch(err) | Self::RetryExhausted { last: err, .. } => Some(err),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
