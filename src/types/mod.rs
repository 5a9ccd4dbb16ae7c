#![forbid(unsafe_code)]

//! Error taxonomy and shared identifier types.

use std::fmt;

/// Errors surfaced by the page cache.
///
/// Callers normally only distinguish three outcomes: [`CacheError::Unavailable`]
/// (retry shortly), [`CacheError::Expired`] (restart the query) and everything
/// else (system failure).
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// A resource could not be acquired in time, or the answer is not known yet.
    #[error("resource unavailable: {0}")]
    Unavailable(&'static str),
    /// The referenced session no longer exists.
    #[error("page list expired")]
    Expired,
    /// Invalid or missing configuration.
    #[error("configuration: {0}")]
    Config(String),
    /// Secondary storage I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Secondary storage returned data that failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The requested page is outside the result.
    #[error("page {0} does not exist")]
    NoSuchPage(usize),
    /// The record source or its serializer failed.
    #[error("record source: {0}")]
    Source(String),
    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

impl CacheError {
    /// Returns true when the same call may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }

    /// Returns true for storage-layer failures.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, CacheError::Io(_) | CacheError::Corruption(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Opaque identifier handed out for a registered paged session.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wraps a key received from a caller.
    pub fn new(key: impl Into<String>) -> Self {
        SessionKey(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        SessionKey(value.to_owned())
    }
}

/// Total number of pages in a session's result.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TotalPages {
    /// The count is final.
    Known(usize),
    /// The swap is still being built (or its build failed), so the count is not known.
    Pending,
}

impl TotalPages {
    /// Returns the count if known.
    pub fn known(self) -> Option<usize> {
        match self {
            TotalPages::Known(n) => Some(n),
            TotalPages::Pending => None,
        }
    }

    /// Pages needed to hold `records` records at `per_page` records each.
    pub fn for_records(records: usize, per_page: usize) -> Self {
        TotalPages::Known(records.div_ceil(per_page.max(1)))
    }
}

impl fmt::Display for TotalPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TotalPages::Known(n) => write!(f, "{n}"),
            TotalPages::Pending => f.write_str("unknown"),
        }
    }
}
