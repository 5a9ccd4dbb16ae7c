//! Cache configuration and startup validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::{CacheError, Result};

/// Page cache configuration.
///
/// Every field except the swap placement ones is required when loading from
/// TOML; [`CacheOptions::validate`] must pass before a cache is opened.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheOptions {
    /// Seconds between background sweeps. 0 sweeps only on demand.
    pub cleanup_idle_secs: u64,
    /// Idle seconds after which a session expires. 0 never expires.
    pub expired_secs: u64,
    /// Maximum number of registered sessions.
    pub max_sessions: usize,
    /// Records per page.
    pub records_per_page: usize,
    /// Pages held in each session's in-memory window. Must be odd.
    pub buffer_pages: usize,
    /// Maximum records ever pulled from a record source.
    pub max_swap_records: usize,
    /// Milliseconds a request may wait for a lock before failing as unavailable.
    pub max_wait_ms: u64,
    /// Directory for swap files; the OS temp directory when absent.
    #[serde(default)]
    pub swap_dir: Option<PathBuf>,
    /// Keep swap frames in memory instead of a file.
    #[serde(default)]
    pub in_memory_swap: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cleanup_idle_secs: 60,
            expired_secs: 300,
            max_sessions: 64,
            records_per_page: 25,
            buffer_pages: 5,
            max_swap_records: 10_000,
            max_wait_ms: 2_000,
            swap_dir: None,
            in_memory_swap: false,
        }
    }
}

impl CacheOptions {
    /// Parses and validates options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: CacheOptions =
            toml::from_str(text).map_err(|err| CacheError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads, parses and validates options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            CacheError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks the invariants the cache relies on.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.max_sessions == 0 {
            errors.push("max_sessions must be at least 1".to_owned());
        }
        if self.records_per_page == 0 {
            errors.push("records_per_page must be at least 1".to_owned());
        }
        if self.buffer_pages % 2 != 1 {
            errors.push(format!(
                "buffer_pages must be an odd integer, got {}",
                self.buffer_pages
            ));
        }
        if self.max_swap_records < self.buffer_pages {
            errors.push(format!(
                "max_swap_records ({}) must not be smaller than buffer_pages ({})",
                self.max_swap_records, self.buffer_pages
            ));
        }
        if self.max_wait_ms == 0 {
            errors.push("max_wait_ms must be greater than 0".to_owned());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Config(errors.join("; ")))
        }
    }

    /// Request-path lock timeout.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Sweep period, `None` when periodic sweeping is disabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_idle_secs > 0).then(|| Duration::from_secs(self.cleanup_idle_secs))
    }

    /// Per-session settings derived from these options.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            expired_after: (self.expired_secs > 0).then(|| Duration::from_secs(self.expired_secs)),
            max_wait: self.max_wait(),
            buffer_pages: self.buffer_pages,
            records_per_page: self.records_per_page,
            max_swap_records: self.max_swap_records,
            swap: if self.in_memory_swap {
                SwapPlacement::Memory
            } else {
                SwapPlacement::Dir(self.swap_dir.clone().unwrap_or_else(std::env::temp_dir))
            },
        }
    }
}

/// Where a session keeps its swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapPlacement {
    /// A temporary file inside this directory, removed on cleanup.
    Dir(PathBuf),
    /// A heap buffer.
    Memory,
}

/// Settings for a single paged session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Idle time before the session counts as expired; `None` never expires.
    pub expired_after: Option<Duration>,
    /// Lock timeout for request-path operations.
    pub max_wait: Duration,
    /// Window size in pages (odd).
    pub buffer_pages: usize,
    /// Records per page.
    pub records_per_page: usize,
    /// Cap on records pulled from the source.
    pub max_swap_records: usize,
    /// Swap placement.
    pub swap: SwapPlacement,
}

impl SessionOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.buffer_pages % 2 != 1 {
            return Err(CacheError::Config(
                "page list buffer size must be an odd number".to_owned(),
            ));
        }
        if self.records_per_page == 0 {
            return Err(CacheError::Config(
                "records per page must be at least 1".to_owned(),
            ));
        }
        if self.max_swap_records < self.buffer_pages {
            return Err(CacheError::Config(
                "max swap size must not be smaller than the buffer size".to_owned(),
            ));
        }
        Ok(())
    }
}
