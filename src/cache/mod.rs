#![forbid(unsafe_code)]

//! Registry of paged sessions.
//!
//! The registry lock is never held while a session lock is acquired:
//! sessions are taken out of the registry first and torn down afterwards.

mod keys;
mod sweeper;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::{default_metrics, CacheMetrics};
use crate::options::{CacheOptions, SessionOptions};
use crate::page::Page;
use crate::primitives::concurrency::{lock_for, Signal};
use crate::session::PagedSession;
use crate::source::RecordSource;
use crate::types::{CacheError, Result, SessionKey, TotalPages};

use keys::KeyGenerator;

/// Lock wait used for best-effort teardown of a single session.
pub const CLEANUP_DESTROY_WAIT: Duration = Duration::from_millis(100);

const INVALID_PREFIX: &str = "(INVALID)";

/// Result of [`SessionCache::create_session`].
pub enum CreatedSession {
    /// The whole result fits on one page; nothing was registered.
    Single(Page),
    /// A registered multi-page session.
    Paged(Arc<PagedSession>),
}

impl CreatedSession {
    /// Key to hand back to the caller, if the result was registered.
    pub fn session_key(&self) -> Option<&SessionKey> {
        match self {
            CreatedSession::Single(_) => None,
            CreatedSession::Paged(session) => Some(session.key()),
        }
    }
}

/// Outcome of one sweep pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Parked sessions destroyed and forgotten.
    pub reclaimed: usize,
    /// Expired sessions removed from the registry.
    pub expired: usize,
    /// Sessions left parked after the pass.
    pub parked: usize,
}

impl SweepStats {
    fn is_empty(&self) -> bool {
        self.reclaimed == 0 && self.expired == 0 && self.parked == 0
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionKey, Arc<PagedSession>>,
    invalid: HashMap<String, Arc<PagedSession>>,
}

pub(crate) struct CacheInner {
    options: CacheOptions,
    session_options: SessionOptions,
    metrics: Arc<dyn CacheMetrics>,
    registry: Mutex<Registry>,
    keys: KeyGenerator,
    sweep_signal: Signal,
}

impl CacheInner {
    fn lock_registry(&self) -> Result<parking_lot::MutexGuard<'_, Registry>> {
        lock_for(&self.registry, Some(self.options.max_wait()), "session registry")
    }

    fn park(&self, session: Arc<PagedSession>) {
        let name = format!("{INVALID_PREFIX}{}", session.key());
        self.registry.lock().invalid.insert(name, session);
        self.metrics.session_parked();
    }

    fn destroy(&self, session: &Arc<PagedSession>, timeout: Option<Duration>) -> bool {
        match session.cleanup(timeout) {
            Ok(()) => {
                self.metrics.session_destroyed();
                true
            }
            Err(err) => {
                warn!(key = %session.key(), error = %err, "cache.destroy.parked");
                self.park(Arc::clone(session));
                false
            }
        }
    }

    fn sweep(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        let parked: Vec<(String, Arc<PagedSession>)> = {
            let registry = self.lock_registry()?;
            registry
                .invalid
                .iter()
                .map(|(name, session)| (name.clone(), Arc::clone(session)))
                .collect()
        };
        for (name, session) in parked {
            if session.cleanup(Some(CLEANUP_DESTROY_WAIT)).is_ok() {
                self.registry.lock().invalid.remove(&name);
                self.metrics.session_destroyed();
                stats.reclaimed += 1;
            }
        }

        let expired: Vec<Arc<PagedSession>> = {
            let mut registry = self.lock_registry()?;
            let keys: Vec<SessionKey> = registry
                .sessions
                .iter()
                .filter(|(_, session)| session.is_expired())
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| registry.sessions.remove(key))
                .collect()
        };
        for session in expired {
            debug!(
                key = %session.key(),
                idle_ms = session.idle_for().as_millis() as u64,
                "cache.sweep.expired"
            );
            self.metrics.session_expired();
            stats.expired += 1;
            self.destroy(&session, Some(CLEANUP_DESTROY_WAIT));
        }

        stats.parked = self.registry.lock().invalid.len();
        Ok(stats)
    }

    fn describe(&self) -> Vec<String> {
        let sessions: Vec<Arc<PagedSession>> = {
            let registry = self.registry.lock();
            registry
                .sessions
                .values()
                .chain(registry.invalid.values())
                .cloned()
                .collect()
        };
        sessions.iter().map(|session| session.describe()).collect()
    }
}

/// Bounded registry of paged sessions with a background sweeper.
pub struct SessionCache {
    inner: Arc<CacheInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCache {
    /// Validates `options` and starts the sweeper.
    pub fn open(options: CacheOptions) -> Result<Self> {
        Self::with_metrics(options, default_metrics())
    }

    /// Like [`SessionCache::open`], reporting events to `metrics`.
    pub fn with_metrics(options: CacheOptions, metrics: Arc<dyn CacheMetrics>) -> Result<Self> {
        options.validate()?;
        let inner = Arc::new(CacheInner {
            session_options: options.session_options(),
            options,
            metrics,
            registry: Mutex::new(Registry::default()),
            keys: KeyGenerator::default(),
            sweep_signal: Signal::new(),
        });
        let sweeper = sweeper::spawn(Arc::clone(&inner))?;
        info!(
            max_sessions = inner.options.max_sessions,
            buffer_pages = inner.options.buffer_pages,
            records_per_page = inner.options.records_per_page,
            "cache.open"
        );
        Ok(Self {
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Options the cache was opened with.
    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Pages `source` into a new session.
    ///
    /// Returns `None` for an empty source and [`CreatedSession::Single`] for a
    /// one-page result. Larger results are registered; registration fails
    /// with `Unavailable` when the cache is full, after which the session is
    /// torn down (or parked if teardown fails).
    pub fn create_session(&self, source: Box<dyn RecordSource>) -> Result<Option<CreatedSession>> {
        let key = self.inner.keys.next();
        let session = PagedSession::new(
            key.clone(),
            source,
            self.inner.session_options.clone(),
            Arc::clone(&self.inner.metrics),
        )?;
        match session.total_pages() {
            TotalPages::Known(0) => return Ok(None),
            TotalPages::Known(1) => {
                return Ok(session.unregistered_first_page()?.map(CreatedSession::Single));
            }
            _ => {}
        }

        let session = Arc::new(session);
        if let Err(err) = self.register(&key, &session) {
            self.inner.metrics.session_rejected();
            self.inner.destroy(&session, Some(CLEANUP_DESTROY_WAIT));
            return Err(err);
        }
        self.inner.metrics.session_created();
        debug!(key = %key, "cache.session.registered");
        Ok(Some(CreatedSession::Paged(session)))
    }

    fn register(&self, key: &SessionKey, session: &Arc<PagedSession>) -> Result<()> {
        let mut registry = self.inner.lock_registry()?;
        if registry.sessions.len() >= self.inner.options.max_sessions {
            drop(registry);
            self.trigger_sweep();
            debug!(key = %key, "cache.session.rejected_full");
            return Err(CacheError::Unavailable("page list cache is full"));
        }
        registry.sessions.insert(key.clone(), Arc::clone(session));
        Ok(())
    }

    /// Looks up a registered session; `Expired` if it is unknown.
    pub fn get_session(&self, key: &SessionKey) -> Result<Arc<PagedSession>> {
        let registry = self.inner.lock_registry()?;
        registry
            .sessions
            .get(key)
            .cloned()
            .ok_or(CacheError::Expired)
    }

    /// Returns page `index` of the session registered under `key`.
    pub fn get_page(&self, key: &SessionKey, index: usize) -> Result<Page> {
        self.get_session(key)?.get_page(index)
    }

    /// Tears `session` down, parking it for the sweeper if its locks cannot
    /// be taken within `timeout`. Returns true when it was destroyed.
    pub fn destroy_session(&self, session: &Arc<PagedSession>, timeout: Option<Duration>) -> bool {
        self.inner.destroy(session, timeout)
    }

    /// Removes the session registered under `key` and destroys it.
    pub fn remove_session(&self, key: &SessionKey) -> Result<bool> {
        let session = self.inner.lock_registry()?.sessions.remove(key);
        match session {
            Some(session) => Ok(self.inner.destroy(&session, Some(CLEANUP_DESTROY_WAIT))),
            None => Err(CacheError::Expired),
        }
    }

    /// Asks the sweeper for an extra pass.
    pub fn trigger_sweep(&self) {
        self.inner.sweep_signal.notify();
    }

    /// Runs one sweep pass on the calling thread.
    pub fn sweep_now(&self) -> Result<SweepStats> {
        self.inner.sweep()
    }

    /// Destroys every session, waiting as long as needed. Parked sessions
    /// that still fail stay parked.
    pub fn clear(&self) {
        let drained: Vec<Arc<PagedSession>> = {
            let mut registry = self.inner.registry.lock();
            let mut drained: Vec<Arc<PagedSession>> =
                registry.sessions.drain().map(|(_, session)| session).collect();
            drained.extend(registry.invalid.drain().map(|(_, session)| session));
            drained
        };
        let count = drained.len();
        for session in drained {
            self.inner.destroy(&session, None);
        }
        info!(sessions = count, "cache.clear");
    }

    /// Alias for [`SessionCache::clear`].
    pub fn flush(&self) {
        self.clear();
    }

    /// Stops the sweeper and clears the cache.
    pub fn shutdown(&self) {
        self.inner.sweep_signal.stop();
        if let Some(handle) = self.sweeper.lock().take() {
            if handle.join().is_err() {
                warn!("cache.sweeper.panicked");
            }
        }
        self.clear();
    }

    /// Registered session count.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().sessions.len()
    }

    /// Returns true when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parked session count.
    pub fn invalid_len(&self) -> usize {
        self.inner.registry.lock().invalid.len()
    }

    /// One diagnostic line per registered or parked session.
    pub fn describe(&self) -> Vec<String> {
        self.inner.describe()
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        self.inner.sweep_signal.stop();
    }
}
