//! Observation hooks for cache activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hooks for observing session and window activity.
///
/// Implementations must be cheap; hooks run on request paths and inside
/// background workers.
pub trait CacheMetrics: Send + Sync {
    /// A multi-page session was registered.
    fn session_created(&self);
    /// A session could not be registered because the cache was full or busy.
    fn session_rejected(&self);
    /// A session was removed by the sweeper after going idle.
    fn session_expired(&self);
    /// A session was torn down.
    fn session_destroyed(&self);
    /// A session could not be torn down and was parked for a later sweep.
    fn session_parked(&self);
    /// A page request was served.
    ///
    /// # Parameters
    /// * `in_window` - `true` if served from the in-memory window, `false` if read from swap.
    fn page_served(&self, in_window: bool);
    /// A window rebalance pass finished.
    ///
    /// # Parameters
    /// * `loaded` - Pages loaded from swap.
    /// * `evicted` - Pages dropped from the window.
    fn rebalance_applied(&self, loaded: usize, evicted: usize);
    /// A window rebalance pass gave up (lock timeout or read failure).
    fn rebalance_skipped(&self);
    /// A swap build finished.
    ///
    /// # Parameters
    /// * `records` - Records stored, `None` if the build failed.
    fn swap_built(&self, records: Option<usize>);
}

/// Discards every event.
#[derive(Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    fn session_created(&self) {}
    fn session_rejected(&self) {}
    fn session_expired(&self) {}
    fn session_destroyed(&self) {}
    fn session_parked(&self) {}
    fn page_served(&self, _in_window: bool) {}
    fn rebalance_applied(&self, _loaded: usize, _evicted: usize) {}
    fn rebalance_skipped(&self) {}
    fn swap_built(&self, _records: Option<usize>) {}
}

/// Atomic counters for every [`CacheMetrics`] event.
#[derive(Default, Debug)]
pub struct CounterMetrics {
    /// Sessions registered.
    pub sessions_created: AtomicU64,
    /// Sessions refused registration.
    pub sessions_rejected: AtomicU64,
    /// Sessions removed after expiring.
    pub sessions_expired: AtomicU64,
    /// Sessions torn down.
    pub sessions_destroyed: AtomicU64,
    /// Sessions parked in the invalid set.
    pub sessions_parked: AtomicU64,
    /// Pages served from the window.
    pub window_hits: AtomicU64,
    /// Pages read directly from swap.
    pub window_misses: AtomicU64,
    /// Rebalance passes that changed the window.
    pub rebalances: AtomicU64,
    /// Pages loaded by rebalance passes.
    pub pages_loaded: AtomicU64,
    /// Pages evicted by rebalance passes.
    pub pages_evicted: AtomicU64,
    /// Rebalance passes abandoned.
    pub rebalances_skipped: AtomicU64,
    /// Swap builds that completed.
    pub swaps_built: AtomicU64,
    /// Swap builds that failed.
    pub swaps_failed: AtomicU64,
}

impl CounterMetrics {
    /// Convenience accessor for tests and diagnostics.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl CacheMetrics for CounterMetrics {
    fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn session_expired(&self) {
        self.sessions_expired.fetch_add(1, Ordering::Relaxed);
    }

    fn session_destroyed(&self) {
        self.sessions_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn session_parked(&self) {
        self.sessions_parked.fetch_add(1, Ordering::Relaxed);
    }

    fn page_served(&self, in_window: bool) {
        if in_window {
            self.window_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.window_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn rebalance_applied(&self, loaded: usize, evicted: usize) {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
        self.pages_loaded
            .fetch_add(loaded as u64, Ordering::Relaxed);
        self.pages_evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }

    fn rebalance_skipped(&self) {
        self.rebalances_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn swap_built(&self, records: Option<usize>) {
        match records {
            Some(_) => self.swaps_built.fetch_add(1, Ordering::Relaxed),
            None => self.swaps_failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Returns the metrics sink used when none is configured.
pub fn default_metrics() -> Arc<dyn CacheMetrics> {
    Arc::new(NoopMetrics)
}
