#![forbid(unsafe_code)]

//! Paged sessions: one query result exposed as randomly accessible pages.
//!
//! A session keeps a window of at most `buffer_pages` pages in memory. When
//! the record source holds more than one window's worth of records, the
//! complete sequence is drained into a [`SwapStore`] by a builder thread and
//! an updater thread slides the window after each page request.
//!
//! Lock order is always store before window. Request paths never hold the
//! window lock while acquiring the store lock.

mod window;
mod workers;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::metrics::CacheMetrics;
use crate::options::SessionOptions;
use crate::page::{Page, PageHeader};
use crate::primitives::concurrency::{lock_for, Signal, StartGate};
use crate::source::{RecordSerializer, RecordSource, SourceLease};
use crate::swap::SwapStore;
use crate::types::{CacheError, Result, SessionKey, TotalPages};

/// Progress of the background swap build.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SwapPhase {
    /// The source fit in the initial window.
    NotNeeded,
    Building,
    Built(usize),
    Failed,
}

struct WindowState {
    pages: HashMap<usize, Page>,
    current: usize,
}

pub(crate) struct SessionShared {
    key: SessionKey,
    options: SessionOptions,
    serializer: Arc<dyn RecordSerializer>,
    metrics: Arc<dyn CacheMetrics>,
    window: Mutex<WindowState>,
    store: Option<Mutex<SwapStore>>,
    phase: Mutex<SwapPhase>,
    initial_pages: usize,
    created: Instant,
    /// Milliseconds after `created` of the last page request.
    last_access_ms: AtomicU64,
    destroyed: AtomicBool,
    updates: Signal,
    cancel: AtomicBool,
}

impl SessionShared {
    fn total_pages(&self) -> TotalPages {
        match *self.phase.lock() {
            SwapPhase::NotNeeded => TotalPages::Known(self.initial_pages),
            SwapPhase::Built(records) => {
                let pages = records.div_ceil(self.options.records_per_page.max(1));
                TotalPages::Known(pages.max(self.initial_pages))
            }
            SwapPhase::Building | SwapPhase::Failed => TotalPages::Pending,
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_access_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }

    fn read_page(&self, store: &mut SwapStore, index: usize) -> Result<Page> {
        let per_page = self.options.records_per_page;
        let records = store.get_records(index * per_page, per_page)?;
        Page::build(index, records, self.serializer.as_ref())
    }
}

#[derive(Default)]
struct Workers {
    updater: Option<JoinHandle<()>>,
    builder: Option<JoinHandle<()>>,
}

/// One query result paged through a bounded in-memory window.
pub struct PagedSession {
    shared: Arc<SessionShared>,
    workers: Mutex<Workers>,
}

impl PagedSession {
    /// Builds a session from `source`, filling the first window synchronously.
    ///
    /// Background workers are only started when the source holds more
    /// records than the first window takes.
    pub fn new(
        key: SessionKey,
        source: Box<dyn RecordSource>,
        options: SessionOptions,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Result<Self> {
        options.validate()?;
        let mut lease = SourceLease::new(source);
        let serializer = lease.serializer();
        let per_page = options.records_per_page;

        let mut consumed: Vec<String> = Vec::new();
        let mut pages = HashMap::new();
        let mut exhausted = false;
        for index in 0..options.buffer_pages {
            let start = consumed.len();
            while consumed.len() - start < per_page {
                match lease.next_record()? {
                    Some(record) => consumed.push(record),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if consumed.len() == start {
                break;
            }
            let raw = consumed[start..].iter().cloned().map(Ok);
            pages.insert(index, Page::build(index, raw, serializer.as_ref())?);
            if exhausted {
                break;
            }
        }
        let overflow = if exhausted {
            None
        } else {
            lease.next_record()?
        };
        let initial_pages = pages.len();

        let Some(overflow) = overflow else {
            lease.release();
            debug!(key = %key, pages = initial_pages, "session.create.in_memory");
            let shared = Self::shared(key, options, serializer, metrics, pages, None, SwapPhase::NotNeeded);
            return Ok(Self {
                shared: Arc::new(shared),
                workers: Mutex::new(Workers::default()),
            });
        };

        consumed.push(overflow);
        let mut store = SwapStore::create(&key, &options.swap, options.max_swap_records)?;
        store.open()?;
        store.seed(&consumed)?;
        drop(consumed);

        let shared = Arc::new(Self::shared(
            key,
            options,
            serializer,
            metrics,
            pages,
            Some(Mutex::new(store)),
            SwapPhase::Building,
        ));
        let session = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Workers::default()),
        };

        let updater = workers::spawn_updater(Arc::clone(&shared))?;
        session.workers.lock().updater = Some(updater);

        let gate = Arc::new(StartGate::new());
        let builder = workers::spawn_builder(Arc::clone(&shared), lease, Arc::clone(&gate))?;
        session.workers.lock().builder = Some(builder);
        if gate.wait(shared.options.max_wait).is_none() {
            warn!(key = %shared.key, "session.builder.start_timeout");
        }
        debug!(
            key = %shared.key,
            pages = initial_pages,
            "session.create.swapped"
        );
        Ok(session)
    }

    fn shared(
        key: SessionKey,
        options: SessionOptions,
        serializer: Arc<dyn RecordSerializer>,
        metrics: Arc<dyn CacheMetrics>,
        pages: HashMap<usize, Page>,
        store: Option<Mutex<SwapStore>>,
        phase: SwapPhase,
    ) -> SessionShared {
        SessionShared {
            key,
            options,
            serializer,
            metrics,
            initial_pages: pages.len(),
            window: Mutex::new(WindowState { pages, current: 0 }),
            store,
            phase: Mutex::new(phase),
            created: Instant::now(),
            last_access_ms: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            updates: Signal::new(),
            cancel: AtomicBool::new(false),
        }
    }

    /// Session key.
    pub fn key(&self) -> &SessionKey {
        &self.shared.key
    }

    /// Total page count, `Pending` while the swap is being built or if the build failed.
    pub fn total_pages(&self) -> TotalPages {
        self.shared.total_pages()
    }

    /// Returns true when the result needed a swap and background workers.
    pub fn is_swapped(&self) -> bool {
        self.shared.store.is_some()
    }

    /// Pages currently held in the window.
    pub fn available_pages(&self) -> Result<usize> {
        let window = lock_for(&self.shared.window, Some(self.shared.options.max_wait), "page window")?;
        Ok(window.pages.len())
    }

    /// Indices currently held in the window, ascending.
    pub fn window_pages(&self) -> Result<Vec<usize>> {
        let window = lock_for(&self.shared.window, Some(self.shared.options.max_wait), "page window")?;
        let mut indices: Vec<usize> = window.pages.keys().copied().collect();
        indices.sort_unstable();
        Ok(indices)
    }

    /// Reports whether page `index` exists.
    ///
    /// While the total is pending only indices held in the window can be
    /// confirmed; anything else is `Unavailable`.
    pub fn exists(&self, index: usize) -> Result<bool> {
        if self.shared.is_destroyed() {
            return Err(CacheError::Expired);
        }
        match self.shared.total_pages() {
            TotalPages::Known(total) => Ok(index < total),
            TotalPages::Pending => {
                if index < self.shared.initial_pages {
                    return Ok(true);
                }
                let window =
                    lock_for(&self.shared.window, Some(self.shared.options.max_wait), "page window")?;
                if window.pages.contains_key(&index) {
                    Ok(true)
                } else {
                    Err(CacheError::Unavailable("total pages not yet known"))
                }
            }
        }
    }

    /// Returns page `index` stamped with live session statistics.
    pub fn get_page(&self, index: usize) -> Result<Page> {
        let shared = &self.shared;
        let max_wait = Some(shared.options.max_wait);
        {
            let mut window = lock_for(&shared.window, max_wait, "page window")?;
            if shared.is_destroyed() {
                return Err(CacheError::Expired);
            }
            shared.touch();
            if let Some(page) = window.pages.get(&index).cloned() {
                window.current = index;
                let in_memory = window.pages.len();
                drop(window);
                shared.metrics.page_served(true);
                shared.updates.notify();
                trace!(key = %shared.key, index, "session.get_page.hit");
                return Ok(page.stamped(self.header(index, in_memory)));
            }
        }

        let page = self.read_from_swap(index)?;
        let in_memory = {
            let mut window = lock_for(&shared.window, max_wait, "page window")?;
            if shared.is_destroyed() {
                return Err(CacheError::Expired);
            }
            window.current = index;
            window.pages.len()
        };
        shared.metrics.page_served(false);
        shared.updates.notify();
        debug!(key = %shared.key, index, "session.get_page.miss");
        Ok(page.stamped(self.header(index, in_memory)))
    }

    fn read_from_swap(&self, index: usize) -> Result<Page> {
        let shared = &self.shared;
        let Some(store) = shared.store.as_ref() else {
            return Err(CacheError::NoSuchPage(index));
        };
        match shared.total_pages() {
            TotalPages::Pending => return Err(CacheError::Unavailable("total pages not yet known")),
            TotalPages::Known(total) if index >= total => return Err(CacheError::NoSuchPage(index)),
            TotalPages::Known(_) => {}
        }
        let mut store = lock_for(store, Some(shared.options.max_wait), "swap store")?;
        if shared.is_destroyed() {
            return Err(CacheError::Expired);
        }
        shared.read_page(&mut store, index)
    }

    fn header(&self, index: usize, in_memory: usize) -> PageHeader {
        PageHeader {
            page_key: Some(self.shared.key.clone()),
            current_page: index,
            in_memory_pages: in_memory,
            total_pages: self.shared.total_pages(),
        }
    }

    /// First page for a result that is handed out without registration.
    pub(crate) fn unregistered_first_page(&self) -> Result<Option<Page>> {
        let window = lock_for(&self.shared.window, Some(self.shared.options.max_wait), "page window")?;
        Ok(window.pages.get(&0).map(|page| {
            page.stamped(PageHeader {
                page_key: None,
                current_page: 0,
                in_memory_pages: window.pages.len(),
                total_pages: self.shared.total_pages(),
            })
        }))
    }

    /// Returns true once the session has been idle longer than its expiry.
    pub fn is_expired(&self) -> bool {
        match self.shared.options.expired_after {
            Some(limit) => self.idle_for() > limit,
            None => false,
        }
    }

    /// Time since the last page request.
    pub fn idle_for(&self) -> Duration {
        self.shared.idle_for()
    }

    /// Returns true once [`PagedSession::cleanup`] has succeeded.
    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    /// Tears the session down, waiting up to `timeout` for each lock
    /// (`None` waits without bound). Repeated calls after success are no-ops.
    pub fn cleanup(&self, timeout: Option<Duration>) -> Result<()> {
        let shared = &self.shared;
        if shared.is_destroyed() {
            return Ok(());
        }
        shared.cancel.store(true, Ordering::Release);
        shared.updates.stop();

        {
            let mut store = match shared.store.as_ref() {
                Some(store) => Some(lock_for(store, timeout, "swap store")?),
                None => None,
            };
            let mut window = lock_for(&shared.window, timeout, "page window")?;
            if shared.is_destroyed() {
                return Ok(());
            }
            window.pages.clear();
            shared.destroyed.store(true, Ordering::Release);
            drop(window);
            if let Some(store) = store.as_mut() {
                if let Err(err) = store.cleanup() {
                    warn!(key = %shared.key, error = %err, "session.cleanup.swap_error");
                }
            }
        }

        let mut workers = self.workers.lock();
        if let Some(updater) = workers.updater.take() {
            if updater.join().is_err() {
                warn!(key = %shared.key, "session.updater.panicked");
            }
        }
        if workers.builder.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(builder) = workers.builder.take() {
                if builder.join().is_err() {
                    warn!(key = %shared.key, "session.builder.panicked");
                }
            }
        }
        debug!(key = %shared.key, "session.cleanup.done");
        Ok(())
    }

    /// One-line diagnostic summary: window indices with the current page
    /// marked, idle time and total pages.
    pub fn describe(&self) -> String {
        let mut out = format!("session {}: pages [", self.shared.key);
        match self.shared.window.try_lock() {
            Some(window) => {
                let mut indices: Vec<usize> = window.pages.keys().copied().collect();
                indices.sort_unstable();
                for (pos, index) in indices.iter().enumerate() {
                    if pos > 0 {
                        out.push(' ');
                    }
                    if *index == window.current {
                        out.push('*');
                    }
                    let _ = write!(out, "{index}");
                }
            }
            None => out.push_str("busy"),
        }
        let total = match self.total_pages() {
            TotalPages::Known(total) => total.to_string(),
            TotalPages::Pending => "?".to_owned(),
        };
        let _ = write!(
            out,
            "] idle {}ms total {total}",
            self.idle_for().as_millis()
        );
        out
    }
}

#[cfg(test)]
impl PagedSession {
    pub(crate) fn with_window_held<R>(&self, f: impl FnOnce() -> R) -> R {
        let _window = self.shared.window.lock();
        f()
    }
}

impl Drop for PagedSession {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.updates.stop();
    }
}
