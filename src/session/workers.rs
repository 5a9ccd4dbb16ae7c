//! Background workers owned by a swapped session.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use super::window;
use super::{SessionShared, SwapPhase};
use crate::page::Page;
use crate::primitives::concurrency::{lock_for, StartGate, Wake};
use crate::source::SourceLease;
use crate::types::{CacheError, Result};

pub(super) fn spawn_updater(shared: Arc<SessionShared>) -> Result<JoinHandle<()>> {
    let name = format!("pagecache-updater-{}", shared.key);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || updater_loop(shared))?;
    Ok(handle)
}

pub(super) fn spawn_builder(
    shared: Arc<SessionShared>,
    lease: SourceLease,
    gate: Arc<StartGate<()>>,
) -> Result<JoinHandle<()>> {
    let name = format!("pagecache-builder-{}", shared.key);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || build_swap(shared, lease, gate))?;
    Ok(handle)
}

fn updater_loop(shared: Arc<SessionShared>) {
    let interval = shared.options.max_wait;
    loop {
        match shared.updates.wait(Some(interval)) {
            Wake::Stopped => break,
            Wake::Triggered | Wake::TimedOut => {}
        }
        if shared.is_cancelled() || shared.is_destroyed() {
            break;
        }
        match rebalance(&shared) {
            Ok(Some((loaded, evicted))) => {
                shared.metrics.rebalance_applied(loaded, evicted);
            }
            Ok(None) => {}
            Err(CacheError::Unavailable(what)) => {
                shared.metrics.rebalance_skipped();
                trace!(key = %shared.key, busy = what, "session.rebalance.skipped");
            }
            Err(err) => {
                shared.metrics.rebalance_skipped();
                warn!(key = %shared.key, error = %err, "session.rebalance.failed");
            }
        }
    }
    trace!(key = %shared.key, "session.updater.exit");
}

/// One rebalance pass. Returns `(loaded, evicted)` when the window changed.
///
/// Missing pages are read before anything is evicted, so a failed read
/// leaves the window untouched.
fn rebalance(shared: &SessionShared) -> Result<Option<(usize, usize)>> {
    let buffer = shared.options.buffer_pages;
    let total = shared.total_pages();
    let half_wait = Some(shared.options.max_wait / 2);

    let needed = {
        let window = lock_for(&shared.window, half_wait, "page window")?;
        window::plan(window.current, buffer, total, window.pages.keys().copied()).is_some()
    };
    if !needed {
        return Ok(None);
    }
    let Some(store) = shared.store.as_ref() else {
        return Ok(None);
    };

    let mut store = lock_for(store, half_wait, "swap store")?;
    let mut window = lock_for(&shared.window, half_wait, "page window")?;
    if shared.is_destroyed() {
        return Ok(None);
    }
    let Some(plan) = window::plan(window.current, buffer, total, window.pages.keys().copied())
    else {
        return Ok(None);
    };

    let mut loaded: Vec<(usize, Page)> = Vec::with_capacity(plan.missing.len());
    for &index in &plan.missing {
        loaded.push((index, shared.read_page(&mut store, index)?));
    }
    for index in &plan.dirty {
        window.pages.remove(index);
    }
    let counts = (loaded.len(), plan.dirty.len());
    window.pages.extend(loaded);
    debug!(
        key = %shared.key,
        current = window.current,
        start = plan.desired.start,
        end = plan.desired.end,
        loaded = counts.0,
        evicted = counts.1,
        "session.rebalance.applied"
    );
    Ok(Some(counts))
}

fn build_swap(shared: Arc<SessionShared>, mut lease: SourceLease, gate: Arc<StartGate<()>>) {
    let Some(store) = shared.store.as_ref() else {
        gate.open(());
        return;
    };
    let mut store = store.lock();
    gate.open(());
    trace!(key = %shared.key, seeded = store.stored(), "session.builder.start");

    let result = store.build_swap(|| lease.next_record(), || shared.is_cancelled());
    lease.release();

    let phase = match result {
        Ok(records) => {
            debug!(key = %shared.key, records, "session.builder.done");
            shared.metrics.swap_built(Some(records));
            SwapPhase::Built(records)
        }
        Err(err) => {
            warn!(key = %shared.key, error = %err, "session.builder.failed");
            shared.metrics.swap_built(None);
            SwapPhase::Failed
        }
    };
    *shared.phase.lock() = phase;
    drop(store);
    if matches!(phase, SwapPhase::Built(_)) {
        shared.updates.notify();
    }
}
