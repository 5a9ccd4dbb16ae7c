//! Background sweep of parked and expired sessions.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use super::CacheInner;
use crate::primitives::concurrency::Wake;
use crate::types::Result;

pub(super) fn spawn(inner: Arc<CacheInner>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("pagecache-sweeper".to_owned())
        .spawn(move || sweep_loop(inner))?;
    Ok(handle)
}

fn sweep_loop(inner: Arc<CacheInner>) {
    let interval = inner.options.cleanup_interval();
    loop {
        let wake = inner.sweep_signal.wait(interval);
        if wake == Wake::Stopped {
            break;
        }
        match inner.sweep() {
            Ok(stats) => {
                if stats.is_empty() {
                    trace!(?wake, "cache.sweep.idle");
                } else {
                    debug!(
                        reclaimed = stats.reclaimed,
                        expired = stats.expired,
                        parked = stats.parked,
                        "cache.sweep.finish"
                    );
                }
                if tracing::enabled!(tracing::Level::TRACE) {
                    for line in inner.describe() {
                        trace!(session = %line, "cache.sweep.session");
                    }
                }
            }
            Err(err) => debug!(error = %err, "cache.sweep.deferred"),
        }
    }
    trace!("cache.sweeper.exit");
}
