use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::types::SessionKey;

/// Issues clock-derived session keys, unique within the process.
///
/// Each key is the current time in milliseconds, bumped past the previous
/// key when the clock has not advanced or has stepped backwards.
#[derive(Default)]
pub(crate) struct KeyGenerator {
    last: Mutex<u128>,
}

impl KeyGenerator {
    pub(crate) fn next(&self) -> SessionKey {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        self.issue(now)
    }

    fn issue(&self, now: u128) -> SessionKey {
        let mut last = self.last.lock();
        let value = now.max(last.saturating_add(1));
        *last = value;
        SessionKey::new(format!("{value:x}"))
    }
}
