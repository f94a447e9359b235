//! Per-source admission control for the intake.
//!
//! The first submission of a key opens a window; repeats inside it are suppressed. The key map is
//! bounded: once it holds more than `max_keys` entries, the older half is dropped.

use crate::clock::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of [`SourceThrottle::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    /// The key was admitted this recently; the submission is dropped.
    Suppressed {
        /// Time left in the key's window.
        wait: Duration,
    },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Leading-edge throttle keyed by interaction source.
#[derive(Debug)]
pub struct SourceThrottle {
    clock: Arc<dyn Clock>,
    window: Duration,
    max_keys: usize,
    // key -> when its current window opened (ms since epoch)
    opened: Mutex<HashMap<String, u64>>,
}

impl SourceThrottle {
    pub fn new(clock: Arc<dyn Clock>, window: Duration, max_keys: usize) -> Self {
        Self { clock, window, max_keys, opened: Mutex::new(HashMap::new()) }
    }

    pub fn check(&self, key: &str) -> Decision {
        let now = self.clock.now_millis();
        let window = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(&since) = opened.get(key) {
            let elapsed = now.saturating_sub(since);
            if elapsed < window {
                return Decision::Suppressed { wait: Duration::from_millis(window - elapsed) };
            }
        }

        opened.insert(key.to_string(), now);
        if opened.len() > self.max_keys {
            let mut by_age: Vec<(u64, String)> =
                opened.iter().map(|(k, &t)| (t, k.clone())).collect();
            by_age.sort_unstable();
            let drop_count = by_age.len() / 2;
            for (_, stale) in by_age.into_iter().take(drop_count) {
                opened.remove(&stale);
            }
            tracing::trace!(dropped = drop_count, "throttle key map trimmed");
        }
        Decision::Admitted
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
