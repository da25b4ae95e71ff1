// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Warn-level logger for diagnostics that can repeat at block rate
/// (queue overflow, audio stream hiccups).
///
/// A message is emitted when it differs from the previous one or when the
/// interval has elapsed; repeats in between are counted and reported with
/// the next emitted line.
pub struct RateLimitedLog {
    label: &'static str,
    interval: Duration,
    state: Mutex<LogState>,
}

#[derive(Default)]
struct LogState {
    last_message: Option<String>,
    last_logged_at: Option<Instant>,
    suppressed: u64,
}

impl RateLimitedLog {
    pub fn new(label: &'static str) -> Self {
        Self::with_interval(label, DEFAULT_LOG_INTERVAL)
    }

    pub fn with_interval(label: &'static str, interval: Duration) -> Self {
        Self {
            label,
            interval,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Log `message`, or count it if it is a recent repeat. Returns whether a
    /// line was emitted.
    pub fn log(&self, message: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let should_log_now = match (&state.last_message, state.last_logged_at) {
            (Some(prev), Some(ts)) => prev != message || now.duration_since(ts) >= self.interval,
            _ => true,
        };

        if !should_log_now {
            state.suppressed += 1;
            return false;
        }

        if state.suppressed > 0 {
            warn!(
                "{} repeated {} times: {}",
                self.label,
                state.suppressed,
                state.last_message.as_deref().unwrap_or("<unknown>")
            );
        }
        warn!("{}: {}", self.label, message);
        state.last_message = Some(message.to_string());
        state.last_logged_at = Some(now);
        state.suppressed = 0;
        true
    }

    pub fn suppressed(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .suppressed
    }
}
