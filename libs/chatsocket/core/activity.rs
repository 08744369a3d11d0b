//! Inbound activity tracker
//!
//! Records when traffic was last observed on the connection so the
//! heartbeat can tell an idle-but-alive socket from a dead one. Timestamps
//! are stored as milliseconds since an internal epoch so they fit in atomics
//! and can be read from client handles without locking.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks the last observed activity
pub struct ActivityTracker {
    /// Monotonic epoch (tokio clock, so paused-time tests see it move)
    epoch: Instant,
    /// Last activity, ms since epoch; 0 = never
    last_activity_ms: AtomicU64,
    /// Wall-clock of the last activity, unix ms; 0 = never
    last_activity_unix_ms: AtomicI64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            last_activity_unix_ms: AtomicI64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps a record made at the epoch distinguishable from "never"
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Record that traffic was just observed
    pub fn record(&self) {
        self.last_activity_ms.store(self.now_ms(), Ordering::Release);
        self.last_activity_unix_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Time since the last recorded activity
    ///
    /// Returns `None` if nothing was ever recorded.
    pub fn idle_for(&self) -> Option<Duration> {
        let last = self.last_activity_ms.load(Ordering::Acquire);
        if last == 0 {
            return None;
        }
        Some(Duration::from_millis(self.now_ms().saturating_sub(last)))
    }

    /// Wall-clock time of the last recorded activity
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        let ms = self.last_activity_unix_ms.load(Ordering::Acquire);
        if ms == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(ms).single()
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
