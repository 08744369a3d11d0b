//! Heartbeat liveness policy
//!
//! # Architecture
//!
//! The connection task owns one [`HeartbeatMonitor`] and a deadline for the
//! next tick. The monitor itself does no I/O; it only decides what a tick
//! means:
//!
//! ```text
//! tick ──> idle < threshold ─────────────> Skip
//!      └─> idle >= threshold ──> missed += 1
//!                                  ├─ missed <= max_missed ──> Ping   (send probe)
//!                                  └─ missed >  max_missed ──> Expire (force close)
//!
//! any inbound frame ──> missed = 0
//! ```
//!
//! A "miss" is an interval that ended with the socket idle and a probe had to
//! be sent. It is cleared by ANY inbound traffic, not only by a matching
//! pong, so a chatty server never needs to answer pings.
//!
//! While the application is hidden/backgrounded the tick interval doubles;
//! the idle threshold does not.

use std::time::Duration;

/// Heartbeat configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatPolicy {
    /// Time between liveness checks
    pub interval: Duration,
    /// Idle time after which a check counts as a miss (defaults to `interval`)
    pub idle_threshold: Duration,
    /// Misses tolerated before the connection is declared dead
    pub max_missed: u32,
}

impl HeartbeatPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            idle_threshold: interval,
            max_missed: 2,
        }
    }

    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    pub fn with_max_missed(mut self, max_missed: u32) -> Self {
        self.max_missed = max_missed;
        self
    }
}

/// What the connection task should do on a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Recent traffic; nothing to do
    Skip,
    /// Idle; send a probe (`missed` consecutive misses so far)
    Ping { missed: u32 },
    /// Too many misses; force-close the connection
    Expire { missed: u32 },
}

/// Miss counter and interval bookkeeping for one client
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    policy: HeartbeatPolicy,
    missed: u32,
    hidden: bool,
}

impl HeartbeatMonitor {
    pub fn new(policy: HeartbeatPolicy) -> Self {
        Self {
            policy,
            missed: 0,
            hidden: false,
        }
    }

    pub fn policy(&self) -> &HeartbeatPolicy {
        &self.policy
    }

    /// Current tick interval (doubled while hidden)
    pub fn interval(&self) -> Duration {
        if self.hidden {
            self.policy.interval.saturating_mul(2)
        } else {
            self.policy.interval
        }
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Evaluate one tick given the time since the last inbound activity
    pub fn on_tick(&mut self, idle: Duration) -> HeartbeatAction {
        if idle < self.policy.idle_threshold {
            return HeartbeatAction::Skip;
        }
        self.missed = self.missed.saturating_add(1);
        if self.missed > self.policy.max_missed {
            HeartbeatAction::Expire {
                missed: self.missed,
            }
        } else {
            HeartbeatAction::Ping {
                missed: self.missed,
            }
        }
    }

    /// Inbound traffic observed
    pub fn on_activity(&mut self) {
        self.missed = 0;
    }

    /// Start over for a fresh connection
    pub fn reset(&mut self) {
        self.missed = 0;
    }
}
