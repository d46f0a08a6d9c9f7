//! Connection Heartbeat
//!
//! Liveness check for the upstream socket. The connection loop calls
//! [`HeartbeatMonitor::on_tick`] on every heartbeat interval; the monitor
//! answers with either a ping to send or a verdict that the peer is gone.
//! Any inbound frame counts as proof of life, so a busy feed never needs a
//! ping round-trip.

use std::time::{Duration, Instant};

use crate::infrastructure::config::UpstreamSettings;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between liveness checks.
    pub ping_interval: Duration,
    /// Silence after which the connection is declared dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&UpstreamSettings> for HeartbeatConfig {
    fn from(settings: &UpstreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the connection loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing to do; traffic arrived recently.
    Idle,
    /// Send a ping frame.
    SendPing,
    /// No traffic for longer than the timeout; drop the connection.
    TimedOut(Duration),
}

/// Per-connection liveness tracker.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_seen: Instant,
    ping_outstanding: bool,
}

impl HeartbeatMonitor {
    /// Start tracking a freshly opened connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_seen: Instant::now(),
            ping_outstanding: false,
        }
    }

    /// Interval at which [`Self::on_tick`] should be called.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// Record inbound traffic of any kind, pongs included.
    pub fn record_activity(&mut self) {
        self.last_seen = Instant::now();
        self.ping_outstanding = false;
    }

    /// Whether a ping is awaiting an answer.
    #[must_use]
    pub const fn ping_outstanding(&self) -> bool {
        self.ping_outstanding
    }

    /// Decide what to do at `now`.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        let silent_for = now.saturating_duration_since(self.last_seen);
        if silent_for > self.config.pong_timeout {
            return HeartbeatAction::TimedOut(silent_for);
        }
        if silent_for < self.config.ping_interval {
            return HeartbeatAction::Idle;
        }
        self.ping_outstanding = true;
        HeartbeatAction::SendPing
    }
}
