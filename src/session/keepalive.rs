//! Keepalive supervision state for one session.
//!
//! The session only tracks the deadline; the transport adapter owns the
//! periodic check and injects a `KeepaliveTimeout` shutdown when
//! `expired` reports true.

use std::time::{Duration, Instant};

/// Per-session keepalive window, armed at CONNECT accept time.
///
/// The window is 1.25x the interval the client advertised, rounded up to a
/// whole second (MQTT allows the server a half keepalive of grace; 1.25x is
/// the conventional check point). An interval of zero leaves the session
/// unsupervised.
#[derive(Debug, Clone)]
pub struct Keepalive {
    window: Option<Duration>,
    last_activity: Instant,
}

impl Keepalive {
    pub fn disarmed(now: Instant) -> Self {
        Self {
            window: None,
            last_activity: now,
        }
    }

    pub fn arm(&mut self, interval_secs: u16, now: Instant) {
        self.window = if interval_secs == 0 {
            None
        } else {
            // ceil(interval * 1.25) in integer seconds
            Some(Duration::from_secs((u64::from(interval_secs) * 5 + 3) / 4))
        };
        self.last_activity = now;
    }

    /// Record client activity; every inbound packet counts.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn expired(&self, now: Instant) -> bool {
        match self.window {
            Some(window) => now.duration_since(self.last_activity) >= window,
            None => false,
        }
    }

    /// The armed check window, if any.
    pub fn window(&self) -> Option<Duration> {
        self.window
    }
}
