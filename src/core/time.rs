use std::time::{Duration, Instant};
use tokio::time::Sleep;

/// Time source for the session's retry and keepalive arithmetic.
///
/// Sessions never read the system clock directly: retransmit timers sleep
/// through this trait and keepalive deadlines compare against its `now`,
/// which keeps the whole engine runnable under tokio's paused test clock.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Current instant, recorded on every inbound packet for keepalive
    /// bookkeeping.
    fn now(&self) -> Instant;

    /// Timer future; one of these backs every armed retransmit timer.
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Wall-clock implementation backed by the tokio timer wheel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        tokio::time::sleep(duration)
    }
}
