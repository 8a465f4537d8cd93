//! Token-bucket rate limiting for outgoing requests.
//!
//! `burst` requests may go out back-to-back; after that one slot refills
//! every `period`. Idle time banks at most `burst` slots:
//!
//! ```text
//!  next_allowed_at is never older than  now - period * (burst - 1)
//!
//!  check():  now < next_allowed_at  → wait (next_allowed_at - now), no slot used
//!            otherwise              → 0, next_allowed_at += period
//! ```
//!
//! Every call that returns zero consumes a slot, so only call
//! [`Throttler::check`] when you are about to send.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use zoomcanvas_blocks::Clock;

/// Token-bucket limiter with burst capacity.
#[derive(Debug)]
pub struct Throttler {
    period_ms: i64,
    burst: i64,
    next_allowed_at: i64,
    clock: Arc<dyn Clock>,
}

impl Throttler {
    /// A burst of zero is treated as one.
    pub fn new(period: Duration, burst: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            period_ms: period.as_millis() as i64,
            burst: i64::from(burst.max(1)),
            next_allowed_at: i64::MIN,
            clock,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms as u64)
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    /// Take a slot now, or learn how long until one is free.
    pub fn check(&mut self) -> Duration {
        let now = self.clock.now_millis() as i64;
        Duration::from_millis(self.check_at(now))
    }

    /// [`check`](Self::check) at an explicit time, in milliseconds.
    pub fn check_at(&mut self, now_ms: i64) -> u64 {
        let backlog = now_ms - self.period_ms * (self.burst - 1);
        if self.next_allowed_at < backlog {
            self.next_allowed_at = backlog;
        }
        if now_ms < self.next_allowed_at {
            return (self.next_allowed_at - now_ms) as u64;
        }
        self.next_allowed_at += self.period_ms;
        0
    }
}

/// Milliseconds on tokio's clock, so paused-time tests stay deterministic.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoomcanvas_blocks::ManualClock;

    const PERIOD: i64 = 1357;

    fn throttler(clock: Arc<ManualClock>) -> Throttler {
        Throttler::new(Duration::from_millis(PERIOD as u64), 6, clock)
    }

    #[test]
    fn test_burst_then_wait() {
        let mut t = throttler(Arc::new(ManualClock::new(0)));
        let mut now = 1_700_000_000_000;

        for _ in 0..6 {
            assert_eq!(t.check_at(now), 0);
        }
        assert_eq!(t.check_at(now), 1357);
        // waiting does not consume a slot
        assert_eq!(t.check_at(now), 1357);

        now += 100;
        assert_eq!(t.check_at(now), 1257);

        now += 1258;
        assert_eq!(t.check_at(now), 0);
        assert_eq!(t.check_at(now), 1356);
    }

    #[test]
    fn test_slot_refills_after_period() {
        let mut t = throttler(Arc::new(ManualClock::new(0)));
        let now = 50_000;
        for _ in 0..6 {
            assert_eq!(t.check_at(now), 0);
        }
        assert_eq!(t.check_at(now), PERIOD as u64);
        assert_eq!(t.check_at(now + PERIOD), 0);
    }

    #[test]
    fn test_idle_time_banks_only_burst() {
        let mut t = throttler(Arc::new(ManualClock::new(0)));
        let mut now = 1_700_000_000_000;
        for _ in 0..7 {
            t.check_at(now);
        }

        now += PERIOD * 20;
        for _ in 0..6 {
            assert_eq!(t.check_at(now), 0);
            now += 50;
        }
        assert_eq!(t.check_at(now), (PERIOD - 300) as u64);
    }

    #[test]
    fn test_check_reads_clock() {
        let clock = Arc::new(ManualClock::new(10_000));
        let mut t = Throttler::new(Duration::from_millis(100), 2, clock.clone());
        assert_eq!(t.check(), Duration::ZERO);
        assert_eq!(t.check(), Duration::ZERO);
        assert_eq!(t.check(), Duration::from_millis(100));
        clock.advance(40);
        assert_eq!(t.check(), Duration::from_millis(60));
        clock.advance(60);
        assert_eq!(t.check(), Duration::ZERO);
    }

    #[test]
    fn test_zero_burst_acts_as_one() {
        let mut t = Throttler::new(Duration::from_millis(10), 0, Arc::new(ManualClock::new(0)));
        assert_eq!(t.burst(), 1);
        assert_eq!(t.check_at(100), 0);
        assert_eq!(t.check_at(100), 10);
    }
}
