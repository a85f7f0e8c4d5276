use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic microsecond clock used for edge timestamps and timer deadlines.
///
/// - now_us(): microseconds since the clock's epoch
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - us_since(): elapsed microseconds from an earlier timestamp
pub trait Clock {
    fn now_us(&self) -> u64;
    fn sleep(&self, d: Duration);

    /// Microseconds elapsed since `earlier_us`, saturating at 0 on underflow.
    fn us_since(&self, earlier_us: u64) -> u64 {
        self.now_us().saturating_sub(earlier_us)
    }
}

/// Real-time monotonic clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_us(&self) -> u64 {
        let us = self.epoch.elapsed().as_micros();
        us.min(u128::from(u64::MAX)) as u64
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// Clones share the same time base, so a simulator and the code under test
/// can hold separate handles. sleep(d) advances time by d without blocking.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `us` microseconds.
    pub fn advance_us(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp. Moving backwards is ignored.
    pub fn set_us(&self, us: u64) {
        self.now.fetch_max(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.advance_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance_us(250);
        assert_eq!(b.now_us(), 250);
        b.sleep(Duration::from_micros(50));
        assert_eq!(a.now_us(), 300);
    }

    #[test]
    fn manual_clock_never_goes_backwards() {
        let c = ManualClock::new();
        c.set_us(1_000);
        c.set_us(10);
        assert_eq!(c.now_us(), 1_000);
        assert_eq!(c.us_since(400), 600);
        assert_eq!(c.us_since(5_000), 0);
    }

    #[test]
    fn monotonic_clock_advances() {
        let c = MonotonicClock::new();
        let t0 = c.now_us();
        c.sleep(Duration::from_millis(1));
        assert!(c.now_us() >= t0 + 1_000);
    }
}
