//! Wall-clock and monotonic time sources, injectable for deterministic tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds-since-epoch wall clock. Implementations must be thread-safe
/// and must not allocate.
pub trait EpochClock: Send + Sync {
    /// Current wall-clock time in milliseconds since 1 Jan 1970, UTC
    fn time_ms(&self) -> i64;
}

/// Monotonic nanosecond clock. Implementations must be thread-safe and must
/// not allocate. Values are only meaningful relative to each other.
pub trait NanoClock: Send + Sync {
    /// Nanoseconds elapsed on a monotonic timeline
    fn nano_time(&self) -> i64;
}

/// Wall clock backed by the host system time.
#[derive(Default)]
pub struct SystemEpochClock;

impl EpochClock for SystemEpochClock {
    fn time_ms(&self) -> i64 {
        // UNWRAP: System clocks predating 1970 are not supported
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    }
}

/// Monotonic clock measuring from its own construction instant.
pub struct SystemNanoClock {
    origin: Instant,
}

impl Default for SystemNanoClock {
    fn default() -> Self {
        SystemNanoClock {
            origin: Instant::now(),
        }
    }
}

impl NanoClock for SystemNanoClock {
    fn nano_time(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Manually advanced clock for deterministic tests. Serves as both an epoch
/// and a nano clock; the stored value is interpreted per trait.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock starting at `now`
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(ManualClock {
            now: AtomicI64::new(now),
        })
    }

    /// Overwrite the current reading
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the current reading by `delta`
    pub fn advance(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl EpochClock for ManualClock {
    fn time_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl NanoClock for ManualClock {
    fn nano_time(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_nano_clock_is_monotonic() {
        let clock = SystemNanoClock::default();
        let first = clock.nano_time();
        let second = clock.nano_time();
        assert!(second >= first);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(EpochClock::time_ms(&*clock), 150);
    }
}
