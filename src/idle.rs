//! Cooperative back-off policies applied when an agent's duty cycle finds no
//! work. These are the only places a driver thread is allowed to park.

use std::hint::spin_loop;
use std::thread;
use std::time::Duration;

use crate::counters::Counter;

/// Status value directing a controllable strategy to do nothing at all
pub const CONTROLLABLE_NOOP: i64 = 1;
/// Status value directing a controllable strategy to busy-spin
pub const CONTROLLABLE_BUSY_SPIN: i64 = 2;
/// Status value directing a controllable strategy to yield the thread
pub const CONTROLLABLE_YIELD: i64 = 3;
/// Status value directing a controllable strategy to park
pub const CONTROLLABLE_PARK: i64 = 4;

/// Idle strategy applied between duty cycles. Strategies with state are
/// cloned per runner, never shared.
#[derive(Clone)]
pub enum IdleStrategy {
    /// Do nothing at all; burns a core for the lowest possible latency
    NoOp,
    /// Busy-spin with a CPU relax hint
    Busy,
    /// Yield the thread back to the scheduler
    Yield,
    /// Park for a fixed duration
    Sleep(Duration),
    /// Spin, then yield, then park with exponential back-off
    Backoff {
        /// Spins before the strategy starts yielding
        max_spins: u64,
        /// Yields before the strategy starts parking
        max_yields: u64,
        /// First park duration
        min_park: Duration,
        /// Park duration ceiling
        max_park: Duration,
        /// Spins taken since the last work
        spins: u64,
        /// Yields taken since the last work
        yields: u64,
        /// Next park duration
        park: Duration,
    },
    /// Strategy selected at runtime through a shared counter slot, writable
    /// by operators while the driver runs
    Controllable {
        /// Slot carrying one of the `CONTROLLABLE_*` status values
        status: Counter,
        /// Park duration used in the park mode
        park: Duration,
    },
}

impl IdleStrategy {
    /// Back-off strategy with the driver's stock shape
    pub fn backoff(
        max_spins: u64,
        max_yields: u64,
        min_park: Duration,
        max_park: Duration,
    ) -> IdleStrategy {
        IdleStrategy::Backoff {
            max_spins,
            max_yields,
            min_park,
            max_park,
            spins: 0,
            yields: 0,
            park: min_park,
        }
    }

    /// Controllable strategy bound to a status counter slot
    pub fn controllable(status: Counter, park: Duration) -> IdleStrategy {
        IdleStrategy::Controllable { status, park }
    }

    /// Apply the strategy given the work count of the last duty cycle.
    /// Non-zero work resets any accumulated back-off.
    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        match self {
            IdleStrategy::NoOp => {}
            IdleStrategy::Busy => spin_loop(),
            IdleStrategy::Yield => thread::yield_now(),
            IdleStrategy::Sleep(duration) => thread::sleep(*duration),
            IdleStrategy::Backoff {
                max_spins,
                max_yields,
                max_park,
                spins,
                yields,
                park,
                ..
            } => {
                if *spins < *max_spins {
                    *spins += 1;
                    spin_loop();
                } else if *yields < *max_yields {
                    *yields += 1;
                    thread::yield_now();
                } else {
                    thread::sleep(*park);
                    *park = ::std::cmp::min(*park * 2, *max_park);
                }
            }
            IdleStrategy::Controllable { status, park } => match status.get() {
                CONTROLLABLE_NOOP => {}
                CONTROLLABLE_BUSY_SPIN => spin_loop(),
                CONTROLLABLE_YIELD => thread::yield_now(),
                _ => thread::sleep(*park),
            },
        }
    }

    /// Discard accumulated back-off state
    pub fn reset(&mut self) {
        if let IdleStrategy::Backoff {
            min_park,
            spins,
            yields,
            park,
            ..
        } = self
        {
            *spins = 0;
            *yields = 0;
            *park = *min_park;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_escalates_and_resets() {
        let mut strategy = IdleStrategy::backoff(
            2,
            2,
            Duration::from_nanos(1),
            Duration::from_nanos(8),
        );

        for _ in 0..6 {
            strategy.idle(0);
        }
        match &strategy {
            IdleStrategy::Backoff { spins, yields, park, .. } => {
                assert_eq!(*spins, 2);
                assert_eq!(*yields, 2);
                assert_eq!(*park, Duration::from_nanos(4));
            }
            _ => unreachable!(),
        }

        strategy.idle(1);
        match &strategy {
            IdleStrategy::Backoff { spins, yields, park, .. } => {
                assert_eq!(*spins, 0);
                assert_eq!(*yields, 0);
                assert_eq!(*park, Duration::from_nanos(1));
            }
            _ => unreachable!(),
        }
    }
}
