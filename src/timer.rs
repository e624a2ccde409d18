//! Optional high-resolution timer enablement on Windows hosts. Park-based
//! idle strategies are only as precise as the scheduler clock, so latency
//! sensitive deployments opt in through the context. A no-op elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether some driver in this process already enabled the timer, so
/// concurrent instances neither double-enable nor disable it from under each
/// other.
static TIMER_ENABLED: AtomicBool = AtomicBool::new(false);

#[cfg(windows)]
mod sys {
    #[link(name = "winmm")]
    extern "system" {
        pub fn timeBeginPeriod(period: u32) -> u32;
        pub fn timeEndPeriod(period: u32) -> u32;
    }

    pub const RESOLUTION_MS: u32 = 1;
}

/// RAII guard over the platform timer. Disables the timer on drop only if
/// this guard was the one that enabled it.
pub struct HighResTimerGuard {
    enabled_here: bool,
}

impl HighResTimerGuard {
    /// Enable the high-resolution timer if no other driver in this process
    /// holds it already.
    pub fn enable() -> HighResTimerGuard {
        let enabled_here = !TIMER_ENABLED.swap(true, Ordering::SeqCst);

        #[cfg(windows)]
        {
            if enabled_here {
                unsafe {
                    sys::timeBeginPeriod(sys::RESOLUTION_MS);
                }
            }
        }

        HighResTimerGuard { enabled_here }
    }

    /// Whether this guard owns the enablement
    pub fn enabled_here(&self) -> bool {
        self.enabled_here
    }
}

impl Drop for HighResTimerGuard {
    fn drop(&mut self) {
        if self.enabled_here {
            #[cfg(windows)]
            unsafe {
                sys::timeEndPeriod(sys::RESOLUTION_MS);
            }
            TIMER_ENABLED.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_guard_owns_the_timer() {
        let first = HighResTimerGuard::enable();
        let second = HighResTimerGuard::enable();

        assert!(first.enabled_here());
        assert!(!second.enabled_here());

        drop(second);
        // First guard still owns the enablement
        assert!(TIMER_ENABLED.load(Ordering::SeqCst));
        drop(first);
        assert!(!TIMER_ENABLED.load(Ordering::SeqCst));
    }
}
