use std::hint;
use std::thread;
use std::time::Duration;

/// Adaptive backoff for blocking waits on the fabric.
///
/// Progressively increases wait time: spin with PAUSE → yield to OS → short park.
/// A blocking wait never gives up; once the yield budget is spent every further
/// round parks the calling execution unit for [`Backoff::PARK_INTERVAL`].
#[derive(Debug)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6; // 2^6 = 64 spins max before yielding
    const YIELD_LIMIT: u32 = 10; // Then park

    /// Park duration once spinning and yielding are exhausted.
    pub(crate) const PARK_INTERVAL: Duration = Duration::from_micros(50);

    /// Creates a new backoff instance.
    #[inline]
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    /// Light spin with PAUSE hints.
    #[inline]
    fn spin(&mut self) {
        let spins = 1 << self.step.min(Self::SPIN_LIMIT);
        for _ in 0..spins {
            hint::spin_loop();
        }
        if self.step <= Self::SPIN_LIMIT {
            self.step += 1;
        }
    }

    /// Heavier backoff: spin, then yield, then park.
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            self.spin();
        } else if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
            self.step += 1;
        } else {
            thread::park_timeout(Self::PARK_INTERVAL);
        }
    }

    /// True once the wait has fallen through to parking.
    #[cfg(test)]
    fn is_parking(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }

    /// Reset for next wait cycle.
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
