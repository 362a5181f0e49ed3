//! Monotonic time source
//!
//! Timers in the session cache compare against `Clock::now()` rather than
//! `Instant::now()` so tests can step time explicitly.

use std::time::Instant;

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use super::Clock;
    use std::cell::Cell;
    use std::time::{Duration, Instant};

    pub struct ManualClock {
        now: Cell<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Cell::new(Instant::now()),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }
}
