//! Wall-clock port. Monotonic-free, UTC only — DeltaService only ever needs
//! `now()` for metadata timestamps and duration logging.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;

impl Clock for UtcClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A clock that starts at a fixed instant and advances only when
    /// [`FixedClock::advance`] is called — keeps duration-based assertions
    /// in tests deterministic.
    pub struct FixedClock {
        millis: AtomicI64,
    }

    impl FixedClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        pub fn advance(&self, delta: chrono::Duration) {
            self.millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap()
        }
    }
}
