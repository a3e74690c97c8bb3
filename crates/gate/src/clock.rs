//! Wall-clock abstraction used for cache expiry and error timestamps.
//!
//! In-process waits (limiter refill, breaker recovery, backoff) use
//! `tokio::time::Instant` and are controlled in tests by pausing tokio time.
//! Cache entries outlive the process, so their expiry is measured in UTC and
//! goes through [`Clock`] instead.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Utc};

    use super::Clock;

    /// Controllable clock. Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current: Arc::new(Mutex::new(start)),
            }
        }

        pub fn advance(&self, duration: std::time::Duration) {
            let mut time = self.current.lock().unwrap_or_else(|p| p.into_inner());
            let next = chrono::Duration::from_std(duration)
                .ok()
                .and_then(|step| time.checked_add_signed(step))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            *time = next;
        }

        pub fn set(&self, time: DateTime<Utc>) {
            *self.current.lock().unwrap_or_else(|p| p.into_inner()) = time;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Utc::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.current.lock().unwrap_or_else(|p| p.into_inner())
        }
    }
}
