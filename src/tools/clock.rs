//! Time source used when stamping new entities.

use chrono::{DateTime, Utc};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A shareable source of the current time.
///
/// Production code uses the system clock, tests plug in a deterministic sequence so that the
/// order of created entities is known up front.
#[derive(Clone)]
pub struct Clock {
    now: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Clock {
    pub fn system() -> Self {
        Clock {
            now: Arc::new(Utc::now),
        }
    }

    pub fn from_fn(now: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Clock { now: Arc::new(now) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::system()
    }
}

impl Debug for Clock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Clock")
    }
}

#[cfg(test)]
pub mod test {
    use super::Clock;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Yields `start`, `start + 1s`, `start + 2s`, ... on successive calls.
    pub fn ticking_clock(start: DateTime<Utc>) -> Clock {
        let ticks = AtomicI64::new(0);
        Clock::from_fn(move || start + Duration::seconds(ticks.fetch_add(1, Ordering::SeqCst)))
    }

    #[test]
    fn ticking_clock_advances_one_second_per_call() {
        let start = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = ticking_clock(start);

        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + Duration::seconds(1));
    }
}
