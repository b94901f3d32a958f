use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Time source handle.
///
/// The scheduler and the coordination store never call `Utc::now()` directly;
/// they read time through a `Clock` so that TTL expiry, due-ness checks and
/// jitter bounds can be exercised against simulated time.
pub trait Clock: Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as whole epoch seconds, the unit used for persisted
    /// timestamps and due-queue scores.
    fn epoch_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulation.
///
/// Time only moves when [`advance_secs`](ManualClock::advance_secs) or
/// [`set`](ManualClock::set) is called.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the given epoch second (handy for numeric assertions).
    pub fn at_epoch(secs: i64) -> Self {
        let start = DateTime::from_timestamp(secs, 0).expect("epoch seconds within chrono range");
        Self::new(start)
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
