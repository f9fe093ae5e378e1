use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};

/// Source of time for throttling and timestamping.
///
/// `elapsed` is monotonic time since the clock was created and drives the
/// write throttle. `utc_now` is wall-clock time and is only used for stamps
/// (sidecar names, store modification times).
pub trait Clock: Send + Sync {
    fn utc_now(&self) -> DateTime<Utc>;

    fn elapsed(&self) -> Duration;
}

pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A clock that only moves when told to. Advancing it moves both the
/// monotonic and the wall-clock reading by the same amount.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

struct ManualState {
    utc: DateTime<Utc>,
    elapsed: Duration,
}

impl ManualClock {
    pub fn new(utc: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                utc,
                elapsed: Duration::ZERO,
            }),
        }
    }

    /// Start at a fixed Unix timestamp (seconds).
    pub fn at_unix(secs: i64) -> Self {
        let utc = Utc.timestamp_opt(secs, 0).single().unwrap_or_default();
        Self::new(utc)
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.elapsed += by;
        if let Ok(delta) = chrono::Duration::from_std(by) {
            state.utc += delta;
        }
    }

    /// Jump the wall clock without touching monotonic time.
    pub fn set_utc(&self, utc: DateTime<Utc>) {
        self.lock().utc = utc;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A panic while holding this lock cannot leave the state torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn utc_now(&self) -> DateTime<Utc> {
        self.lock().utc
    }

    fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }
}

/// UTC stamp used in sidecar file names, e.g. `20260221_040000`.
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
