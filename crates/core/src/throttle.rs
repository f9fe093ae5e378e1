use std::time::Duration;

/// Rate limit for local save writes. Pure timing logic: the caller performs
/// the write when told to and polls [`WriteThrottle::try_flush`] each tick.
///
/// `now` is monotonic time since startup. No two non-forced writes are ever
/// allowed closer together than `min_interval`; a forced write bypasses the
/// window but restarts it once marked persisted.
#[derive(Debug, Clone)]
pub struct WriteThrottle {
    min_interval: Duration,
    last_persist: Option<Duration>,
    pending: bool,
}

impl WriteThrottle {
    /// A zero interval disables throttling.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_persist: None,
            pending: false,
        }
    }

    /// Build from seconds; negative or non-finite values disable throttling
    /// and values past `Duration::MAX` saturate.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::new(Duration::ZERO);
        }
        Self::new(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending
    }

    /// Returns true when the write should happen now. Otherwise the request
    /// is remembered and false is returned.
    pub fn request(&mut self, now: Duration, force_immediate: bool) -> bool {
        if force_immediate || self.can_persist(now) {
            return true;
        }
        self.pending = true;
        false
    }

    /// True only if a request is owed and the interval has elapsed.
    pub fn try_flush(&self, now: Duration) -> bool {
        self.pending && self.can_persist(now)
    }

    pub fn mark_persisted(&mut self, now: Duration) {
        self.last_persist = Some(now);
        self.pending = false;
    }

    pub fn mark_pending(&mut self) {
        self.pending = true;
    }

    fn can_persist(&self, now: Duration) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        match self.last_persist {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.min_interval,
        }
    }
}
