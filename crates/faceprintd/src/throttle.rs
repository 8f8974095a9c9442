use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Rejects attempts that arrive sooner than `min_interval` after the last
/// accepted one.
pub struct Throttle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Accept an attempt at `now`, or return how long the caller must wait.
    pub fn try_acquire(&self, now: Instant) -> Result<(), Duration> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let elapsed = now.saturating_duration_since(prev);
            if elapsed < self.min_interval {
                return Err(self.min_interval - elapsed);
            }
        }
        *last = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_accepted() {
        let t = Throttle::new(Duration::from_secs(1));
        assert!(t.try_acquire(Instant::now()).is_ok());
    }

    #[test]
    fn test_rejects_within_interval() {
        let t = Throttle::new(Duration::from_millis(1000));
        let start = Instant::now();
        t.try_acquire(start).unwrap();

        let wait = t.try_acquire(start + Duration::from_millis(400)).unwrap_err();
        assert_eq!(wait, Duration::from_millis(600));

        // Rejected attempts do not reset the window.
        assert!(t.try_acquire(start + Duration::from_millis(1000)).is_ok());
        assert!(t.try_acquire(start + Duration::from_millis(1500)).is_err());
    }

    #[test]
    fn test_zero_interval_never_throttles() {
        let t = Throttle::new(Duration::ZERO);
        let now = Instant::now();
        assert!(t.try_acquire(now).is_ok());
        assert!(t.try_acquire(now).is_ok());
    }
}
