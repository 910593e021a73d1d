//! Poll-loop timing.
//!
//! A [`Deadline`] is computed once, when the trigger is issued, and never
//! extended. Sleeps between samples are capped at the time remaining so the last
//! sample lands on (not after) the deadline.

use std::thread;
use std::time::{Duration, Instant};

/// Fixed point in time after which a wait gives up.
///
/// A timeout too large to represent as an `Instant` yields a deadline that
/// never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    timeout: Duration,
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` after now.
    pub fn after(timeout: Duration) -> Self {
        Self::starting_at(Instant::now(), timeout)
    }

    /// Deadline `timeout` after `start`.
    pub fn starting_at(start: Instant, timeout: Duration) -> Self {
        Self {
            timeout,
            at: start.checked_add(timeout),
        }
    }

    /// Total length of the window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` if `now` is at or past the deadline.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.at.is_some_and(|at| now >= at)
    }

    /// Time left before the deadline, zero once expired and `Duration::MAX`
    /// for a deadline that never expires.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        match self.at {
            Some(at) => at.saturating_duration_since(now),
            None => Duration::MAX,
        }
    }

    /// Sleeps for one poll interval, or less if the deadline is closer.
    pub fn sleep_poll(&self, interval: Duration) {
        let nap = interval.min(self.remaining_at(Instant::now()));
        if !nap.is_zero() {
            trace!("poll sleep {} ms", nap.as_millis());
            thread::sleep(nap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_window() {
        let start = Instant::now();
        let d = Deadline::starting_at(start, Duration::from_millis(50));
        assert_eq!(d.timeout(), Duration::from_millis(50));
        assert!(!d.is_expired_at(start));
        assert_eq!(d.remaining_at(start), Duration::from_millis(50));
        assert!(d.is_expired_at(start + Duration::from_millis(50)));
        assert_eq!(d.remaining_at(start + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_deadline_zero_timeout_is_expired() {
        let start = Instant::now();
        let d = Deadline::starting_at(start, Duration::ZERO);
        assert!(d.is_expired_at(start));
    }

    #[test]
    fn test_sleep_poll_capped_by_deadline() {
        let d = Deadline::after(Duration::from_millis(5));
        let before = Instant::now();
        d.sleep_poll(Duration::from_secs(10));
        assert!(before.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unrepresentable_deadline_never_expires() {
        let start = Instant::now();
        let d = Deadline::starting_at(start, Duration::MAX);
        assert_eq!(d.timeout(), Duration::MAX);
        assert!(!d.is_expired_at(start + Duration::from_secs(3600)));
        assert_eq!(d.remaining_at(start), Duration::MAX);

        let before = Instant::now();
        d.sleep_poll(Duration::from_millis(1));
        assert!(before.elapsed() < Duration::from_secs(5));
    }
}
