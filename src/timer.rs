//! Monotonic idle timers.
//!
//! Every stateful entity in the runtime (connections, CGI sessions) owns a
//! [`Timer`] that bounds how long it may sit without progress. Timers are
//! polled once per loop iteration; nothing is preempted.

use std::time::{Duration, Instant};

/// A restartable deadline measured on the monotonic clock.
#[derive(Debug, Clone)]
pub struct Timer {
    duration: Duration,
    started: Instant,
    stopped: bool,
}

impl Timer {
    /// Creates a running timer that expires `duration` from now.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: Instant::now(),
            stopped: false,
        }
    }

    /// Restarts the countdown from now with the current duration.
    pub fn reset(&mut self) {
        self.started = Instant::now();
        self.stopped = false;
    }

    /// Restarts the countdown from now with a new duration.
    pub fn restart(&mut self, duration: Duration) {
        self.duration = duration;
        self.reset();
    }

    /// Stops the timer so it never expires until reset.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Returns true once the duration has elapsed on a running timer.
    pub fn is_expired(&self) -> bool {
        !self.stopped && self.started.elapsed() >= self.duration
    }

    /// Time left before expiry; `None` for a stopped timer.
    pub fn remaining(&self) -> Option<Duration> {
        if self.stopped {
            return None;
        }
        Some(self.duration.saturating_sub(self.started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_expires_immediately() {
        let timer = Timer::new(Duration::ZERO);
        assert!(timer.is_expired());
    }

    #[test]
    fn stopped_timer_never_expires() {
        let mut timer = Timer::new(Duration::ZERO);
        timer.stop();
        assert!(!timer.is_expired());
        assert_eq!(timer.remaining(), None);

        timer.reset();
        assert!(timer.is_expired());
    }

    #[test]
    fn restart_replaces_duration() {
        let mut timer = Timer::new(Duration::ZERO);
        timer.restart(Duration::from_secs(60));
        assert!(!timer.is_expired());
        assert!(timer.remaining().is_some_and(|left| left > Duration::from_secs(59)));
    }
}
