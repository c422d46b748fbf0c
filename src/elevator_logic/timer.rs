//! Door timer.
//!
//! The timer is just an optional deadline. When it is disarmed there is nothing to wait on,
//! so the FSM leaves it out of its `select!` instead of polling a dead channel.

use tokio::time::{Duration, Instant};

/// One-shot door timer.
#[derive(Debug, Clone)]
pub struct Timer {
    timeout_duration: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    /// Disarmed timer that runs for `timeout_duration` once started.
    pub fn new(timeout_duration: Duration) -> Timer {
        Timer { timeout_duration, deadline: None }
    }

    /// Arms the timer from now. Restarting an armed timer pushes the deadline.
    pub fn timer_start(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout_duration);
    }

    /// Disarms the timer. A pending expiry is dropped with it.
    pub fn timer_stop(&mut self) {
        self.deadline = None;
    }

    /// Deadline while armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` while armed.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// `true` if armed and the deadline has passed.
    pub fn timer_timeouted(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_only_while_armed() {
        let mut t = Timer::new(Duration::from_secs(3));
        assert!(!t.is_armed());
        assert!(!t.timer_timeouted());

        t.timer_start();
        tokio::time::advance(Duration::from_millis(2900)).await;
        assert!(!t.timer_timeouted());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(t.timer_timeouted());

        t.timer_stop();
        assert!(!t.timer_timeouted());
        assert_eq!(t.deadline(), None);
    }
}
