//! Per-turn deadline tracking for timed matches

use std::time::Duration;

/// Turn deadline. Times are unix milliseconds, matching `util::time::unix_millis`.
#[derive(Debug, Clone)]
pub struct TurnClock {
    limit: Duration,
    deadline_ms: Option<u64>,
}

impl TurnClock {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            deadline_ms: None,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Deadline of the running turn, if any
    #[cfg(test)]
    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    pub fn is_running(&self) -> bool {
        self.deadline_ms.is_some()
    }

    /// Start (or restart) the clock for a new turn
    pub fn start_turn(&mut self, now_ms: u64) {
        self.deadline_ms = Some(now_ms.saturating_add(self.limit.as_millis() as u64));
    }

    /// Clear the deadline, e.g. when nobody holds the turn
    pub fn stop(&mut self) {
        self.deadline_ms = None;
    }

    /// Time left on the current turn. Zero once expired or if never started.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        self.deadline_ms
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now_ms)))
            .unwrap_or(Duration::ZERO)
    }

    /// Whole seconds left, rounded up so a fresh turn reports the full limit
    pub fn remaining_secs(&self, now_ms: u64) -> u64 {
        let ms = self.remaining(now_ms).as_millis() as u64;
        ms.div_ceil(1000)
    }

    pub fn expired(&self, now_ms: u64) -> bool {
        matches!(self.deadline_ms, Some(deadline) if now_ms >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_clock_never_expires() {
        let clock = TurnClock::new(Duration::from_secs(30));
        assert!(!clock.expired(u64::MAX));
        assert_eq!(clock.remaining(0), Duration::ZERO);
    }

    #[test]
    fn expires_exactly_at_deadline() {
        let mut clock = TurnClock::new(Duration::from_secs(30));
        clock.start_turn(1_000);
        assert!(!clock.expired(30_999));
        assert!(clock.expired(31_000));
        assert_eq!(clock.remaining(31_500), Duration::ZERO);
    }

    #[test]
    fn restart_pushes_deadline() {
        let mut clock = TurnClock::new(Duration::from_secs(30));
        clock.start_turn(0);
        clock.start_turn(20_000);
        assert!(!clock.expired(40_000));
        assert_eq!(clock.remaining_secs(20_000), 30);
        assert_eq!(clock.remaining_secs(49_001), 1);
    }
}
