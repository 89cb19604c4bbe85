use std::time::Duration;

/// Fixed-delay retry schedule with a hard attempt ceiling.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Delay to wait before the next attempt, given the number of failures
    /// so far; `None` once the ceiling is reached.
    pub fn delay_before(&self, failures: u32) -> Option<Duration> {
        (failures < self.max_retries).then_some(self.delay)
    }
}

/// Consecutive-failure bookkeeping shared by the frame poller and the
/// lifecycle controller.
///
/// An open circuit stays open until an explicit [`RetryState::reset`];
/// success resets the counters but never re-closes a tripped breaker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
}

impl RetryState {
    pub fn record_success(&mut self) {
        self.attempt = 0;
        self.consecutive_failures = 0;
    }

    /// Records one failure; returns true when this one trips the breaker.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.attempt += 1;
        self.consecutive_failures += 1;
        if !self.circuit_open && self.consecutive_failures >= threshold {
            self.circuit_open = true;
            return true;
        }
        false
    }

    /// Force the breaker open, e.g. on a terminal auth failure.
    pub fn trip(&mut self) {
        self.circuit_open = true;
    }

    /// Manual restart; the only way to close an open circuit.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
