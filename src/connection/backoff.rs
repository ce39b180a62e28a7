use std::time::Duration;

/// Reconnect delay bookkeeping.
///
/// The Nth delay is `min(base * 2^N, max)`; `N` goes back to zero whenever the
/// connection reaches `Online`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    attempt: u32,
    next_delay: Duration,
    base: Duration,
    max: Duration,
}

impl BackoffState {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempt: 0,
            next_delay: base.min(max),
            base,
            max,
        }
    }

    /// Consecutive attempts since the last `Online`.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next call to [`advance`](Self::advance) will return.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Take the current delay and move to the next attempt.
    pub fn advance(&mut self) -> Duration {
        let delay = self.next_delay;
        self.attempt = self.attempt.saturating_add(1);
        self.next_delay = self.delay_for(self.attempt);
        delay
    }

    /// Count an attempt whose delay was dictated by the server.
    pub fn advance_fixed(&mut self, delay: Duration) -> Duration {
        self.advance();
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.delay_for(0);
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }
}
