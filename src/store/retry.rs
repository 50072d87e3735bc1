use std::time::Duration;

/// Bounded retry with a backoff that grows linearly with the attempt number:
/// the wait after failed attempt `n` is `n * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, step: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            step,
        }
    }

    /// Backup defaults: 3 attempts, waits of 2s then 4s.
    pub fn backup_default() -> Self {
        Self::new(3, Duration::from_millis(2_000))
    }

    /// Restore defaults: 3 attempts, waits of 1s then 2s.
    pub fn restore_default() -> Self {
        Self::new(3, Duration::from_millis(1_000))
    }

    /// Wait after failed attempt `attempt` (1-based), or `None` when it was the last.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }
        Some(self.step.saturating_mul(attempt))
    }
}
