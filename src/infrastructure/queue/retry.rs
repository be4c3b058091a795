use std::time::Duration;

/// Process-wide retry configuration attached to the job queue.
///
/// `delay(attempt) = min(base * 2^(attempt - 1), cap)`, where `attempt` is the
/// attempt that just failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver as `next_attempt` once `delay` has elapsed.
    Retry { next_attempt: u32, delay: Duration },
    /// Budget spent; the job is dead-lettered and never redelivered.
    Exhausted { attempts: u32 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn decide(&self, failed_attempt: u32) -> RetryDecision {
        if failed_attempt < self.max_attempts {
            RetryDecision::Retry {
                next_attempt: failed_attempt + 1,
                delay: self.delay(failed_attempt),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: failed_attempt,
            }
        }
    }
}
