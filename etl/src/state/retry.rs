//! Consecutive failure tracking with exponential backoff and a circuit breaker.

use std::time::Duration;

use rand::Rng;

use crate::config::RetrySettings;

/// What a pipeline does after a stage failed with a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Wait for the delay, then re-enter the same stage.
    Backoff(Duration),
    /// Too many consecutive failures, stop scheduling for the cooldown.
    OpenCircuit(Duration),
}

/// Failure counter of one sync pipeline.
///
/// Any success resets the counter. After a cooldown the circuit is half-open: the stage is
/// tried once more and a single further failure reopens the circuit.
#[derive(Debug, Clone)]
pub struct RetryState {
    settings: RetrySettings,
    cooldown: Duration,
    consecutive_failures: u32,
}

impl RetryState {
    pub fn new(settings: RetrySettings, cooldown: Duration) -> Self {
        Self {
            settings,
            cooldown,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_failure(&mut self) -> FailureOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures >= self.settings.max_attempts {
            return FailureOutcome::OpenCircuit(self.cooldown);
        }

        FailureOutcome::Backoff(self.calculate_backoff())
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Lets one more attempt through after the cooldown.
    pub fn half_open(&mut self) {
        self.consecutive_failures = self.settings.max_attempts.saturating_sub(1);
    }

    /// Returns `initial_delay * backoff_factor^(failures - 1)`, capped at `max_delay`, plus up
    /// to 30% jitter.
    pub fn calculate_backoff(&self) -> Duration {
        let capped_delay_ms = self.base_delay_ms();

        let jitter_factor = rand::rng().random::<f64>() * 0.3;
        let jittered_delay_ms = capped_delay_ms * (1.0 + jitter_factor);

        Duration::from_millis(jittered_delay_ms as u64)
    }

    fn base_delay_ms(&self) -> f64 {
        let attempt = self.consecutive_failures.saturating_sub(1);
        let multiplier = (self.settings.backoff_factor as f64).powi(attempt as i32);
        let base_delay_ms = self.settings.initial_delay.as_millis() as f64 * multiplier;

        base_delay_ms.min(self.settings.max_delay.as_millis() as f64)
    }
}
