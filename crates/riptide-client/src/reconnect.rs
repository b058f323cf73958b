//! Reconnection backoff policy.
//!
//! Transient poll failures are retried with exponentially increasing
//! delays, jittered to avoid thundering-herd, and capped at the
//! configured maximum. Unlike a connection-oriented transport, the
//! long-poll loop never gives up: when the retry budget is exceeded the
//! policy reports the edge once (so the loop can emit `Disconnected`)
//! and keeps producing capped delays.

use std::time::Duration;

use tracing::debug;

use crate::config::ReconnectConfig;

/// Backoff state for consecutive transient failures.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
    current_delay: Duration,
    limit_reported: bool,
}

impl ReconnectPolicy {
    /// Creates a policy at the base of the backoff ladder.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            current_delay: initial_delay,
            limit_reported: false,
        }
    }

    /// Whether automatic reconnection is enabled at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Resets the ladder after a successful poll.
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            debug!(attempts = self.attempt, "poll recovered, reset backoff");
        }
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
        self.limit_reported = false;
    }

    /// Computes the delay before the next retry and advances the ladder.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_backoff(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.current_delay;

        // Apply jitter: ±25% of the delay, deterministic in the attempt
        // number so retry schedules stay reproducible under test.
        let delay = if self.config.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > f64::EPSILON {
                let jitter_offset =
                    (f64::from(self.attempt) * 7.0 % jitter_range) - (jitter_range / 2.0);
                let jittered_ms = (delay.as_millis() as f64 + jitter_offset).max(1.0);
                Duration::from_millis(jittered_ms as u64)
            } else {
                delay
            }
        } else {
            delay
        };

        let next = self
            .current_delay
            .mul_f64(self.config.backoff_multiplier.max(1.0));
        self.current_delay = next.min(self.config.max_delay);

        debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        delay
    }

    /// Reports, exactly once per outage, that the retry budget was
    /// exceeded. Retries continue at the capped interval afterwards.
    pub fn limit_crossed(&mut self) -> bool {
        match self.config.max_retries {
            Some(max) if self.attempt >= max && !self.limit_reported => {
                self.limit_reported = true;
                true
            }
            _ => false,
        }
    }
}
