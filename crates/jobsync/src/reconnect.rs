//! Exponential-backoff policy for status-channel reconnects.
//!
//! The delay before reconnect attempt `n` (1-based) is
//! `initial_delay * multiplier^(n-1)`, clamped to `max_delay`. The wait
//! after the `max_attempts`-th consecutive unclean close still runs, but
//! when it ends the connection gives up instead of opening again.

use std::time::Duration;

/// Consecutive unclean closes after which the connection is declared failed.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect.
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound on the delay between reconnects.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Consecutive unclean closes tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: BASE_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            multiplier: 2.0,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before reconnect attempt `attempt` (1-based).
    ///
    /// Attempt `0` is treated as attempt `1`. The result is clamped to
    /// [`max_delay`](Self::max_delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        let max_ms = self.max_delay.as_millis() as f64;

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Whether the channel may be (re)opened after `attempts` consecutive
    /// unclean closes.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
