use crate::core::config::ReconnectPolicy;
use std::time::Duration;

impl ReconnectPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    ///
    /// Exponential: `min(base * 2^(attempt-1), max)`. Otherwise constant `base`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay();
        }

        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let millis = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    /// Whether another automatic attempt may be scheduled after `attempts`
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.auto_reconnect && attempts < self.max_attempts
    }
}
