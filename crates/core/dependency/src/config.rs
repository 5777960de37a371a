use crate::EngineError;
use std::time::Duration;

/// Timing policy of the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Delay before the first restart after a retryable failure.
    pub error_delay: Duration,
    /// Delay before restarting a worker that exited cleanly or asked to bounce.
    pub bounce_delay: Duration,
    /// Growth of the delay on every further consecutive failure.
    pub backoff_factor: f64,
    /// Upper bound of the restart delay.
    pub max_delay: Duration,
    /// A worker that ran at least this long before failing starts again from `error_delay`.
    pub backoff_reset_time: Duration,
    /// How long a worker may take to stop once asked before the engine gives up on it.
    pub stop_grace_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_delay: Duration::from_secs(3),
            bounce_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(120),
            backoff_reset_time: Duration::from_secs(60),
            stop_grace_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(EngineError::InvalidConfig(format!("backoff factor {} must be at least 1", self.backoff_factor)));
        }
        if self.max_delay < self.error_delay {
            return Err(EngineError::InvalidConfig(format!(
                "max delay {:?} shorter than error delay {:?}",
                self.max_delay, self.error_delay
            )));
        }
        if self.stop_grace_timeout.is_zero() {
            return Err(EngineError::InvalidConfig("stop grace timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Restart delay after the `failures`-th consecutive retryable failure.
    pub fn restart_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.bounce_delay;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let delay = self.error_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = EngineConfig { backoff_factor: 0.5, ..Default::default() };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config = EngineConfig { max_delay: Duration::from_secs(1), ..Default::default() };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config = EngineConfig { stop_grace_timeout: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_restart_delay_grows_and_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.restart_delay(0), Duration::from_millis(10));
        assert_eq!(config.restart_delay(1), Duration::from_secs(3));
        assert_eq!(config.restart_delay(2), Duration::from_secs(6));
        assert_eq!(config.restart_delay(3), Duration::from_secs(12));
        assert_eq!(config.restart_delay(10), Duration::from_secs(120));
        assert_eq!(config.restart_delay(u32::MAX), Duration::from_secs(120));
    }
}
