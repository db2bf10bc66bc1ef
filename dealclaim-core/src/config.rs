// dealclaim-core/src/config.rs

use chrono::Duration;

use crate::crypto::pin_hash::{DEFAULT_PBKDF2_ITERATIONS, DEFAULT_PIN_VALIDITY_DAYS};
use crate::crypto::rotating::DEFAULT_ROTATION_WINDOW_SECS;
use crate::crypto::PinHasher;
use crate::Error;

/// Tunables of the claim and verification engine. The server binary fills
/// this from CLI flags / environment; tests usually start from `default()`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a freshly issued claim code stays valid.
    pub code_ttl: Duration,
    pub rotation_window: Duration,
    /// `None` disables static PIN expiry.
    pub pin_validity: Option<Duration>,
    pub pbkdf2_iterations: u32,
    pub hourly_failure_limit: i64,
    pub daily_failure_limit: i64,
    /// Accept pre-migration plaintext PINs as a last verification tier.
    pub legacy_pin_fallback: bool,
    /// Regeneration attempts when a new code collides with an active claim.
    pub max_code_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::hours(24),
            rotation_window: Duration::seconds(DEFAULT_ROTATION_WINDOW_SECS),
            pin_validity: Some(Duration::days(DEFAULT_PIN_VALIDITY_DAYS)),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            hourly_failure_limit: 5,
            daily_failure_limit: 10,
            legacy_pin_fallback: true,
            max_code_attempts: 5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.code_ttl <= Duration::zero() {
            return Err(Error::Config("code_ttl must be positive".into()));
        }
        if self.rotation_window <= Duration::zero() {
            return Err(Error::Config("rotation_window must be positive".into()));
        }
        if self.pbkdf2_iterations == 0 {
            return Err(Error::Config("pbkdf2_iterations must be at least 1".into()));
        }
        if self.hourly_failure_limit < 1 || self.daily_failure_limit < self.hourly_failure_limit {
            return Err(Error::Config(format!(
                "failure limits must satisfy 1 <= hourly ({}) <= daily ({})",
                self.hourly_failure_limit, self.daily_failure_limit
            )));
        }
        if self.max_code_attempts == 0 {
            return Err(Error::Config("max_code_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn pin_hasher(&self) -> PinHasher {
        PinHasher::new(self.pbkdf2_iterations, self.pin_validity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.code_ttl, Duration::hours(24));
        assert_eq!(cfg.rotation_window, Duration::minutes(30));
        assert_eq!(cfg.hourly_failure_limit, 5);
        assert_eq!(cfg.daily_failure_limit, 10);
    }

    #[test]
    fn inverted_limits_are_rejected() {
        let cfg = EngineConfig {
            hourly_failure_limit: 20,
            daily_failure_limit: 10,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
