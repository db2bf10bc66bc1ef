// dealclaim-core/src/services/verification/pin_verifiers.rs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dealclaim_common::models::DealVerificationSecret;

use crate::crypto::pin_hash::DEFAULT_PBKDF2_ITERATIONS;
use crate::crypto::{constant_time_eq, normalize_code, verify_pin, RotatingPinDeriver};
use crate::Error;

/// Which tier accepted a deal PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMethod {
    Rotating,
    Hashed,
    Legacy,
}

impl PinMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinMethod::Rotating => "rotating",
            PinMethod::Hashed => "hashed",
            PinMethod::Legacy => "legacy",
        }
    }
}

impl fmt::Display for PinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tier of deal PIN verification. Tiers are tried in order and the
/// first that returns `true` wins.
#[async_trait]
pub trait PinVerifier: Send + Sync {
    fn method(&self) -> PinMethod;

    /// `submitted` is already normalised. `secret` is `None` for deals that
    /// never had a static PIN.
    async fn check(
        &self,
        deal_id: i64,
        secret: Option<&DealVerificationSecret>,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;
}

pub struct RotatingPinVerifier {
    deriver: RotatingPinDeriver,
}

impl RotatingPinVerifier {
    pub fn new(deriver: RotatingPinDeriver) -> Self {
        Self { deriver }
    }
}

#[async_trait]
impl PinVerifier for RotatingPinVerifier {
    fn method(&self) -> PinMethod {
        PinMethod::Rotating
    }

    async fn check(
        &self,
        deal_id: i64,
        _secret: Option<&DealVerificationSecret>,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        Ok(self.deriver.matches(deal_id, submitted, now))
    }
}

/// PBKDF2 check against the stored hash. Skipped once the static PIN is past
/// its `pin_expires_at`.
pub struct HashedPinVerifier;

#[async_trait]
impl PinVerifier for HashedPinVerifier {
    fn method(&self) -> PinMethod {
        PinMethod::Hashed
    }

    async fn check(
        &self,
        deal_id: i64,
        secret: Option<&DealVerificationSecret>,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let Some(secret) = secret else {
            return Ok(false);
        };
        let (Some(hash), Some(salt)) = (secret.pin_hash.clone(), secret.pin_salt.clone()) else {
            return Ok(false);
        };
        if secret.is_pin_expired(now) {
            debug!("deal {}: static PIN expired, hashed tier skipped", deal_id);
            return Ok(false);
        }

        let iterations = secret
            .pin_iterations
            .and_then(|i| u32::try_from(i).ok())
            .unwrap_or(DEFAULT_PBKDF2_ITERATIONS);
        let pin = submitted.to_string();

        // PBKDF2 at production cost is tens of milliseconds of CPU.
        let matched = tokio::task::spawn_blocking(move || verify_pin(&pin, &hash, &salt, iterations)).await??;
        Ok(matched)
    }
}

/// Plaintext comparison for deals not yet migrated to a hashed PIN.
pub struct LegacyPinVerifier;

#[async_trait]
impl PinVerifier for LegacyPinVerifier {
    fn method(&self) -> PinMethod {
        PinMethod::Legacy
    }

    async fn check(
        &self,
        deal_id: i64,
        secret: Option<&DealVerificationSecret>,
        submitted: &str,
        _now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let Some(stored) = secret.and_then(|s| s.legacy_pin.as_deref()) else {
            return Ok(false);
        };
        let matched = constant_time_eq(&normalize_code(stored), submitted);
        if matched {
            warn!("deal {} verified with a legacy plaintext PIN", deal_id);
        }
        Ok(matched)
    }
}

/// Rotating, then hashed, then (optionally) legacy.
pub fn default_verifiers(deriver: RotatingPinDeriver, legacy_fallback: bool) -> Vec<Arc<dyn PinVerifier>> {
    let mut tiers: Vec<Arc<dyn PinVerifier>> = vec![
        Arc::new(RotatingPinVerifier::new(deriver)),
        Arc::new(HashedPinVerifier),
    ];
    if legacy_fallback {
        tiers.push(Arc::new(LegacyPinVerifier));
    }
    tiers
}
