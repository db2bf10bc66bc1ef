// dealclaim-core/src/crypto/pin_hash.rs

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand_core::TryRngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use dealclaim_common::models::HashedPin;

use crate::crypto::codes::normalize_code;
use crate::Error;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 210_000;

/// Static PINs are rotated every 90 days.
pub const DEFAULT_PIN_VALIDITY_DAYS: i64 = 90;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

const MIN_PIN_LEN: usize = 4;
const MAX_PIN_LEN: usize = 12;

/// Hashes static deal PINs with PBKDF2-HMAC-SHA256 and a per-deal salt.
#[derive(Debug, Clone)]
pub struct PinHasher {
    iterations: u32,
    validity: Option<Duration>,
}

impl Default for PinHasher {
    fn default() -> Self {
        Self::new(
            DEFAULT_PBKDF2_ITERATIONS,
            Some(Duration::days(DEFAULT_PIN_VALIDITY_DAYS)),
        )
    }
}

impl PinHasher {
    pub fn new(iterations: u32, validity: Option<Duration>) -> Self {
        Self { iterations, validity }
    }

    /// Hashes `raw_pin` with a fresh salt. The PIN is normalised first, so
    /// verification is case-insensitive.
    pub fn hash(&self, raw_pin: &str, now: DateTime<Utc>) -> Result<HashedPin, Error> {
        let pin = normalize_code(raw_pin);
        if pin.len() < MIN_PIN_LEN
            || pin.len() > MAX_PIN_LEN
            || !pin.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(Error::InvalidPin);
        }

        let mut salt = [0u8; SALT_LEN];
        let mut rng = OsRng;
        rng.try_fill_bytes(&mut salt)
            .map_err(|e| Error::Hashing(format!("OS random source failed: {e}")))?;

        let mut out = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(pin.as_bytes(), &salt, self.iterations, &mut out);

        let iterations = i32::try_from(self.iterations)
            .map_err(|_| Error::Hashing(format!("iteration count {} too large", self.iterations)))?;

        Ok(HashedPin {
            hash: BASE64.encode(out),
            salt: BASE64.encode(salt),
            iterations,
            created_at: now,
            expires_at: self.validity.map(|v| now + v),
        })
    }
}

/// Recomputes the hash of `submitted` with the stored salt and iteration
/// count and compares in constant time.
pub fn verify_pin(submitted: &str, hash_b64: &str, salt_b64: &str, iterations: u32) -> Result<bool, Error> {
    let expected = BASE64
        .decode(hash_b64)
        .map_err(|e| Error::Hashing(format!("stored PIN hash is not base64: {e}")))?;
    let salt = BASE64
        .decode(salt_b64)
        .map_err(|e| Error::Hashing(format!("stored PIN salt is not base64: {e}")))?;
    if expected.is_empty() {
        return Err(Error::Hashing("stored PIN hash is empty".into()));
    }

    let pin = normalize_code(submitted);
    let mut out = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), &salt, iterations, &mut out);

    Ok(out.ct_eq(&expected).into())
}
