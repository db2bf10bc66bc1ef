// dealclaim-core/src/crypto/codes.rs

use rand::rngs::OsRng;
use rand_core::TryRngCore;

use crate::Error;

pub const CODE_LENGTH: usize = 6;

pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of 36 that fits in a byte; bytes at or above it are
/// discarded so every symbol is equally likely.
const REJECTION_BOUND: u8 = 252;

/// Draws `len` symbols from [`CODE_ALPHABET`] using the OS CSPRNG.
fn random_code(len: usize) -> Result<String, Error> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 16];
    let mut rng = OsRng;

    while out.len() < len {
        rng.try_fill_bytes(&mut buf)
            .map_err(|e| Error::Hashing(format!("OS random source failed: {e}")))?;

        for &b in buf.iter().filter(|&&b| b < REJECTION_BOUND) {
            out.push(CODE_ALPHABET[(b % 36) as usize] as char);
            if out.len() == len {
                break;
            }
        }
    }
    Ok(out)
}

/// Mints a claim code. Codes are bearer credentials, hence the CSPRNG.
pub fn generate_claim_code() -> Result<String, Error> {
    random_code(CODE_LENGTH)
}

/// Mints a static deal PIN for merchants.
pub fn generate_deal_pin() -> Result<String, Error> {
    random_code(CODE_LENGTH)
}

/// Canonical form of anything a human typed: trimmed, upper-case.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Whether `code` could have been produced by [`generate_claim_code`].
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}
