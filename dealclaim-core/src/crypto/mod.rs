// dealclaim-core/src/crypto/mod.rs

pub mod codes;
pub mod pin_hash;
pub mod rotating;
pub mod vendor_token;

pub use codes::{generate_claim_code, generate_deal_pin, normalize_code, CODE_ALPHABET, CODE_LENGTH};
pub use pin_hash::{verify_pin, PinHasher};
pub use rotating::RotatingPinDeriver;
pub use vendor_token::VendorTokenSigner;

use subtle::ConstantTimeEq;

/// Compares two secrets without leaking how many leading bytes matched.
///
/// Both sides are padded to the longer length with different fill bytes, so
/// unequal lengths always compare unequal without an early return.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
