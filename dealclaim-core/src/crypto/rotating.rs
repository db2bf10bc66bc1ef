// dealclaim-core/src/crypto/rotating.rs

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::codes::{CODE_ALPHABET, CODE_LENGTH};
use crate::crypto::constant_time_eq;
use crate::Error;

type HmacSha256 = Hmac<Sha256>;

/// Secrets shorter than this are refused at startup.
pub const MIN_SECRET_LEN: usize = 32;

pub const DEFAULT_ROTATION_WINDOW_SECS: i64 = 30 * 60;

/// 36^6, the number of distinct 6-symbol PINs.
const PIN_SPACE: u64 = 2_176_782_336;

/// Derives the time-windowed PIN of a deal:
/// `base36(HMAC-SHA256(secret, deal_id || window_index)[..8] mod 36^6)`.
///
/// Holds only the keyed MAC state; nothing is persisted, so any instance
/// computes the same PIN for the same window.
#[derive(Clone)]
pub struct RotatingPinDeriver {
    mac: HmacSha256,
    window_secs: i64,
}

impl std::fmt::Debug for RotatingPinDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingPinDeriver")
            .field("window_secs", &self.window_secs)
            .finish_non_exhaustive()
    }
}

impl RotatingPinDeriver {
    pub fn new(secret: &[u8], window: Duration) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "rotating PIN secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        let window_secs = window.num_seconds();
        if window_secs <= 0 {
            return Err(Error::Config("rotation window must be positive".into()));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| Error::Config(format!("invalid rotating PIN secret: {e}")))?;

        Ok(Self { mac, window_secs })
    }

    pub fn window_index(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.window_secs)
    }

    pub fn pin_for_window(&self, deal_id: i64, window_index: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(&deal_id.to_be_bytes());
        mac.update(&window_index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let mut n = u64::from_be_bytes(head) % PIN_SPACE;

        let mut symbols = [b'A'; CODE_LENGTH];
        for slot in symbols.iter_mut().rev() {
            *slot = CODE_ALPHABET[(n % 36) as usize];
            n /= 36;
        }
        symbols.iter().map(|&b| b as char).collect()
    }

    pub fn current_window_pin(&self, deal_id: i64, now: DateTime<Utc>) -> String {
        self.pin_for_window(deal_id, self.window_index(now))
    }

    /// PIN of the window just before `now`'s, accepted as a grace period.
    pub fn previous_window_pin(&self, deal_id: i64, now: DateTime<Utc>) -> String {
        self.pin_for_window(deal_id, self.window_index(now) - 1)
    }

    pub fn next_rotation_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next_start = (self.window_index(now) + 1) * self.window_secs;
        Utc.timestamp_opt(next_start, 0)
            .single()
            .unwrap_or(now + Duration::seconds(self.window_secs))
    }

    /// Accepts the current or the immediately previous window's PIN.
    /// `submitted` must already be normalised.
    pub fn matches(&self, deal_id: i64, submitted: &str, now: DateTime<Utc>) -> bool {
        let current = constant_time_eq(&self.current_window_pin(deal_id, now), submitted);
        let previous = constant_time_eq(&self.previous_window_pin(deal_id, now), submitted);
        current | previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::codes::is_well_formed;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef-test";

    fn deriver() -> RotatingPinDeriver {
        RotatingPinDeriver::new(SECRET, Duration::seconds(DEFAULT_ROTATION_WINDOW_SECS)).unwrap()
    }

    /// 2026-01-01T00:00:00Z, which starts a 30-minute window.
    fn window_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn same_window_same_pin() {
        let d = deriver();
        let t = window_start();
        let pin = d.current_window_pin(42, t);
        assert!(is_well_formed(&pin));
        assert_eq!(pin, d.current_window_pin(42, t + Duration::minutes(29)));
        assert_ne!(pin, d.current_window_pin(42, t + Duration::minutes(31)));
    }

    #[test]
    fn previous_window_pin_is_grace_until_next_rotation() {
        let d = deriver();
        let t = window_start();
        let pin = d.current_window_pin(42, t);

        assert!(d.matches(42, &pin, t + Duration::minutes(31)));
        assert!(d.matches(42, &pin, t + Duration::minutes(59)));
        assert!(!d.matches(42, &pin, t + Duration::minutes(60)));
    }

    #[test]
    fn pins_depend_on_deal_and_secret() {
        let d = deriver();
        let t = window_start();
        assert_ne!(d.current_window_pin(42, t), d.current_window_pin(43, t));

        let other = RotatingPinDeriver::new(b"another-secret-another-secret-xx", Duration::minutes(30)).unwrap();
        assert_ne!(d.current_window_pin(42, t), other.current_window_pin(42, t));
    }

    #[test]
    fn next_rotation_is_window_boundary() {
        let d = deriver();
        let t = window_start();
        assert_eq!(d.next_rotation_at(t + Duration::minutes(10)), t + Duration::minutes(30));
        assert_eq!(d.next_rotation_at(t), t + Duration::minutes(30));
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(RotatingPinDeriver::new(b"short", Duration::minutes(30)).is_err());
        assert!(RotatingPinDeriver::new(SECRET, Duration::zero()).is_err());
    }
}
