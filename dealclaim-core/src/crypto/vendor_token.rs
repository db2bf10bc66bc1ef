// dealclaim-core/src/crypto/vendor_token.rs

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::constant_time_eq;
use crate::crypto::rotating::MIN_SECRET_LEN;
use crate::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_CONTEXT: &[u8] = b"dealclaim vendor tokens v1";

/// Bearer credentials for merchant-only endpoints: `"{vendor_id}.{mac}"`,
/// the MAC keyed by a subkey of the deployment secret so a token can never
/// double as a rotating PIN input.
#[derive(Clone)]
pub struct VendorTokenSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for VendorTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorTokenSigner").finish_non_exhaustive()
    }
}

impl VendorTokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "vendor token secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        let mut root = HmacSha256::new_from_slice(secret)
            .map_err(|e| Error::Config(format!("invalid vendor token secret: {e}")))?;
        root.update(TOKEN_CONTEXT);
        let subkey = root.finalize().into_bytes();

        let mac = HmacSha256::new_from_slice(&subkey)
            .map_err(|e| Error::Config(format!("invalid vendor token key: {e}")))?;
        Ok(Self { mac })
    }

    pub fn issue(&self, vendor_id: i64) -> String {
        format!("{vendor_id}.{}", self.sign(vendor_id))
    }

    /// The vendor a token was issued to, or `None` for anything forged or
    /// malformed.
    pub fn verify(&self, token: &str) -> Option<i64> {
        let (id, mac) = token.trim().split_once('.')?;
        let vendor_id: i64 = id.parse().ok()?;
        constant_time_eq(&self.sign(vendor_id), mac).then_some(vendor_id)
    }

    fn sign(&self, vendor_id: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(&vendor_id.to_be_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}
