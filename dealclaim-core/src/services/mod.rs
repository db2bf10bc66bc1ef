// src/services/mod.rs

pub mod credential_store;
pub mod redemption;
pub mod throttle;
pub mod verification;

use std::sync::Arc;

use tracing::info;

use dealclaim_common::traits::{
    AttemptRepository, ClaimRepository, Clock, CustomerRepository, DealRepository, DealSecretRepository,
    RedemptionLedger,
};

use crate::config::EngineConfig;
use crate::crypto::{RotatingPinDeriver, VendorTokenSigner};
use crate::db::Database;
use crate::repositories::postgres::{
    PostgresAttemptRepository, PostgresClaimRepository, PostgresDealRepository, PostgresDealSecretRepository,
    PostgresRedemptionLedger,
};
use crate::repositories::MemoryStore;
use crate::Error;

pub use credential_store::{ClaimTicket, CredentialStore, IssuedPin, StoredPin};
pub use redemption::RedemptionService;
pub use throttle::AttemptThrottle;
pub use verification::{
    ClaimVerification, PinMethod, PinVerification, PinVerifier, RedemptionReceipt, RotatingPin, VerificationEngine,
};

/// Every repository the engine talks to.
#[derive(Clone)]
pub struct Stores {
    pub claims: Arc<dyn ClaimRepository>,
    pub deals: Arc<dyn DealRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub secrets: Arc<dyn DealSecretRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub ledger: Arc<dyn RedemptionLedger>,
}

impl Stores {
    pub fn postgres(db: &Database) -> Self {
        let pool = db.pool().clone();
        let deals = Arc::new(PostgresDealRepository::new(pool.clone()));
        Self {
            claims: Arc::new(PostgresClaimRepository::new(pool.clone())),
            deals: deals.clone(),
            customers: deals,
            secrets: Arc::new(PostgresDealSecretRepository::new(pool.clone())),
            attempts: Arc::new(PostgresAttemptRepository::new(pool.clone())),
            ledger: Arc::new(PostgresRedemptionLedger::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            claims: store.clone(),
            deals: store.clone(),
            customers: store.clone(),
            secrets: store.clone(),
            attempts: store.clone(),
            ledger: store,
        }
    }
}

/// The wired-up engine: what the HTTP layer and the background tasks hold.
#[derive(Clone)]
pub struct ClaimEngine {
    pub credentials: Arc<CredentialStore>,
    pub verification: Arc<VerificationEngine>,
    pub throttle: Arc<AttemptThrottle>,
    pub vendor_tokens: Arc<VendorTokenSigner>,
}

impl ClaimEngine {
    /// `pin_secret` keys the rotating PINs; it must be the same on every
    /// instance serving the same deals.
    pub fn new(
        stores: Stores,
        config: &EngineConfig,
        pin_secret: &[u8],
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let deriver = RotatingPinDeriver::new(pin_secret, config.rotation_window)?;
        let vendor_tokens = VendorTokenSigner::new(pin_secret)?;
        let verifiers = verification::default_verifiers(deriver.clone(), config.legacy_pin_fallback);
        Self::with_verifiers(stores, config, deriver, vendor_tokens, verifiers, clock)
    }

    /// Like [`ClaimEngine::new`] with an explicit PIN tier list.
    pub fn with_verifiers(
        stores: Stores,
        config: &EngineConfig,
        deriver: RotatingPinDeriver,
        vendor_tokens: VendorTokenSigner,
        verifiers: Vec<Arc<dyn PinVerifier>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let throttle = Arc::new(AttemptThrottle::new(
            stores.attempts.clone(),
            config.hourly_failure_limit,
            config.daily_failure_limit,
        ));
        let credentials = Arc::new(CredentialStore::new(
            &stores,
            config.pin_hasher(),
            config.code_ttl,
            config.max_code_attempts,
            clock.clone(),
        ));
        let verification = Arc::new(VerificationEngine::new(
            &stores,
            throttle.clone(),
            verifiers,
            deriver,
            config.pin_hasher(),
            clock,
        ));

        info!(
            "claim engine ready (code ttl {}m, rotation {}m, legacy PINs {})",
            config.code_ttl.num_minutes(),
            config.rotation_window.num_minutes(),
            if config.legacy_pin_fallback { "accepted" } else { "refused" }
        );

        Ok(Self {
            credentials,
            verification,
            throttle,
            vendor_tokens: Arc::new(vendor_tokens),
        })
    }
}
