// dealclaim-core/src/services/credential_store.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dealclaim_common::models::{Claim, ClaimStatus, ClaimTransition, Deal};
use dealclaim_common::traits::{ClaimInsert, ClaimRepository, Clock, DealRepository, DealSecretRepository};

use crate::crypto::{generate_claim_code, generate_deal_pin, normalize_code, PinHasher};
use crate::services::Stores;
use crate::Error;

/// What a customer gets back after claiming a deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimTicket {
    pub claim_id: Uuid,
    pub deal_id: i64,
    pub claim_code: String,
    pub code_expires_at: DateTime<Utc>,
    pub status: ClaimStatus,
}

impl From<&Claim> for ClaimTicket {
    fn from(claim: &Claim) -> Self {
        Self {
            claim_id: claim.claim_id,
            deal_id: claim.deal_id,
            claim_code: claim.claim_code.clone(),
            code_expires_at: claim.code_expires_at,
            status: claim.status,
        }
    }
}

/// Metadata of a stored static PIN. Never carries the PIN itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPin {
    pub deal_id: i64,
    pub pin_created_at: DateTime<Utc>,
    pub pin_expires_at: Option<DateTime<Utc>>,
}

/// A freshly generated static PIN, shown to the merchant once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedPin {
    pub deal_id: i64,
    pub pin: String,
    pub pin_expires_at: Option<DateTime<Utc>>,
}

/// Mints claim codes and stores deal PINs.
pub struct CredentialStore {
    claims: Arc<dyn ClaimRepository>,
    deals: Arc<dyn DealRepository>,
    secrets: Arc<dyn DealSecretRepository>,
    hasher: PinHasher,
    code_ttl: Duration,
    max_code_attempts: usize,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    pub fn new(
        stores: &Stores,
        hasher: PinHasher,
        code_ttl: Duration,
        max_code_attempts: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            claims: stores.claims.clone(),
            deals: stores.deals.clone(),
            secrets: stores.secrets.clone(),
            hasher,
            code_ttl,
            max_code_attempts,
            clock,
        }
    }

    pub async fn claim_deal(&self, user_id: i64, deal_id: i64) -> Result<ClaimTicket, Error> {
        let claim = self.create_claim(user_id, deal_id).await?;
        Ok(ClaimTicket::from(&claim))
    }

    /// Creates a claim with a fresh code. A code that collides with another
    /// active claim is regenerated, up to `max_code_attempts` times.
    pub async fn create_claim(&self, user_id: i64, deal_id: i64) -> Result<Claim, Error> {
        let now = self.clock.now();
        let deal = self.require_deal(deal_id).await?;
        if !deal.is_claimable(now) {
            return Err(Error::DealUnavailable(deal_id));
        }

        let status = if deal.requires_activation {
            ClaimStatus::Pending
        } else {
            ClaimStatus::Claimed
        };
        let mut expires_at = now + self.code_ttl;
        if let Some(until) = deal.valid_until {
            expires_at = expires_at.min(until);
        }

        for attempt in 1..=self.max_code_attempts {
            let claim = Claim::new(user_id, deal_id, generate_claim_code()?, status, now, expires_at);
            match self.claims.insert_claim(&claim, now).await? {
                ClaimInsert::Inserted => {
                    info!(
                        "user {} claimed deal {} (claim {}, status {})",
                        user_id, deal_id, claim.claim_id, status
                    );
                    return Ok(claim);
                }
                ClaimInsert::CodeTaken => {
                    debug!("claim code collision on attempt {}/{}", attempt, self.max_code_attempts);
                }
            }
        }

        warn!(
            "gave up issuing a code for deal {} after {} collisions",
            deal_id, self.max_code_attempts
        );
        Err(Error::CodeSpaceExhausted(self.max_code_attempts))
    }

    /// `pending -> claimed` for deals that need activation.
    pub async fn activate_claim(&self, claim_id: Uuid) -> Result<Claim, Error> {
        let now = self.clock.now();
        let claim = self.claims.get_claim(claim_id).await?.ok_or(Error::ClaimNotFound(claim_id))?;

        if claim.status.is_active() && claim.is_code_expired(now) {
            let expire = ClaimTransition::plain(claim.status, ClaimStatus::Expired);
            self.claims.transition(claim_id, &expire).await?;
            return Err(Error::ClaimExpired);
        }
        if claim.status != ClaimStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "claim {claim_id} is {}, not pending",
                claim.status
            )));
        }

        let activate = ClaimTransition::plain(ClaimStatus::Pending, ClaimStatus::Claimed);
        if !self.claims.transition(claim_id, &activate).await? {
            return Err(Error::InvalidTransition(format!(
                "claim {claim_id} changed before it could be activated"
            )));
        }
        info!("claim {} activated", claim_id);

        Ok(Claim {
            status: ClaimStatus::Claimed,
            ..claim
        })
    }

    pub async fn find_claim_by_code(&self, code: &str) -> Result<Option<Claim>, Error> {
        self.claims.find_claim_by_code(&normalize_code(code)).await
    }

    /// Hashes and stores a merchant-chosen static PIN, replacing any previous
    /// PIN and clearing a legacy plaintext one.
    pub async fn hash_and_store_pin(&self, deal_id: i64, raw_pin: &str) -> Result<StoredPin, Error> {
        self.require_deal(deal_id).await?;

        let now = self.clock.now();
        let hasher = self.hasher.clone();
        let raw = raw_pin.to_string();
        let hashed = tokio::task::spawn_blocking(move || hasher.hash(&raw, now)).await??;

        self.secrets.store_hashed_pin(deal_id, &hashed).await?;
        info!("stored new static PIN for deal {}", deal_id);

        Ok(StoredPin {
            deal_id,
            pin_created_at: hashed.created_at,
            pin_expires_at: hashed.expires_at,
        })
    }

    /// Generates a random static PIN, stores its hash and returns the clear
    /// PIN for one-time display.
    pub async fn issue_deal_pin(&self, deal_id: i64) -> Result<IssuedPin, Error> {
        let pin = generate_deal_pin()?;
        let stored = self.hash_and_store_pin(deal_id, &pin).await?;
        Ok(IssuedPin {
            deal_id,
            pin,
            pin_expires_at: stored.pin_expires_at,
        })
    }

    pub async fn expire_stale_claims(&self) -> Result<u64, Error> {
        self.claims.expire_stale_claims(self.clock.now()).await
    }

    async fn require_deal(&self, deal_id: i64) -> Result<Deal, Error> {
        self.deals.get_deal(deal_id).await?.ok_or(Error::DealNotFound(deal_id))
    }
}
