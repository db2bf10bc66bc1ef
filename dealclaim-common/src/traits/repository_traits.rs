use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;
use crate::models::{
    AttemptLimit, AttemptRecord, AttemptScope, Claim, ClaimTransition, Customer, Deal,
    DealVerificationSecret, HashedPin, Reservation,
};

/// Result of trying to persist a new claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimInsert {
    Inserted,
    /// Another active claim already holds this code; mint a new one.
    CodeTaken,
}

#[async_trait]
pub trait ClaimRepository: Send + Sync {
    /// Persists `claim`. Active claims whose code deadline is before `now`
    /// are expired first so they never block the code or the (user, deal) slot.
    /// Fails with `DuplicateActiveClaim` when the user already holds one.
    async fn insert_claim(&self, claim: &Claim, now: DateTime<Utc>) -> Result<ClaimInsert, Error>;

    async fn get_claim(&self, claim_id: Uuid) -> Result<Option<Claim>, Error>;

    /// The active claim holding `code`, else the most recent claim that did.
    async fn find_claim_by_code(&self, code: &str) -> Result<Option<Claim>, Error>;

    /// Conditional update: applies only while the stored status equals
    /// `transition.from`. Returns whether this caller won. Transitions out of
    /// `claimed` into a redeemed state go through [`RedemptionLedger`] instead.
    async fn transition(&self, claim_id: Uuid, transition: &ClaimTransition) -> Result<bool, Error>;

    async fn expire_stale_claims(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

#[async_trait]
pub trait DealRepository: Send + Sync {
    async fn get_deal(&self, deal_id: i64) -> Result<Option<Deal>, Error>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get_customer(&self, user_id: i64) -> Result<Option<Customer>, Error>;
}

#[async_trait]
pub trait DealSecretRepository: Send + Sync {
    async fn get_secret(&self, deal_id: i64) -> Result<Option<DealVerificationSecret>, Error>;

    /// Replaces the deal's hashed PIN and drops any legacy plaintext PIN.
    async fn store_hashed_pin(&self, deal_id: i64, pin: &HashedPin) -> Result<(), Error>;

    /// Deals still carrying a plaintext PIN and no hash.
    async fn list_legacy_secrets(&self, limit: i64) -> Result<Vec<DealVerificationSecret>, Error>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Counts the scope's failures (pending rows included) over each limit's
    /// window and stores `attempt` in the same atomic step: as pending when
    /// every budget has room, as a `rate_limited` failure otherwise.
    /// Concurrent reservations for one scope are serialised.
    async fn reserve_attempt(
        &self,
        attempt: &AttemptRecord,
        scope: &AttemptScope,
        limits: &[AttemptLimit],
    ) -> Result<Reservation, Error>;

    /// Writes the outcome (and a deal id learnt during the check) onto a
    /// pending row. Rows that are already settled are left alone.
    async fn settle_attempt(&self, attempt: &AttemptRecord) -> Result<(), Error>;

    async fn list_attempts_for_deal(&self, deal_id: i64, limit: i64) -> Result<Vec<AttemptRecord>, Error>;
}

/// Books a redemption: the conditional status update out of `claimed` and
/// the counter increments commit together or not at all. Every increment is
/// a storage-level `x = COALESCE(x, 0) + 1`.
#[async_trait]
pub trait RedemptionLedger: Send + Sync {
    /// Returns `false`, booking nothing, when `claim` is no longer in
    /// `transition.from`. Fails with `DealNotFound`, leaving the claim as it
    /// was, when the deal row is gone.
    async fn redeem_claim(
        &self,
        claim: &Claim,
        vendor_id: i64,
        transition: &ClaimTransition,
    ) -> Result<bool, Error>;
}
