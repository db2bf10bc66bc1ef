// dealclaim-core/src/services/verification/mod.rs
//
// Vendor-facing checks: deal PINs (which deal is this merchant?) and claim
// codes (is this customer's claim good?). Every check is reserved in the
// attempt log before any credential is compared, and settled with its
// outcome before the caller sees the result.

pub mod pin_verifiers;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dealclaim_common::models::{
    AttemptKind, AttemptRecord, AttemptScope, Claim, ClaimStatus, ClaimTransition, Customer, Deal,
    RequestIdentity,
};
use dealclaim_common::traits::{Clock, ClaimRepository, CustomerRepository, DealRepository, DealSecretRepository};

use crate::crypto::codes::is_well_formed;
use crate::crypto::{normalize_code, PinHasher, RotatingPinDeriver};
use crate::services::redemption::{customer_savings, RedemptionService};
use crate::services::throttle::AttemptThrottle;
use crate::services::Stores;
use crate::Error;

pub use pin_verifiers::{
    default_verifiers, HashedPinVerifier, LegacyPinVerifier, PinMethod, PinVerifier, RotatingPinVerifier,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinVerification {
    pub valid: bool,
    pub deal_id: i64,
    pub method: PinMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimVerification {
    pub valid: bool,
    pub claim: Claim,
    pub deal: Deal,
    /// `None` when the user row is owned elsewhere and not visible here.
    pub customer: Option<Customer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionReceipt {
    pub success: bool,
    pub claim_id: Uuid,
    pub bill_amount: i64,
    pub customer_savings: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatingPin {
    pub deal_id: i64,
    pub pin: String,
    pub next_rotation_at: DateTime<Utc>,
}

pub struct VerificationEngine {
    claims: Arc<dyn ClaimRepository>,
    deals: Arc<dyn DealRepository>,
    customers: Arc<dyn CustomerRepository>,
    secrets: Arc<dyn DealSecretRepository>,
    throttle: Arc<AttemptThrottle>,
    redemption: Arc<RedemptionService>,
    verifiers: Vec<Arc<dyn PinVerifier>>,
    deriver: RotatingPinDeriver,
    hasher: PinHasher,
    clock: Arc<dyn Clock>,
}

impl VerificationEngine {
    pub fn new(
        stores: &Stores,
        throttle: Arc<AttemptThrottle>,
        verifiers: Vec<Arc<dyn PinVerifier>>,
        deriver: RotatingPinDeriver,
        hasher: PinHasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            claims: stores.claims.clone(),
            deals: stores.deals.clone(),
            customers: stores.customers.clone(),
            secrets: stores.secrets.clone(),
            redemption: Arc::new(RedemptionService::new(stores.claims.clone(), stores.ledger.clone())),
            throttle,
            verifiers,
            deriver,
            hasher,
            clock,
        }
    }

    // ---------------------------------------------------------------
    // Deal PINs
    // ---------------------------------------------------------------

    /// Checks a merchant's PIN for `deal_id` through every configured tier.
    pub async fn verify_deal_pin(
        &self,
        deal_id: i64,
        submitted: &str,
        identity: &RequestIdentity,
    ) -> Result<PinVerification, Error> {
        let now = self.clock.now();
        let scope = AttemptScope::DealPin {
            deal_id,
            identity: identity.throttle_key(),
        };
        let attempt = AttemptRecord::new(AttemptKind::DealPin, Some(deal_id), identity, now);
        self.throttle.reserve(&attempt, &scope).await?;

        let outcome = self.check_deal_pin(deal_id, submitted, now).await;
        self.throttle.settle(attempt, outcome).await
    }

    async fn check_deal_pin(
        &self,
        deal_id: i64,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<PinVerification, Error> {
        if self.deals.get_deal(deal_id).await?.is_none() {
            return Err(Error::DealNotFound(deal_id));
        }
        let secret = self.secrets.get_secret(deal_id).await?;
        let pin = normalize_code(submitted);
        if pin.is_empty() {
            return Err(Error::InvalidPin);
        }

        for tier in &self.verifiers {
            if !tier.check(deal_id, secret.as_ref(), &pin, now).await? {
                continue;
            }
            let method = tier.method();
            if method == PinMethod::Legacy {
                self.upgrade_legacy_pin(deal_id, &pin, now).await;
            }
            debug!("deal {} PIN accepted by the {} tier", deal_id, method);
            return Ok(PinVerification {
                valid: true,
                deal_id,
                method,
            });
        }

        Err(Error::InvalidPin)
    }

    /// Re-stores a legacy PIN that just matched as a salted hash. A failure
    /// here leaves the legacy PIN in place and does not fail the check.
    async fn upgrade_legacy_pin(&self, deal_id: i64, pin: &str, now: DateTime<Utc>) {
        let hasher = self.hasher.clone();
        let raw = pin.to_string();
        let hashed = match tokio::task::spawn_blocking(move || hasher.hash(&raw, now)).await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                warn!("deal {}: legacy PIN not upgradable: {}", deal_id, e);
                return;
            }
            Err(e) => {
                warn!("deal {}: legacy PIN hashing task failed: {}", deal_id, e);
                return;
            }
        };

        match self.secrets.store_hashed_pin(deal_id, &hashed).await {
            Ok(()) => info!("deal {}: legacy PIN migrated to a hashed PIN", deal_id),
            Err(e) => warn!("deal {}: storing upgraded PIN failed: {}", deal_id, e),
        }
    }

    /// Fails unless `vendor_id` owns `deal_id`.
    pub async fn authorize_vendor(&self, deal_id: i64, vendor_id: i64) -> Result<Deal, Error> {
        let deal = self.require_deal(deal_id).await?;
        if deal.vendor_id != vendor_id {
            warn!("vendor {} refused access to deal {}", vendor_id, deal_id);
            return Err(Error::NotDealVendor { deal_id, vendor_id });
        }
        Ok(deal)
    }

    /// The PIN a merchant display should show right now.
    pub async fn current_rotating_pin(&self, deal_id: i64) -> Result<RotatingPin, Error> {
        if self.deals.get_deal(deal_id).await?.is_none() {
            return Err(Error::DealNotFound(deal_id));
        }
        let now = self.clock.now();
        Ok(RotatingPin {
            deal_id,
            pin: self.deriver.current_window_pin(deal_id, now),
            next_rotation_at: self.deriver.next_rotation_at(now),
        })
    }

    // ---------------------------------------------------------------
    // Claim codes
    // ---------------------------------------------------------------

    /// Accepts a customer's claim code at the till: `claimed -> used`, and
    /// the redemption is booked. A code can succeed here at most once.
    pub async fn verify_claim_code(
        &self,
        code: &str,
        identity: &RequestIdentity,
    ) -> Result<ClaimVerification, Error> {
        let now = self.clock.now();
        let scope = AttemptScope::ClaimCode {
            identity: identity.throttle_key(),
        };
        let mut attempt = AttemptRecord::new(AttemptKind::ClaimCode, None, identity, now);
        self.throttle.reserve(&attempt, &scope).await?;

        let outcome = self.check_claim_code(code, now, &mut attempt.deal_id).await;
        self.throttle.settle(attempt, outcome).await
    }

    async fn check_claim_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
        deal_seen: &mut Option<i64>,
    ) -> Result<ClaimVerification, Error> {
        let claim = self.load_claim(code, now, deal_seen).await?;
        match claim.status {
            ClaimStatus::Claimed => {}
            ClaimStatus::Pending => return Err(Error::ClaimPending),
            ClaimStatus::Used | ClaimStatus::Completed => return Err(Error::AlreadyRedeemed),
            ClaimStatus::Expired => return Err(Error::ClaimExpired),
        }
        let mut deal = self.require_deal(claim.deal_id).await?;

        let transition = ClaimTransition::plain(ClaimStatus::Claimed, ClaimStatus::Used).verified(now);
        if !self.redemption.redeem(&claim, &deal, &transition).await? {
            return Err(self.lost_race(&claim).await);
        }

        // The redemption is committed; the reply is built from what it wrote.
        let mut claim = claim;
        claim.apply(&transition);
        deal.current_redemptions += 1;
        deal.total_redemptions += 1;
        let customer = match self.customers.get_customer(claim.user_id).await {
            Ok(customer) => customer,
            Err(e) => {
                warn!("claim {} redeemed; customer {} not loaded: {}", claim.claim_id, claim.user_id, e);
                None
            }
        };

        Ok(ClaimVerification {
            valid: true,
            claim,
            deal,
            customer,
        })
    }

    /// Closes a claim with the bill. A `claimed` claim is verified and
    /// completed in one step (booking the redemption); a `used` one only gets
    /// its amounts recorded.
    pub async fn complete_redemption(
        &self,
        code: &str,
        bill_amount: i64,
        actual_discount: Option<i64>,
        identity: &RequestIdentity,
    ) -> Result<RedemptionReceipt, Error> {
        // Amount errors are not verification attempts: no throttle, no audit row.
        if bill_amount <= 0 {
            return Err(Error::InvalidAmount(format!("bill amount must be positive, got {bill_amount}")));
        }
        if let Some(d) = actual_discount {
            if d < 0 || d > bill_amount {
                return Err(Error::InvalidAmount(format!("discount {d} outside 0..={bill_amount}")));
            }
        }

        let now = self.clock.now();
        let scope = AttemptScope::ClaimCode {
            identity: identity.throttle_key(),
        };
        let mut attempt = AttemptRecord::new(AttemptKind::ClaimCode, None, identity, now);
        self.throttle.reserve(&attempt, &scope).await?;

        let outcome = self
            .complete(code, bill_amount, actual_discount, now, &mut attempt.deal_id)
            .await;
        self.throttle.settle(attempt, outcome).await
    }

    async fn complete(
        &self,
        code: &str,
        bill_amount: i64,
        actual_discount: Option<i64>,
        now: DateTime<Utc>,
        deal_seen: &mut Option<i64>,
    ) -> Result<RedemptionReceipt, Error> {
        let claim = self.find_claim(code, deal_seen).await?;
        let transition = match claim.status {
            // Already verified at the till; the bill may arrive after the code window.
            ClaimStatus::Used => ClaimTransition::plain(ClaimStatus::Used, ClaimStatus::Completed),
            _ if claim.is_code_expired(now) || claim.status == ClaimStatus::Expired => {
                self.expire_lazily(&claim).await;
                return Err(Error::ClaimExpired);
            }
            ClaimStatus::Claimed => {
                ClaimTransition::plain(ClaimStatus::Claimed, ClaimStatus::Completed).verified(now)
            }
            ClaimStatus::Pending => return Err(Error::ClaimPending),
            ClaimStatus::Completed | ClaimStatus::Expired => return Err(Error::AlreadyRedeemed),
        };

        let deal = self.require_deal(claim.deal_id).await?;
        let savings = customer_savings(&deal, bill_amount, actual_discount)?;
        let transition = transition.with_bill(bill_amount, savings, now);

        if !self.redemption.redeem(&claim, &deal, &transition).await? {
            return Err(self.lost_race(&claim).await);
        }
        info!(
            "claim {} completed: bill {}, savings {}",
            claim.claim_id, bill_amount, savings
        );

        Ok(RedemptionReceipt {
            success: true,
            claim_id: claim.claim_id,
            bill_amount,
            customer_savings: savings,
        })
    }

    // ---------------------------------------------------------------
    // helpers
    // ---------------------------------------------------------------

    async fn find_claim(&self, code: &str, deal_seen: &mut Option<i64>) -> Result<Claim, Error> {
        let code = normalize_code(code);
        if !is_well_formed(&code) {
            return Err(Error::InvalidCode);
        }
        let claim = self.claims.find_claim_by_code(&code).await?.ok_or(Error::InvalidCode)?;
        *deal_seen = Some(claim.deal_id);
        Ok(claim)
    }

    /// Looks a code up and applies the expiry deadline, which outranks every
    /// status: past `code_expires_at` the answer is always `ClaimExpired`.
    async fn load_claim(
        &self,
        code: &str,
        now: DateTime<Utc>,
        deal_seen: &mut Option<i64>,
    ) -> Result<Claim, Error> {
        let claim = self.find_claim(code, deal_seen).await?;
        if claim.is_code_expired(now) {
            self.expire_lazily(&claim).await;
            return Err(Error::ClaimExpired);
        }
        Ok(claim)
    }

    async fn expire_lazily(&self, claim: &Claim) {
        if !claim.status.is_active() {
            return;
        }
        let transition = ClaimTransition::plain(claim.status, ClaimStatus::Expired);
        match self.claims.transition(claim.claim_id, &transition).await {
            Ok(true) => debug!("claim {} marked expired", claim.claim_id),
            Ok(false) => {}
            Err(e) => warn!("claim {}: marking expired failed: {}", claim.claim_id, e),
        }
    }

    async fn require_deal(&self, deal_id: i64) -> Result<Deal, Error> {
        self.deals.get_deal(deal_id).await?.ok_or(Error::DealNotFound(deal_id))
    }

    /// Error for a caller whose conditional update matched nothing.
    async fn lost_race(&self, claim: &Claim) -> Error {
        match self.claims.get_claim(claim.claim_id).await {
            Ok(Some(current)) if current.status == ClaimStatus::Expired => Error::ClaimExpired,
            Ok(_) => Error::AlreadyRedeemed,
            Err(e) => e,
        }
    }
}
