// File: dealclaim-core/src/repositories/memory/mod.rs

//! In-process implementation of every repository trait.
//!
//! Backs the integration tests and `--store memory` development runs. A
//! single instance is the whole "database": the claim table sits behind one
//! mutex so its uniqueness rules and conditional updates behave like the
//! Postgres partial indexes, and the attempt log sits behind another so a
//! reservation counts and appends in one step. Counters live in `DashMap`
//! entries and are only bumped while the claim mutex is held.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use dealclaim_common::models::{
    AttemptLimit, AttemptRecord, AttemptScope, Claim, ClaimStatus, ClaimTransition, Customer, Deal,
    DealVerificationSecret, HashedPin, Reservation, Vendor,
};
use dealclaim_common::traits::{
    AttemptRepository, ClaimInsert, ClaimRepository, CustomerRepository, DealRepository,
    DealSecretRepository, RedemptionLedger,
};

use crate::Error;

#[derive(Default)]
pub struct MemoryStore {
    claims: Mutex<HashMap<Uuid, Claim>>,
    deals: DashMap<i64, Deal>,
    vendors: DashMap<i64, Vendor>,
    customers: DashMap<i64, Customer>,
    secrets: DashMap<i64, DealVerificationSecret>,
    attempts: Mutex<Vec<AttemptRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding, standing in for the listings layer ---

    pub fn insert_vendor(&self, vendor: Vendor) {
        self.vendors.insert(vendor.vendor_id, vendor);
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.customers.insert(customer.user_id, customer);
    }

    pub fn insert_deal(&self, deal: Deal) {
        self.deals.insert(deal.deal_id, deal);
    }

    /// Gives a deal a pre-migration plaintext PIN.
    pub fn set_legacy_pin(&self, deal_id: i64, pin: &str) {
        self.secrets
            .entry(deal_id)
            .or_insert_with(|| DealVerificationSecret::empty(deal_id))
            .legacy_pin = Some(pin.to_string());
    }

    // --- inspection ---

    pub fn deal(&self, deal_id: i64) -> Option<Deal> {
        self.deals.get(&deal_id).map(|d| d.value().clone())
    }

    pub fn vendor(&self, vendor_id: i64) -> Option<Vendor> {
        self.vendors.get(&vendor_id).map(|v| v.value().clone())
    }

    pub fn customer(&self, user_id: i64) -> Option<Customer> {
        self.customers.get(&user_id).map(|c| c.value().clone())
    }

    pub fn secret(&self, deal_id: i64) -> Option<DealVerificationSecret> {
        self.secrets.get(&deal_id).map(|s| s.value().clone())
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.attempts.lock().clone()
    }

    pub fn claims(&self) -> Vec<Claim> {
        self.claims.lock().values().cloned().collect()
    }
}

fn failures_in_scope(
    attempts: &[AttemptRecord],
    scope: &AttemptScope,
    since: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    attempts
        .iter()
        .filter(|a| !a.success && a.attempted_at >= since && scope.matches(a))
        .map(|a| a.attempted_at)
        .collect()
}

#[async_trait]
impl ClaimRepository for MemoryStore {
    async fn insert_claim(&self, claim: &Claim, now: DateTime<Utc>) -> Result<ClaimInsert, Error> {
        let mut claims = self.claims.lock();

        for existing in claims.values_mut() {
            let blocks = existing.claim_code == claim.claim_code
                || (existing.user_id == claim.user_id && existing.deal_id == claim.deal_id);
            if blocks && existing.status.is_active() && existing.is_code_expired(now) {
                existing.status = ClaimStatus::Expired;
            }
        }

        let active = || claims.values().filter(|c| c.status.is_active());
        if active().any(|c| c.user_id == claim.user_id && c.deal_id == claim.deal_id) {
            return Err(Error::DuplicateActiveClaim {
                user_id: claim.user_id,
                deal_id: claim.deal_id,
            });
        }
        if active().any(|c| c.claim_code == claim.claim_code) {
            return Ok(ClaimInsert::CodeTaken);
        }

        claims.insert(claim.claim_id, claim.clone());
        Ok(ClaimInsert::Inserted)
    }

    async fn get_claim(&self, claim_id: Uuid) -> Result<Option<Claim>, Error> {
        Ok(self.claims.lock().get(&claim_id).cloned())
    }

    async fn find_claim_by_code(&self, code: &str) -> Result<Option<Claim>, Error> {
        let claims = self.claims.lock();
        Ok(claims
            .values()
            .filter(|c| c.claim_code == code)
            .max_by_key(|c| (c.status.is_active(), c.created_at))
            .cloned())
    }

    async fn transition(&self, claim_id: Uuid, transition: &ClaimTransition) -> Result<bool, Error> {
        transition.ensure_forward()?;
        let mut claims = self.claims.lock();
        let Some(claim) = claims.get_mut(&claim_id) else {
            return Ok(false);
        };
        if claim.status != transition.from {
            return Ok(false);
        }
        claim.apply(transition);
        Ok(true)
    }

    async fn expire_stale_claims(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut claims = self.claims.lock();
        let mut expired = 0;
        for claim in claims.values_mut() {
            if claim.status.is_active() && claim.is_code_expired(now) {
                claim.status = ClaimStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl DealRepository for MemoryStore {
    async fn get_deal(&self, deal_id: i64) -> Result<Option<Deal>, Error> {
        Ok(self.deal(deal_id))
    }
}

#[async_trait]
impl CustomerRepository for MemoryStore {
    async fn get_customer(&self, user_id: i64) -> Result<Option<Customer>, Error> {
        Ok(self.customer(user_id))
    }
}

#[async_trait]
impl DealSecretRepository for MemoryStore {
    async fn get_secret(&self, deal_id: i64) -> Result<Option<DealVerificationSecret>, Error> {
        Ok(self.secret(deal_id))
    }

    async fn store_hashed_pin(&self, deal_id: i64, pin: &HashedPin) -> Result<(), Error> {
        let mut entry = self
            .secrets
            .entry(deal_id)
            .or_insert_with(|| DealVerificationSecret::empty(deal_id));
        entry.pin_hash = Some(pin.hash.clone());
        entry.pin_salt = Some(pin.salt.clone());
        entry.pin_iterations = Some(pin.iterations);
        entry.pin_created_at = Some(pin.created_at);
        entry.pin_expires_at = pin.expires_at;
        entry.legacy_pin = None;
        Ok(())
    }

    async fn list_legacy_secrets(&self, limit: i64) -> Result<Vec<DealVerificationSecret>, Error> {
        let mut legacy: Vec<DealVerificationSecret> = self
            .secrets
            .iter()
            .filter(|s| s.legacy_pin.is_some() && s.pin_hash.is_none())
            .map(|s| s.value().clone())
            .collect();
        legacy.sort_by_key(|s| s.deal_id);
        legacy.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(legacy)
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn reserve_attempt(
        &self,
        attempt: &AttemptRecord,
        scope: &AttemptScope,
        limits: &[AttemptLimit],
    ) -> Result<Reservation, Error> {
        let mut attempts = self.attempts.lock();

        let mut reservation = Reservation::Reserved;
        for limit in limits {
            let failures = failures_in_scope(&attempts, scope, attempt.attempted_at - limit.window);
            if failures.len() as i64 >= limit.max_failures {
                reservation = Reservation::Limited {
                    window: limit.window,
                    oldest_failure: failures.into_iter().min().unwrap_or(attempt.attempted_at),
                };
                break;
            }
        }

        match reservation {
            Reservation::Reserved => attempts.push(attempt.clone()),
            Reservation::Limited { .. } => attempts.push(attempt.clone().rate_limited()),
        }
        Ok(reservation)
    }

    async fn settle_attempt(&self, attempt: &AttemptRecord) -> Result<(), Error> {
        let mut attempts = self.attempts.lock();
        match attempts
            .iter_mut()
            .find(|a| a.attempt_id == attempt.attempt_id && a.is_pending())
        {
            Some(row) => {
                row.success = attempt.success;
                row.failure_reason = attempt.failure_reason.clone();
                if row.deal_id.is_none() {
                    row.deal_id = attempt.deal_id;
                }
            }
            None => debug!("attempt {} was not pending; left as is", attempt.attempt_id),
        }
        Ok(())
    }

    async fn list_attempts_for_deal(&self, deal_id: i64, limit: i64) -> Result<Vec<AttemptRecord>, Error> {
        let mut rows: Vec<AttemptRecord> = self
            .attempts
            .lock()
            .iter()
            .filter(|a| a.deal_id == Some(deal_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[async_trait]
impl RedemptionLedger for MemoryStore {
    async fn redeem_claim(
        &self,
        claim: &Claim,
        vendor_id: i64,
        transition: &ClaimTransition,
    ) -> Result<bool, Error> {
        transition.ensure_forward()?;
        let mut claims = self.claims.lock();
        let Some(stored) = claims.get_mut(&claim.claim_id) else {
            return Ok(false);
        };
        if stored.status != transition.from {
            return Ok(false);
        }

        match self.deals.get_mut(&claim.deal_id) {
            Some(mut deal) => {
                deal.current_redemptions += 1;
                deal.total_redemptions += 1;
            }
            None => return Err(Error::DealNotFound(claim.deal_id)),
        }
        match self.vendors.get_mut(&vendor_id) {
            Some(mut vendor) => vendor.total_redemptions += 1,
            None => warn!("redeem_claim: vendor {} missing; counter not incremented", vendor_id),
        }
        match self.customers.get_mut(&claim.user_id) {
            Some(mut customer) => customer.deals_claimed += 1,
            None => warn!("redeem_claim: user {} missing; counter not incremented", claim.user_id),
        }

        stored.apply(transition);
        Ok(true)
    }
}
