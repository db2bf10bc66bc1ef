// dealclaim-core/src/services/redemption.rs

use std::sync::Arc;

use tracing::{error, info};

use dealclaim_common::models::{Claim, ClaimStatus, ClaimTransition, Deal};
use dealclaim_common::traits::{ClaimRepository, RedemptionLedger};

use crate::Error;

/// Moves claims out of `claimed` and books the redemption exactly once.
///
/// A redeeming transition and its counter increments commit together, so a
/// claim is never consumed without being counted.
pub struct RedemptionService {
    claims: Arc<dyn ClaimRepository>,
    ledger: Arc<dyn RedemptionLedger>,
}

impl RedemptionService {
    pub fn new(claims: Arc<dyn ClaimRepository>, ledger: Arc<dyn RedemptionLedger>) -> Self {
        Self { claims, ledger }
    }

    /// Applies `transition` to `claim`. Returns `false` when another caller
    /// changed the claim first.
    pub async fn redeem(&self, claim: &Claim, deal: &Deal, transition: &ClaimTransition) -> Result<bool, Error> {
        if transition.from != ClaimStatus::Claimed {
            return self.claims.transition(claim.claim_id, transition).await;
        }

        match self.ledger.redeem_claim(claim, deal.vendor_id, transition).await {
            Ok(true) => {
                info!(
                    "claim {} redeemed for deal {} (vendor {}, user {})",
                    claim.claim_id, deal.deal_id, deal.vendor_id, claim.user_id
                );
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                error!("redemption of claim {} for deal {} rolled back: {}", claim.claim_id, deal.deal_id, e);
                Err(e)
            }
        }
    }
}

/// `actual_discount` when given, else `discount_percent` of the bill.
pub fn customer_savings(deal: &Deal, bill_amount: i64, actual_discount: Option<i64>) -> Result<i64, Error> {
    if bill_amount <= 0 {
        return Err(Error::InvalidAmount(format!("bill amount must be positive, got {bill_amount}")));
    }
    let savings = match actual_discount {
        Some(d) => d,
        None => bill_amount.saturating_mul(i64::from(deal.discount_percent)) / 100,
    };
    if savings < 0 || savings > bill_amount {
        return Err(Error::InvalidAmount(format!(
            "discount {savings} outside 0..={bill_amount}"
        )));
    }
    Ok(savings)
}
