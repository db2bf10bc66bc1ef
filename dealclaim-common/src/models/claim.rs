// File: dealclaim-common/src/models/claim.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Lifecycle state of a claim.
///
/// ```text
/// pending -> claimed -> used -> completed
///            claimed ---------> completed
/// pending/claimed -> expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Claimed,
    Used,
    Completed,
    Expired,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::Used => "used",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Expired => "expired",
        }
    }

    /// Active claims hold their code and their (user, deal) slot.
    pub fn is_active(&self) -> bool {
        matches!(self, ClaimStatus::Pending | ClaimStatus::Claimed)
    }

    /// Forward edges of the lifecycle; everything else is refused.
    pub fn can_transition_to(&self, next: ClaimStatus) -> bool {
        use ClaimStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Pending, Expired)
                | (Claimed, Used)
                | (Claimed, Completed)
                | (Claimed, Expired)
                | (Used, Completed)
        )
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "claimed" => Ok(ClaimStatus::Claimed),
            "used" => Ok(ClaimStatus::Used),
            "completed" => Ok(ClaimStatus::Completed),
            "expired" => Ok(ClaimStatus::Expired),
            other => Err(Error::InvalidTransition(format!("unknown claim status '{other}'"))),
        }
    }
}

/// One customer's claim of one deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: Uuid,
    pub user_id: i64,
    pub deal_id: i64,
    pub claim_code: String,
    pub code_expires_at: DateTime<Utc>,
    pub status: ClaimStatus,

    /// Amounts are in minor currency units.
    pub bill_amount: Option<i64>,
    pub actual_savings: Option<i64>,

    pub vendor_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn new(
        user_id: i64,
        deal_id: i64,
        claim_code: String,
        status: ClaimStatus,
        now: DateTime<Utc>,
        code_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            claim_id: Uuid::new_v4(),
            user_id,
            deal_id,
            claim_code,
            code_expires_at,
            status,
            bill_amount: None,
            actual_savings: None,
            vendor_verified: false,
            verified_at: None,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_code_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.code_expires_at
    }

    /// The in-memory image of a conditional update that matched. The caller
    /// has already checked `status == transition.from`.
    pub fn apply(&mut self, transition: &ClaimTransition) {
        self.status = transition.to;
        if let Some(at) = transition.verified_at {
            self.vendor_verified = true;
            self.verified_at.get_or_insert(at);
        }
        if transition.bill_amount.is_some() {
            self.bill_amount = transition.bill_amount;
        }
        if transition.actual_savings.is_some() {
            self.actual_savings = transition.actual_savings;
        }
        if transition.completed_at.is_some() {
            self.completed_at = transition.completed_at;
        }
    }
}

/// What a conditional status update writes when it wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimTransition {
    pub from: ClaimStatus,
    pub to: ClaimStatus,
    /// Set together with `vendor_verified = true`.
    pub verified_at: Option<DateTime<Utc>>,
    pub bill_amount: Option<i64>,
    pub actual_savings: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClaimTransition {
    pub fn plain(from: ClaimStatus, to: ClaimStatus) -> Self {
        Self {
            from,
            to,
            verified_at: None,
            bill_amount: None,
            actual_savings: None,
            completed_at: None,
        }
    }

    /// Refuses edges the lifecycle does not have, before any storage is touched.
    pub fn ensure_forward(&self) -> Result<(), Error> {
        if self.from.can_transition_to(self.to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition(format!("{} -> {}", self.from, self.to)))
        }
    }

    pub fn verified(mut self, at: DateTime<Utc>) -> Self {
        self.verified_at = Some(at);
        self
    }

    pub fn with_bill(mut self, bill_amount: i64, actual_savings: i64, at: DateTime<Utc>) -> Self {
        self.bill_amount = Some(bill_amount);
        self.actual_savings = Some(actual_savings);
        self.completed_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            ClaimStatus::Pending,
            ClaimStatus::Claimed,
            ClaimStatus::Used,
            ClaimStatus::Completed,
            ClaimStatus::Expired,
        ] {
            assert_eq!(s.as_str().parse::<ClaimStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<ClaimStatus>().is_err());
    }

    /// Position in the lifecycle; a claim's rank never decreases.
    fn rank(s: ClaimStatus) -> u8 {
        match s {
            ClaimStatus::Pending => 0,
            ClaimStatus::Claimed => 1,
            ClaimStatus::Used => 2,
            ClaimStatus::Completed | ClaimStatus::Expired => 3,
        }
    }

    #[test]
    fn no_transition_regresses() {
        let all = [
            ClaimStatus::Pending,
            ClaimStatus::Claimed,
            ClaimStatus::Used,
            ClaimStatus::Completed,
            ClaimStatus::Expired,
        ];
        for from in all {
            for to in all {
                if from.can_transition_to(to) {
                    assert!(rank(to) > rank(from), "{from} -> {to} regresses");
                }
            }
        }
        assert!(!ClaimStatus::Used.can_transition_to(ClaimStatus::Claimed));
        assert!(!ClaimStatus::Expired.can_transition_to(ClaimStatus::Claimed));
    }
}
