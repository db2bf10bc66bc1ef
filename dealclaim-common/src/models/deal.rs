// File: dealclaim-common/src/models/deal.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A merchant offer. Owned by the listings layer; the engine only reads it
/// and bumps its counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub deal_id: i64,
    pub vendor_id: i64,
    pub title: String,
    pub discount_percent: i32,
    pub is_active: bool,
    /// Claims on these deals start out `pending` until activated.
    pub requires_activation: bool,
    pub valid_until: Option<DateTime<Utc>>,
    pub max_redemptions: Option<i64>,
    pub current_redemptions: i64,
    pub total_redemptions: i64,
}

impl Deal {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(until) = self.valid_until {
            if now >= until {
                return false;
            }
        }
        match self.max_redemptions {
            Some(max) => self.current_redemptions < max,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub vendor_id: i64,
    pub name: String,
    pub total_redemptions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub user_id: i64,
    pub display_name: String,
    pub deals_claimed: i64,
}

/// Per-deal verification secret. The hash is PBKDF2 output; the clear PIN
/// is never stored, except for deals still carrying a pre-migration
/// `legacy_pin`.
#[derive(Debug, Clone, PartialEq)]
pub struct DealVerificationSecret {
    pub deal_id: i64,
    pub pin_hash: Option<String>,
    pub pin_salt: Option<String>,
    pub pin_iterations: Option<i32>,
    pub pin_created_at: Option<DateTime<Utc>>,
    pub pin_expires_at: Option<DateTime<Utc>>,
    pub legacy_pin: Option<String>,
}

impl DealVerificationSecret {
    pub fn empty(deal_id: i64) -> Self {
        Self {
            deal_id,
            pin_hash: None,
            pin_salt: None,
            pin_iterations: None,
            pin_created_at: None,
            pin_expires_at: None,
            legacy_pin: None,
        }
    }

    pub fn has_hashed_pin(&self) -> bool {
        self.pin_hash.is_some() && self.pin_salt.is_some()
    }

    pub fn is_pin_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.pin_expires_at, Some(exp) if now >= exp)
    }
}

/// A freshly hashed PIN, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedPin {
    pub hash: String,
    pub salt: String,
    pub iterations: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}
