// File: dealclaim-common/src/models/attempt.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    DealPin,
    ClaimCode,
}

impl AttemptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptKind::DealPin => "deal_pin",
            AttemptKind::ClaimCode => "claim_code",
        }
    }
}

impl fmt::Display for AttemptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deal_pin" => Ok(AttemptKind::DealPin),
            "claim_code" => Ok(AttemptKind::ClaimCode),
            other => Err(Error::Config(format!("unknown attempt kind '{other}'"))),
        }
    }
}

/// `failure_reason` of an attempt whose check is still running. Pending
/// rows count as failures until settled.
pub const PENDING_REASON: &str = "pending";

/// `failure_reason` of an attempt refused by the throttle.
pub const RATE_LIMITED_REASON: &str = "rate_limited";

/// Who is submitting a code or PIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// Set only when the caller's user id was vouched for by a trusted
    /// front end; a bare client header never gets here.
    pub user_id: Option<i64>,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

impl RequestIdentity {
    pub fn anonymous(ip_address: impl Into<String>) -> Self {
        Self {
            user_id: None,
            ip_address: ip_address.into(),
            user_agent: None,
        }
    }

    pub fn user(user_id: i64, ip_address: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            ip_address: ip_address.into(),
            user_agent: None,
        }
    }

    /// Authenticated users are throttled by id, everyone else by address.
    pub fn throttle_key(&self) -> IdentityKey {
        match self.user_id {
            Some(id) => IdentityKey::User(id),
            None => IdentityKey::Ip(self.ip_address.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    User(i64),
    Ip(String),
}

/// Which failed attempts count against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptScope {
    DealPin { deal_id: i64, identity: IdentityKey },
    /// Codes reveal no deal before lookup, so they are throttled per identity.
    ClaimCode { identity: IdentityKey },
}

impl AttemptScope {
    pub fn matches(&self, record: &AttemptRecord) -> bool {
        let (kind, identity) = match self {
            AttemptScope::DealPin { deal_id, identity } => {
                if record.deal_id != Some(*deal_id) {
                    return false;
                }
                (AttemptKind::DealPin, identity)
            }
            AttemptScope::ClaimCode { identity } => (AttemptKind::ClaimCode, identity),
        };
        if record.kind != kind {
            return false;
        }
        match identity {
            IdentityKey::User(id) => record.user_id == Some(*id),
            IdentityKey::Ip(ip) => record.user_id.is_none() && &record.ip_address == ip,
        }
    }
}

/// A failure budget over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLimit {
    pub window: Duration,
    pub max_failures: i64,
}

/// Outcome of [`AttemptRepository::reserve_attempt`](crate::traits::AttemptRepository::reserve_attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Stored as pending; the check may run.
    Reserved,
    /// A budget is spent. The attempt was stored as a `rate_limited` failure.
    Limited {
        window: Duration,
        oldest_failure: DateTime<Utc>,
    },
}

/// Audit row, one per verification try. Written once as pending before the
/// check runs, then settled once with the outcome; never changed after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: Uuid,
    pub kind: AttemptKind,
    pub deal_id: Option<i64>,
    pub user_id: Option<i64>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// A pending attempt.
    pub fn new(
        kind: AttemptKind,
        deal_id: Option<i64>,
        identity: &RequestIdentity,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            kind,
            deal_id,
            user_id: identity.user_id,
            ip_address: identity.ip_address.clone(),
            user_agent: identity.user_agent.clone(),
            success: false,
            failure_reason: Some(PENDING_REASON.to_string()),
            attempted_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.success && self.failure_reason.as_deref() == Some(PENDING_REASON)
    }

    pub fn resolve(&mut self, outcome: Result<(), &Error>) {
        self.success = outcome.is_ok();
        self.failure_reason = outcome.err().map(|e| e.code().to_string());
    }

    pub fn rate_limited(mut self) -> Self {
        self.success = false;
        self.failure_reason = Some(RATE_LIMITED_REASON.to_string());
        self
    }
}
