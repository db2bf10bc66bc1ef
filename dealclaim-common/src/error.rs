// ================================================================
// File: dealclaim-common/src/error.rs
// ================================================================

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("User {user_id} already holds an active claim for deal {deal_id}")]
    DuplicateActiveClaim { user_id: i64, deal_id: i64 },

    #[error("Claim code has expired; claim the deal again")]
    ClaimExpired,

    #[error("Claim has already been redeemed")]
    AlreadyRedeemed,

    #[error("Invalid claim code")]
    InvalidCode,

    #[error("Invalid PIN, try again")]
    InvalidPin,

    #[error("Too many failed attempts; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    #[error("Deal {0} not found")]
    DealNotFound(i64),

    #[error("Vendor {vendor_id} does not run deal {deal_id}")]
    NotDealVendor { deal_id: i64, vendor_id: i64 },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    // Not part of the point-of-sale taxonomy, but still surfaced verbatim:
    #[error("Deal {0} is not available for claiming")]
    DealUnavailable(i64),

    #[error("Claim is awaiting activation")]
    ClaimPending,

    #[error("Claim {0} not found")]
    ClaimNotFound(Uuid),

    #[error("Invalid claim transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Could not allocate a free claim code after {0} tries")]
    CodeSpaceExhausted(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hashing(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether a caller may reasonably retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable(_) | Error::Migration(_) | Error::Io(_)
        )
    }

    /// Stable snake_case identifier surfaced to UIs and written to the audit log.
    pub fn code(&self) -> &'static str {
        match self {
            Error::DuplicateActiveClaim { .. } => "duplicate_active_claim",
            Error::ClaimExpired => "claim_expired",
            Error::AlreadyRedeemed => "already_redeemed",
            Error::InvalidCode => "invalid_code",
            Error::InvalidPin => "invalid_pin",
            Error::RateLimited { .. } => "rate_limited",
            Error::DealNotFound(_) => "deal_not_found",
            Error::NotDealVendor { .. } => "not_deal_vendor",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::DealUnavailable(_) => "deal_unavailable",
            Error::ClaimPending => "claim_pending",
            Error::ClaimNotFound(_) => "claim_not_found",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::CodeSpaceExhausted(_) => "code_space_exhausted",
            Error::Config(_) => "config",
            Error::Hashing(_) => "hashing",
            Error::Migration(_) => "migration",
            Error::Io(_) => "io",
            Error::Join(_) => "internal",
        }
    }
}
