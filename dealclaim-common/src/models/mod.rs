// File: dealclaim-common/src/models/mod.rs
pub mod attempt;
pub mod claim;
pub mod deal;

pub use attempt::{
    AttemptKind, AttemptLimit, AttemptRecord, AttemptScope, IdentityKey, RequestIdentity, Reservation,
    PENDING_REASON, RATE_LIMITED_REASON,
};
pub use claim::{Claim, ClaimStatus, ClaimTransition};
pub use deal::{Customer, Deal, DealVerificationSecret, HashedPin, Vendor};
