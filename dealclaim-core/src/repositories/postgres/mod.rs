// src/repositories/postgres/mod.rs

pub mod attempts;
pub mod claims;
pub mod deal_secrets;
pub mod deals;
pub mod ledger;

pub use attempts::PostgresAttemptRepository;
pub use claims::PostgresClaimRepository;
pub use deal_secrets::PostgresDealSecretRepository;
pub use deals::PostgresDealRepository;
pub use ledger::PostgresRedemptionLedger;
