// src/repositories/mod.rs

pub mod memory;
pub mod postgres;

pub use dealclaim_common::traits::{
    AttemptRepository, ClaimInsert, ClaimRepository, CustomerRepository, DealRepository,
    DealSecretRepository, RedemptionLedger,
};
pub use memory::MemoryStore;
pub use postgres::{
    PostgresAttemptRepository, PostgresClaimRepository, PostgresDealRepository,
    PostgresDealSecretRepository, PostgresRedemptionLedger,
};
