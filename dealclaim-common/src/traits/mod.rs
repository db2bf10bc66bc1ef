pub mod clock;
pub mod repository_traits;

pub use clock::{Clock, SystemClock};
pub use repository_traits::{
    AttemptRepository, ClaimInsert, ClaimRepository, CustomerRepository, DealRepository,
    DealSecretRepository, RedemptionLedger,
};
