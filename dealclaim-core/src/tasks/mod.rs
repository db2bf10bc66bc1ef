pub mod expiry_sweep;
pub mod legacy_pin_migration;

pub use expiry_sweep::spawn_expiry_sweep_task;
pub use legacy_pin_migration::{migrate_legacy_pins, MigrationReport};
