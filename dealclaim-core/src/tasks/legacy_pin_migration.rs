// src/tasks/legacy_pin_migration.rs

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use dealclaim_common::traits::{Clock, DealSecretRepository};

use crate::crypto::PinHasher;
use crate::Error;

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    /// Legacy PINs that are not valid static PINs and were left in place.
    pub skipped: usize,
}

/// Hashes every remaining plaintext legacy PIN in place.
///
/// Run once (e.g. on startup with `--migrate-legacy-pins`) to retire the
/// legacy verification tier without waiting for each merchant to log in.
pub async fn migrate_legacy_pins(
    secrets: Arc<dyn DealSecretRepository>,
    hasher: PinHasher,
    clock: Arc<dyn Clock>,
) -> Result<MigrationReport, Error> {
    let mut report = MigrationReport::default();
    let mut skipped: HashSet<i64> = HashSet::new();

    loop {
        let batch = secrets.list_legacy_secrets(BATCH_SIZE + skipped.len() as i64).await?;
        let pending: Vec<_> = batch
            .into_iter()
            .filter(|s| !skipped.contains(&s.deal_id))
            .collect();
        if pending.is_empty() {
            break;
        }

        for secret in pending {
            let Some(legacy) = secret.legacy_pin else {
                continue;
            };
            let now = clock.now();
            let hasher = hasher.clone();
            match tokio::task::spawn_blocking(move || hasher.hash(&legacy, now)).await? {
                Ok(hashed) => {
                    secrets.store_hashed_pin(secret.deal_id, &hashed).await?;
                    report.migrated += 1;
                }
                Err(e) => {
                    warn!("deal {}: legacy PIN left in place: {}", secret.deal_id, e);
                    skipped.insert(secret.deal_id);
                    report.skipped += 1;
                }
            }
        }
    }

    info!(
        "legacy PIN migration done: {} migrated, {} skipped",
        report.migrated, report.skipped
    );
    Ok(report)
}
