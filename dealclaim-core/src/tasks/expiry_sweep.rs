// src/tasks/expiry_sweep.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::services::CredentialStore;

/// Spawns a background task that periodically moves active claims past
/// their deadline to `expired`, releasing their codes and (user, deal) slots.
///
/// Verification already treats such claims as expired; the sweep only keeps
/// the table tidy.
pub fn spawn_expiry_sweep_task(credentials: Arc<CredentialStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match credentials.expire_stale_claims().await {
                Ok(0) => debug!("expiry sweep: nothing to expire"),
                Ok(n) => info!("expiry sweep: {} claims expired", n),
                Err(e) => error!("expiry sweep failed: {}", e),
            }
        }
    })
}
