use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::Duration;
use tracing::{info, warn};

use dealclaim_common::traits::{Clock, SystemClock};
use dealclaim_core::http::start_http_server;
use dealclaim_core::repositories::MemoryStore;
use dealclaim_core::crypto::VendorTokenSigner;
use dealclaim_core::services::{ClaimEngine, Stores};
use dealclaim_core::tasks::{migrate_legacy_pins, spawn_expiry_sweep_task};
use dealclaim_core::test_utils::seed_marketplace;
use dealclaim_core::{Database, EngineConfig};

use crate::{Args, StoreKind};

const SHUTDOWN_GRACE: StdDuration = StdDuration::from_secs(10);

fn engine_config(args: &Args) -> EngineConfig {
    EngineConfig {
        code_ttl: Duration::hours(args.code_ttl_hours),
        rotation_window: Duration::minutes(args.rotation_window_minutes),
        pin_validity: (args.pin_validity_days > 0).then(|| Duration::days(args.pin_validity_days)),
        pbkdf2_iterations: args.pbkdf2_iterations,
        hourly_failure_limit: args.hourly_failure_limit,
        daily_failure_limit: args.daily_failure_limit,
        legacy_pin_fallback: !args.no_legacy_pins,
        ..EngineConfig::default()
    }
}

async fn open_stores(args: &Args) -> anyhow::Result<Stores> {
    match args.store {
        StoreKind::Postgres => {
            let db = Database::new(&args.database_url, args.max_connections)
                .await
                .context("connecting to Postgres")?;
            db.migrate().await.context("applying migrations")?;
            Ok(Stores::postgres(&db))
        }
        StoreKind::Memory => {
            warn!("using the in-process store; nothing survives a restart");
            let store = Arc::new(MemoryStore::new());
            seed_marketplace(&store);
            Ok(Stores::memory(store))
        }
    }
}

pub async fn run_server(args: Args) -> anyhow::Result<()> {
    if let Some(vendor_id) = args.issue_vendor_token {
        let signer = VendorTokenSigner::new(args.pin_secret.as_bytes())?;
        println!("{}", signer.issue(vendor_id));
        return Ok(());
    }

    let config = engine_config(&args);
    config.validate()?;

    let stores = open_stores(&args).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if args.migrate_legacy_pins {
        let report = migrate_legacy_pins(stores.secrets.clone(), config.pin_hasher(), clock.clone()).await?;
        info!(
            "legacy PINs: {} migrated, {} left in place",
            report.migrated, report.skipped
        );
    }

    let engine = ClaimEngine::new(stores, &config, args.pin_secret.as_bytes(), clock)?;

    let sweep = (args.sweep_interval_secs > 0).then(|| {
        spawn_expiry_sweep_task(
            engine.credentials.clone(),
            StdDuration::from_secs(args.sweep_interval_secs),
        )
    });

    if args.trusted_proxies.is_empty() {
        info!("no trusted proxies; callers are identified by socket address");
    }
    let server = start_http_server(args.server_addr, engine, args.trusted_proxies.clone()).await?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown requested, draining requests...");

    if let Some(task) = sweep {
        task.abort();
    }
    server.shutdown(SHUTDOWN_GRACE).await?;
    Ok(())
}
