use std::net::{IpAddr, SocketAddr};

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod server;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Postgres at `--database-url` (migrations applied on startup).
    Postgres,
    /// In-process store seeded with a demo marketplace; state is lost on exit.
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "dealclaim")]
#[command(author, version, about = "dealclaim - claim code and deal PIN verification service")]
pub struct Args {
    /// Address the HTTP API binds to.
    #[arg(long, env = "DEALCLAIM_ADDR", default_value = "0.0.0.0:8080")]
    pub server_addr: SocketAddr,

    #[arg(long, value_enum, env = "DEALCLAIM_STORE", default_value = "postgres")]
    pub store: StoreKind,

    /// Postgres connection URL.
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://postgres@localhost:5432/dealclaim")]
    pub database_url: String,

    #[arg(long, env = "DEALCLAIM_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Server secret keying the rotating deal PINs (at least 32 bytes).
    /// Every instance serving the same deals needs the same value.
    #[arg(long, env = "DEALCLAIM_PIN_SECRET", hide_env_values = true)]
    pub pin_secret: String,

    #[arg(long, env = "DEALCLAIM_CODE_TTL_HOURS", default_value_t = 24)]
    pub code_ttl_hours: i64,

    #[arg(long, env = "DEALCLAIM_ROTATION_WINDOW_MINUTES", default_value_t = 30)]
    pub rotation_window_minutes: i64,

    /// Lifetime of a static deal PIN; 0 means static PINs never expire.
    #[arg(long, env = "DEALCLAIM_PIN_VALIDITY_DAYS", default_value_t = 90)]
    pub pin_validity_days: i64,

    #[arg(long, env = "DEALCLAIM_PBKDF2_ITERATIONS", default_value_t = 210_000)]
    pub pbkdf2_iterations: u32,

    #[arg(long, env = "DEALCLAIM_HOURLY_FAILURE_LIMIT", default_value_t = 5)]
    pub hourly_failure_limit: i64,

    #[arg(long, env = "DEALCLAIM_DAILY_FAILURE_LIMIT", default_value_t = 10)]
    pub daily_failure_limit: i64,

    /// Refuse pre-migration plaintext PINs.
    #[arg(long, env = "DEALCLAIM_NO_LEGACY_PINS", default_value = "false")]
    pub no_legacy_pins: bool,

    /// Hash every remaining plaintext legacy PIN before serving.
    #[arg(long, default_value = "false")]
    pub migrate_legacy_pins: bool,

    /// Seconds between expiry sweeps; 0 disables the sweep.
    #[arg(long, env = "DEALCLAIM_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Front proxies whose `x-forwarded-for` and `x-user-id` headers are
    /// trusted, comma separated. Empty: every caller is its socket address.
    #[arg(long, env = "DEALCLAIM_TRUSTED_PROXIES", value_delimiter = ',')]
    pub trusted_proxies: Vec<IpAddr>,

    /// Print the bearer token for this vendor id and exit.
    #[arg(long, value_name = "VENDOR_ID")]
    pub issue_vendor_token: Option<i64>,
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("dealclaim=info".parse()?);
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)
        .map_err(|e| anyhow::anyhow!("failed to set global subscriber: {e}"))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;
    let args = Args::parse();
    info!(
        "dealclaim starting. addr={}, store={:?}, legacy_pins={}",
        args.server_addr, args.store, !args.no_legacy_pins
    );

    if let Err(e) = server::run_server(args).await {
        error!("Server error: {:?}", e);
        return Err(e);
    }
    info!("Main finished. Goodbye!");
    Ok(())
}
