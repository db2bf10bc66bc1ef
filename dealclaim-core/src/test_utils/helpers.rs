// File: dealclaim-core/src/test_utils/helpers.rs

use std::sync::OnceLock;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, Pool, Postgres};
use tokio::sync::{Mutex, MutexGuard};

use crate::db::Database;
use crate::Error;

const TEST_DB_NAME: &str = "dealclaim_test";

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Serialises tests that share the test database; hold the guard for the
/// whole test.
pub async fn lock_test_database() -> MutexGuard<'static, ()> {
    TEST_DB_LOCK.get_or_init(|| Mutex::new(())).lock().await
}

/// URL of the Postgres test database, when one is configured.
/// Postgres-backed tests return early when this is `None`.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok().filter(|u| !u.is_empty())
}

/// Create the test database if it does not exist yet.
pub async fn ensure_test_database_exists() -> Result<(), Error> {
    let admin_url = std::env::var("DATABASE_ADMIN_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/postgres".to_string());

    let mut conn = PgConnection::connect(&admin_url).await?;

    let create_db_sql = format!("CREATE DATABASE {TEST_DB_NAME};");
    match sqlx::query(&create_db_sql).execute(&mut conn).await {
        Ok(_) => {
            println!("Created test DB '{TEST_DB_NAME}'.");
        }
        Err(e) => {
            // 42P04 => "duplicate_database"
            let duplicate = e
                .as_database_error()
                .and_then(|db_err| db_err.code())
                .is_some_and(|code| code == "42P04");
            if !duplicate {
                return Err(Error::StorageUnavailable(e));
            }
        }
    }

    Ok(())
}

pub async fn create_test_db_pool(url: &str) -> Result<Pool<Postgres>, Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await?;

    Ok(pool)
}

/// Wipes out test data so each test can start fresh.
pub async fn clean_database(pool: &Pool<Postgres>) -> Result<(), Error> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            verification_attempts,
            deal_verification_secrets,
            claims,
            deals,
            users,
            vendors
        RESTART IDENTITY CASCADE;
        "#,
    )
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns a migrated, empty test DB handle, or `None` when no test
/// database is configured.
pub async fn setup_test_database() -> Result<Option<Database>, Error> {
    let Some(url) = test_database_url() else {
        return Ok(None);
    };
    if std::env::var("DATABASE_ADMIN_URL").is_ok() {
        ensure_test_database_exists().await?;
    }

    let pool = create_test_db_pool(&url).await?;
    let db = Database::from_pool(pool);
    db.migrate().await?;
    clean_database(db.pool()).await?;

    Ok(Some(db))
}

/// Inserts a vendor, a customer and a deal with the given ids.
pub async fn seed_deal(
    pool: &Pool<Postgres>,
    vendor_id: i64,
    user_id: i64,
    deal_id: i64,
    discount_percent: i32,
) -> Result<(), Error> {
    sqlx::query("INSERT INTO vendors (vendor_id, name) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(vendor_id)
        .bind(format!("vendor {vendor_id}"))
        .execute(pool)
        .await?;

    sqlx::query("INSERT INTO users (user_id, display_name) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .bind(format!("user {user_id}"))
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO deals (deal_id, vendor_id, title, discount_percent, is_active)
        VALUES ($1, $2, $3, $4, TRUE)
        "#,
    )
        .bind(deal_id)
        .bind(vendor_id)
        .bind(format!("deal {deal_id}"))
        .bind(discount_percent)
        .execute(pool)
        .await?;

    Ok(())
}
