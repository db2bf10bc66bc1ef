// File: dealclaim-core/src/repositories/postgres/deal_secrets.rs

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use dealclaim_common::models::{DealVerificationSecret, HashedPin};
use dealclaim_common::traits::DealSecretRepository;

use crate::Error;

#[derive(Clone)]
pub struct PostgresDealSecretRepository {
    pool: Pool<Postgres>,
}

impl PostgresDealSecretRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn secret_from_row(r: &PgRow) -> Result<DealVerificationSecret, Error> {
    Ok(DealVerificationSecret {
        deal_id: r.try_get("deal_id")?,
        pin_hash: r.try_get("pin_hash")?,
        pin_salt: r.try_get("pin_salt")?,
        pin_iterations: r.try_get("pin_iterations")?,
        pin_created_at: r.try_get("pin_created_at")?,
        pin_expires_at: r.try_get("pin_expires_at")?,
        legacy_pin: r.try_get("legacy_pin")?,
    })
}

#[async_trait]
impl DealSecretRepository for PostgresDealSecretRepository {
    async fn get_secret(&self, deal_id: i64) -> Result<Option<DealVerificationSecret>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT deal_id, pin_hash, pin_salt, pin_iterations,
                   pin_created_at, pin_expires_at, legacy_pin
            FROM deal_verification_secrets
            WHERE deal_id = $1
            "#,
        )
            .bind(deal_id)
            .fetch_optional(&self.pool)
            .await?;

        row_opt.as_ref().map(secret_from_row).transpose()
    }

    async fn store_hashed_pin(&self, deal_id: i64, pin: &HashedPin) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO deal_verification_secrets (
                deal_id, pin_hash, pin_salt, pin_iterations,
                pin_created_at, pin_expires_at, legacy_pin
            )
            VALUES ($1, $2, $3, $4, $5, $6, NULL)
            ON CONFLICT (deal_id) DO UPDATE
            SET pin_hash       = EXCLUDED.pin_hash,
                pin_salt       = EXCLUDED.pin_salt,
                pin_iterations = EXCLUDED.pin_iterations,
                pin_created_at = EXCLUDED.pin_created_at,
                pin_expires_at = EXCLUDED.pin_expires_at,
                legacy_pin     = NULL
            "#,
        )
            .bind(deal_id)
            .bind(&pin.hash)
            .bind(&pin.salt)
            .bind(pin.iterations)
            .bind(pin.created_at)
            .bind(pin.expires_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_legacy_secrets(&self, limit: i64) -> Result<Vec<DealVerificationSecret>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT deal_id, pin_hash, pin_salt, pin_iterations,
                   pin_created_at, pin_expires_at, legacy_pin
            FROM deal_verification_secrets
            WHERE legacy_pin IS NOT NULL
              AND pin_hash IS NULL
            ORDER BY deal_id
            LIMIT $1
            "#,
        )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(secret_from_row).collect()
    }
}
