// File: dealclaim-core/src/repositories/postgres/claims.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use dealclaim_common::models::{Claim, ClaimStatus, ClaimTransition};
use dealclaim_common::traits::{ClaimInsert, ClaimRepository};

use crate::Error;

const ACTIVE_CODE_INDEX: &str = "claims_active_code_uidx";
const ACTIVE_USER_DEAL_INDEX: &str = "claims_active_user_deal_uidx";

#[derive(Clone)]
pub struct PostgresClaimRepository {
    pool: Pool<Postgres>,
}

impl PostgresClaimRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn claim_from_row(row: &PgRow) -> Result<Claim, Error> {
    let status: String = row.try_get("status")?;
    Ok(Claim {
        claim_id: row.try_get("claim_id")?,
        user_id: row.try_get("user_id")?,
        deal_id: row.try_get("deal_id")?,
        claim_code: row.try_get("claim_code")?,
        code_expires_at: row.try_get("code_expires_at")?,
        status: status.parse::<ClaimStatus>()?,
        bill_amount: row.try_get("bill_amount")?,
        actual_savings: row.try_get("actual_savings")?,
        vendor_verified: row.try_get("vendor_verified")?,
        verified_at: row.try_get("verified_at")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// The conditional status update, shared with the ledger's transaction.
pub(crate) async fn apply_transition(
    conn: &mut PgConnection,
    claim_id: Uuid,
    transition: &ClaimTransition,
) -> Result<bool, Error> {
    let result = sqlx::query(
        r#"
        UPDATE claims
        SET status          = $3,
            vendor_verified = vendor_verified OR ($4::TIMESTAMPTZ IS NOT NULL),
            verified_at     = COALESCE(verified_at, $4),
            bill_amount     = COALESCE($5, bill_amount),
            actual_savings  = COALESCE($6, actual_savings),
            completed_at    = COALESCE($7, completed_at)
        WHERE claim_id = $1
          AND status = $2
        "#,
    )
        .bind(claim_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.verified_at)
        .bind(transition.bill_amount)
        .bind(transition.actual_savings)
        .bind(transition.completed_at)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl ClaimRepository for PostgresClaimRepository {
    async fn insert_claim(&self, claim: &Claim, now: DateTime<Utc>) -> Result<ClaimInsert, Error> {
        let mut tx = self.pool.begin().await?;

        // Stale active rows would otherwise hold the unique indexes.
        sqlx::query(
            r#"
            UPDATE claims
            SET status = 'expired'
            WHERE status IN ('pending', 'claimed')
              AND code_expires_at <= $1
              AND (claim_code = $2 OR (user_id = $3 AND deal_id = $4))
            "#,
        )
            .bind(now)
            .bind(&claim.claim_code)
            .bind(claim.user_id)
            .bind(claim.deal_id)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO claims (
                claim_id, user_id, deal_id, claim_code, code_expires_at,
                status, bill_amount, actual_savings, vendor_verified,
                verified_at, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
            .bind(claim.claim_id)
            .bind(claim.user_id)
            .bind(claim.deal_id)
            .bind(&claim.claim_code)
            .bind(claim.code_expires_at)
            .bind(claim.status.as_str())
            .bind(claim.bill_amount)
            .bind(claim.actual_savings)
            .bind(claim.vendor_verified)
            .bind(claim.verified_at)
            .bind(claim.created_at)
            .bind(claim.completed_at)
            .execute(&mut *tx)
            .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(ClaimInsert::Inserted)
            }
            Err(e) => {
                let constraint = e
                    .as_database_error()
                    .and_then(|db_err| db_err.constraint())
                    .map(str::to_owned);
                tx.rollback().await?;

                match constraint.as_deref() {
                    Some(ACTIVE_CODE_INDEX) => {
                        debug!("claim code collided with an active claim; caller will regenerate");
                        Ok(ClaimInsert::CodeTaken)
                    }
                    Some(ACTIVE_USER_DEAL_INDEX) => Err(Error::DuplicateActiveClaim {
                        user_id: claim.user_id,
                        deal_id: claim.deal_id,
                    }),
                    _ => Err(Error::StorageUnavailable(e)),
                }
            }
        }
    }

    async fn get_claim(&self, claim_id: Uuid) -> Result<Option<Claim>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT claim_id, user_id, deal_id, claim_code, code_expires_at,
                   status, bill_amount, actual_savings, vendor_verified,
                   verified_at, created_at, completed_at
            FROM claims
            WHERE claim_id = $1
            "#,
        )
            .bind(claim_id)
            .fetch_optional(&self.pool)
            .await?;

        row_opt.as_ref().map(claim_from_row).transpose()
    }

    async fn find_claim_by_code(&self, code: &str) -> Result<Option<Claim>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT claim_id, user_id, deal_id, claim_code, code_expires_at,
                   status, bill_amount, actual_savings, vendor_verified,
                   verified_at, created_at, completed_at
            FROM claims
            WHERE claim_code = $1
            ORDER BY (status IN ('pending', 'claimed')) DESC, created_at DESC
            LIMIT 1
            "#,
        )
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row_opt.as_ref().map(claim_from_row).transpose()
    }

    async fn transition(&self, claim_id: Uuid, transition: &ClaimTransition) -> Result<bool, Error> {
        transition.ensure_forward()?;
        let mut conn = self.pool.acquire().await?;
        apply_transition(&mut *conn, claim_id, transition).await
    }

    async fn expire_stale_claims(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE claims
            SET status = 'expired'
            WHERE status IN ('pending', 'claimed')
              AND code_expires_at <= $1
            "#,
        )
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
