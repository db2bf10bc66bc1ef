// File: dealclaim-core/src/repositories/postgres/ledger.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::warn;

use dealclaim_common::models::{Claim, ClaimTransition};
use dealclaim_common::traits::RedemptionLedger;

use crate::repositories::postgres::claims::apply_transition;
use crate::Error;

/// Redemption booking in one transaction: the conditional claim update,
/// then each counter as a single `SET x = COALESCE(x, 0) + 1` so Postgres
/// serialises concurrent redemptions on the row lock.
#[derive(Clone)]
pub struct PostgresRedemptionLedger {
    pool: Pool<Postgres>,
}

impl PostgresRedemptionLedger {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RedemptionLedger for PostgresRedemptionLedger {
    async fn redeem_claim(
        &self,
        claim: &Claim,
        vendor_id: i64,
        transition: &ClaimTransition,
    ) -> Result<bool, Error> {
        transition.ensure_forward()?;
        let mut tx = self.pool.begin().await?;

        if !apply_transition(&mut *tx, claim.claim_id, transition).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let deal = sqlx::query(
            r#"
            UPDATE deals
            SET current_redemptions = COALESCE(current_redemptions, 0) + 1,
                total_redemptions   = COALESCE(total_redemptions, 0) + 1
            WHERE deal_id = $1
            "#,
        )
            .bind(claim.deal_id)
            .execute(&mut *tx)
            .await?;

        if deal.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::DealNotFound(claim.deal_id));
        }

        let vendor = sqlx::query(
            r#"
            UPDATE vendors
            SET total_redemptions = COALESCE(total_redemptions, 0) + 1
            WHERE vendor_id = $1
            "#,
        )
            .bind(vendor_id)
            .execute(&mut *tx)
            .await?;
        if vendor.rows_affected() == 0 {
            warn!("redeem_claim: vendor {} missing; counter not incremented", vendor_id);
        }

        let user = sqlx::query(
            r#"
            UPDATE users
            SET deals_claimed = COALESCE(deals_claimed, 0) + 1
            WHERE user_id = $1
            "#,
        )
            .bind(claim.user_id)
            .execute(&mut *tx)
            .await?;
        if user.rows_affected() == 0 {
            warn!("redeem_claim: user {} missing; counter not incremented", claim.user_id);
        }

        tx.commit().await?;
        Ok(true)
    }
}
