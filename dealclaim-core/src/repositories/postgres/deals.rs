// File: dealclaim-core/src/repositories/postgres/deals.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use dealclaim_common::models::{Customer, Deal};
use dealclaim_common::traits::{CustomerRepository, DealRepository};

use crate::Error;

/// Read access to the listings tables (deals, users).
#[derive(Clone)]
pub struct PostgresDealRepository {
    pool: Pool<Postgres>,
}

impl PostgresDealRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DealRepository for PostgresDealRepository {
    async fn get_deal(&self, deal_id: i64) -> Result<Option<Deal>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT deal_id, vendor_id, title, discount_percent, is_active,
                   requires_activation, valid_until, max_redemptions,
                   current_redemptions, total_redemptions
            FROM deals
            WHERE deal_id = $1
            "#,
        )
            .bind(deal_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(r) = row_opt {
            let deal = Deal {
                deal_id: r.try_get("deal_id")?,
                vendor_id: r.try_get("vendor_id")?,
                title: r.try_get("title")?,
                discount_percent: r.try_get("discount_percent")?,
                is_active: r.try_get("is_active")?,
                requires_activation: r.try_get("requires_activation")?,
                valid_until: r.try_get("valid_until")?,
                max_redemptions: r.try_get("max_redemptions")?,
                current_redemptions: r.try_get::<Option<i64>, _>("current_redemptions")?.unwrap_or(0),
                total_redemptions: r.try_get::<Option<i64>, _>("total_redemptions")?.unwrap_or(0),
            };
            Ok(Some(deal))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl CustomerRepository for PostgresDealRepository {
    async fn get_customer(&self, user_id: i64) -> Result<Option<Customer>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT user_id, display_name, deals_claimed
            FROM users
            WHERE user_id = $1
            "#,
        )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(r) = row_opt {
            Ok(Some(Customer {
                user_id: r.try_get("user_id")?,
                display_name: r.try_get("display_name")?,
                deals_claimed: r.try_get::<Option<i64>, _>("deals_claimed")?.unwrap_or(0),
            }))
        } else {
            Ok(None)
        }
    }
}
