// File: dealclaim-core/src/repositories/postgres/attempts.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::debug;

use dealclaim_common::models::{
    AttemptKind, AttemptLimit, AttemptRecord, AttemptScope, IdentityKey, Reservation, PENDING_REASON,
};
use dealclaim_common::traits::AttemptRepository;

use crate::Error;

/// Store of verification attempts. A trigger rejects DELETE and every
/// UPDATE except settling a pending row.
#[derive(Clone)]
pub struct PostgresAttemptRepository {
    pool: Pool<Postgres>,
}

impl PostgresAttemptRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// `(kind, deal filter, user filter, ip filter)` bound into the shared
/// failure predicate below.
fn scope_params(scope: &AttemptScope) -> (&'static str, Option<i64>, Option<i64>, Option<String>) {
    let (kind, deal_id, identity) = match scope {
        AttemptScope::DealPin { deal_id, identity } => (AttemptKind::DealPin, Some(*deal_id), identity),
        AttemptScope::ClaimCode { identity } => (AttemptKind::ClaimCode, None, identity),
    };
    match identity {
        IdentityKey::User(id) => (kind.as_str(), deal_id, Some(*id), None),
        IdentityKey::Ip(ip) => (kind.as_str(), deal_id, None, Some(ip.clone())),
    }
}

/// Key of the transaction-scoped advisory lock that serialises
/// reservations for one scope.
fn scope_lock_key(scope: &AttemptScope) -> String {
    let (kind, deal_id, user_id, ip) = scope_params(scope);
    match (user_id, ip) {
        (Some(id), _) => format!("{kind}:{deal_id:?}:user:{id}"),
        (None, ip) => format!("{kind}:{deal_id:?}:ip:{}", ip.unwrap_or_default()),
    }
}

const FAILURE_PREDICATE: &str = r#"
    kind = $1
    AND ($2::BIGINT IS NULL OR deal_id = $2)
    AND (
        ($3::BIGINT IS NOT NULL AND user_id = $3)
        OR ($3::BIGINT IS NULL AND user_id IS NULL AND ip_address = $4)
    )
    AND success = FALSE
    AND attempted_at >= $5
"#;

async fn insert_attempt(conn: &mut PgConnection, attempt: &AttemptRecord) -> Result<(), Error> {
    sqlx::query(
        r#"
        INSERT INTO verification_attempts (
            attempt_id, kind, deal_id, user_id, ip_address,
            user_agent, success, failure_reason, attempted_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
        .bind(attempt.attempt_id)
        .bind(attempt.kind.as_str())
        .bind(attempt.deal_id)
        .bind(attempt.user_id)
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(attempt.success)
        .bind(&attempt.failure_reason)
        .bind(attempt.attempted_at)
        .execute(conn)
        .await?;

    Ok(())
}

/// `(failures, oldest failure)` for the scope since `since`.
async fn failures_since(
    conn: &mut PgConnection,
    scope: &AttemptScope,
    since: DateTime<Utc>,
) -> Result<(i64, Option<DateTime<Utc>>), Error> {
    let (kind, deal_id, user_id, ip) = scope_params(scope);
    let sql = format!(
        "SELECT COUNT(*) AS failures, MIN(attempted_at) AS oldest FROM verification_attempts WHERE {FAILURE_PREDICATE}"
    );

    let row = sqlx::query(&sql)
        .bind(kind)
        .bind(deal_id)
        .bind(user_id)
        .bind(ip)
        .bind(since)
        .fetch_one(conn)
        .await?;

    Ok((row.try_get("failures")?, row.try_get("oldest")?))
}

#[async_trait]
impl AttemptRepository for PostgresAttemptRepository {
    async fn reserve_attempt(
        &self,
        attempt: &AttemptRecord,
        scope: &AttemptScope,
        limits: &[AttemptLimit],
    ) -> Result<Reservation, Error> {
        let mut tx = self.pool.begin().await?;

        // Held until commit; a second reservation for the scope waits here
        // and then counts this one's row.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(scope_lock_key(scope))
            .execute(&mut *tx)
            .await?;

        let mut reservation = Reservation::Reserved;
        for limit in limits {
            let (failures, oldest) = failures_since(&mut *tx, scope, attempt.attempted_at - limit.window).await?;
            if failures >= limit.max_failures {
                reservation = Reservation::Limited {
                    window: limit.window,
                    oldest_failure: oldest.unwrap_or(attempt.attempted_at),
                };
                break;
            }
        }

        match reservation {
            Reservation::Reserved => insert_attempt(&mut *tx, attempt).await?,
            Reservation::Limited { .. } => insert_attempt(&mut *tx, &attempt.clone().rate_limited()).await?,
        }

        tx.commit().await?;
        Ok(reservation)
    }

    async fn settle_attempt(&self, attempt: &AttemptRecord) -> Result<(), Error> {
        let result = sqlx::query(
            r#"
            UPDATE verification_attempts
            SET success        = $2,
                failure_reason = $3,
                deal_id        = COALESCE(deal_id, $4)
            WHERE attempt_id = $1
              AND failure_reason = $5
              AND success = FALSE
            "#,
        )
            .bind(attempt.attempt_id)
            .bind(attempt.success)
            .bind(&attempt.failure_reason)
            .bind(attempt.deal_id)
            .bind(PENDING_REASON)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            debug!("attempt {} was not pending; left as is", attempt.attempt_id);
        }
        Ok(())
    }

    async fn list_attempts_for_deal(&self, deal_id: i64, limit: i64) -> Result<Vec<AttemptRecord>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT attempt_id, kind, deal_id, user_id, ip_address,
                   user_agent, success, failure_reason, attempted_at
            FROM verification_attempts
            WHERE deal_id = $1
            ORDER BY attempted_at DESC
            LIMIT $2
            "#,
        )
            .bind(deal_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut result = Vec::new();
        for row in rows {
            let kind: String = row.try_get("kind")?;
            result.push(AttemptRecord {
                attempt_id: row.try_get("attempt_id")?,
                kind: kind.parse()?,
                deal_id: row.try_get("deal_id")?,
                user_id: row.try_get("user_id")?,
                ip_address: row.try_get("ip_address")?,
                user_agent: row.try_get("user_agent")?,
                success: row.try_get("success")?,
                failure_reason: row.try_get("failure_reason")?,
                attempted_at: row.try_get("attempted_at")?,
            });
        }
        Ok(result)
    }
}
