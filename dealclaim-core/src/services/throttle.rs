// dealclaim-core/src/services/throttle.rs

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, warn};

use dealclaim_common::models::{AttemptLimit, AttemptRecord, AttemptScope, Reservation};
use dealclaim_common::traits::AttemptRepository;

use crate::Error;

/// Bounds verification guesses and keeps the audit trail.
///
/// Every attempt is reserved before its credential is compared: the
/// repository counts the scope's failures and appends the pending row in
/// one step, so concurrent guesses cannot all slip under the limit. Limits
/// are counted from the attempt table itself and hold across instances.
pub struct AttemptThrottle {
    attempts: Arc<dyn AttemptRepository>,
    limits: [AttemptLimit; 2],
}

impl AttemptThrottle {
    pub fn new(attempts: Arc<dyn AttemptRepository>, hourly_limit: i64, daily_limit: i64) -> Self {
        Self {
            attempts,
            limits: [
                AttemptLimit { window: Duration::hours(1), max_failures: hourly_limit },
                AttemptLimit { window: Duration::days(1), max_failures: daily_limit },
            ],
        }
    }

    /// Puts `attempt` on record as pending, or fails with `RateLimited`
    /// when `scope` has used up its hourly or daily failure budget.
    pub async fn reserve(&self, attempt: &AttemptRecord, scope: &AttemptScope) -> Result<(), Error> {
        match self.attempts.reserve_attempt(attempt, scope, &self.limits).await? {
            Reservation::Reserved => Ok(()),
            Reservation::Limited { window, oldest_failure } => {
                let retry_after_secs = ((oldest_failure + window) - attempt.attempted_at)
                    .num_seconds()
                    .max(1);
                warn!(
                    "rate limit hit: failure budget for the last {}h spent by {:?}",
                    window.num_hours(),
                    scope
                );
                Err(Error::RateLimited { retry_after_secs })
            }
        }
    }

    /// Writes the final outcome onto a reserved attempt and hands it back.
    ///
    /// A row that fails to settle stays pending, which still counts against
    /// the scope, so the outcome is returned as is.
    pub async fn settle<T>(&self, mut attempt: AttemptRecord, outcome: Result<T, Error>) -> Result<T, Error> {
        attempt.resolve(outcome.as_ref().map(|_| ()));
        if let Err(e) = self.attempts.settle_attempt(&attempt).await {
            error!(
                "failed to settle {} attempt {} as {:?}: {}",
                attempt.kind, attempt.attempt_id, attempt.failure_reason, e
            );
        }
        outcome
    }

    pub async fn recent_attempts(&self, deal_id: i64, limit: i64) -> Result<Vec<AttemptRecord>, Error> {
        self.attempts.list_attempts_for_deal(deal_id, limit.clamp(1, 500)).await
    }
}
