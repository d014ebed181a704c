//! Admission control
//!
//! Gates every scheduler iteration on two daily ceilings: loops and estimated
//! tokens. Consumption is tracked per UTC date in the `usage_records` table:
//!
//! - An iteration may proceed while today's loop count and token estimate are
//!   both below their ceilings.
//! - A warning is logged once per day when either crosses the warn ratio
//!   (90% by default). It never blocks.
//! - Records older than seven days are pruned on every write.
//!
//! The day boundary is UTC midnight. A new date has no record, so admission
//! reopens as soon as the date changes regardless of earlier throttling.

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use sdk::types::UsageRecord;
use sqlx::{Row, SqlitePool};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BudgetConfig;

/// Days of usage history kept, today included
pub const USAGE_RETENTION_DAYS: u64 = 7;

const MIN_BACKOFF: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(3600);
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Daily ceilings
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    pub max_loops_per_day: u64,
    pub max_tokens_per_day: u64,
    pub warn_ratio: f64,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self::from(&BudgetConfig::default())
    }
}

impl From<&BudgetConfig> for AdmissionLimits {
    fn from(config: &BudgetConfig) -> Self {
        Self {
            max_loops_per_day: config.max_loops_per_day,
            max_tokens_per_day: config.max_tokens_per_day,
            warn_ratio: config.warn_ratio,
        }
    }
}

/// Answer to "may the next iteration run?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    /// Why the iteration was denied
    pub reason: Option<String>,
    /// Today's usage at decision time
    pub usage: UsageRecord,
}

/// Throttle sleep after `consecutive_throttles` denials in a row
///
/// One minute for the first denial, doubling each time, capped at one hour.
pub fn backoff_duration(consecutive_throttles: u32) -> Duration {
    let exponent = consecutive_throttles.saturating_sub(1).min(16);
    MIN_BACKOFF
        .checked_mul(1u32 << exponent)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

/// Time left until the next UTC midnight
pub fn time_until_reset(now: DateTime<Utc>) -> Duration {
    let next_midnight = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    match next_midnight {
        Some(midnight) => (midnight - now).to_std().unwrap_or(Duration::ZERO),
        None => MAX_BACKOFF,
    }
}

/// Daily loop/token budget backed by SQLite
pub struct AdmissionController {
    pool: SqlitePool,
    limits: AdmissionLimits,
    warned_on: Mutex<Option<NaiveDate>>,
}

impl AdmissionController {
    pub fn new(pool: SqlitePool, limits: AdmissionLimits) -> Self {
        Self {
            pool,
            limits,
            warned_on: Mutex::new(None),
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    pub async fn can_proceed(&self) -> Result<AdmissionDecision> {
        self.can_proceed_at(Utc::now()).await
    }

    /// Decide admission as of `now`
    pub async fn can_proceed_at(&self, now: DateTime<Utc>) -> Result<AdmissionDecision> {
        let today = now.date_naive();
        let usage = self.usage_for(today).await?;

        let reason = if usage.loop_count >= self.limits.max_loops_per_day {
            Some(format!(
                "daily loop limit reached ({}/{})",
                usage.loop_count, self.limits.max_loops_per_day
            ))
        } else if usage.estimated_tokens >= self.limits.max_tokens_per_day {
            Some(format!(
                "daily token limit reached ({}/{})",
                usage.estimated_tokens, self.limits.max_tokens_per_day
            ))
        } else {
            None
        };

        if let Some(reason) = &reason {
            debug!("Admission denied: {}", reason);
        } else {
            self.maybe_warn(&usage);
        }

        Ok(AdmissionDecision {
            allowed: reason.is_none(),
            reason,
            usage,
        })
    }

    pub async fn record_consumption(&self, estimated_tokens: u64) -> Result<UsageRecord> {
        self.record_consumption_at(estimated_tokens, Utc::now()).await
    }

    /// Count one loop and `estimated_tokens` against the day of `now`
    pub async fn record_consumption_at(
        &self,
        estimated_tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord> {
        let today = now.date_naive();
        let tokens = i64::try_from(estimated_tokens).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO usage_records (date, loop_count, estimated_tokens)
            VALUES (?, 1, ?)
            ON CONFLICT(date) DO UPDATE SET
                loop_count = loop_count + 1,
                estimated_tokens = estimated_tokens + excluded.estimated_tokens
            "#,
        )
        .bind(today.format(DATE_FORMAT).to_string())
        .bind(tokens)
        .execute(&self.pool)
        .await
        .context("Failed to record consumption")?;

        self.prune(today).await?;

        let usage = self.usage_for(today).await?;
        debug!(
            "Usage {}: {} loops, {} tokens",
            usage.date, usage.loop_count, usage.estimated_tokens
        );
        Ok(usage)
    }

    /// Usage for one date; an absent record reads as zero
    pub async fn usage_for(&self, date: NaiveDate) -> Result<UsageRecord> {
        let row = sqlx::query(
            "SELECT loop_count, estimated_tokens FROM usage_records WHERE date = ?",
        )
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read usage record")?;

        Ok(match row {
            Some(row) => UsageRecord {
                date,
                loop_count: row.get::<i64, _>("loop_count").max(0) as u64,
                estimated_tokens: row.get::<i64, _>("estimated_tokens").max(0) as u64,
            },
            None => UsageRecord::empty(date),
        })
    }

    /// Retained usage records, newest first
    pub async fn usage_history(&self) -> Result<Vec<UsageRecord>> {
        let rows = sqlx::query(
            "SELECT date, loop_count, estimated_tokens FROM usage_records ORDER BY date DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read usage history")?;

        rows.iter()
            .map(|row| -> Result<UsageRecord> {
                let date: String = row.get("date");
                Ok(UsageRecord {
                    date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                        .with_context(|| format!("Invalid usage date '{}'", date))?,
                    loop_count: row.get::<i64, _>("loop_count").max(0) as u64,
                    estimated_tokens: row.get::<i64, _>("estimated_tokens").max(0) as u64,
                })
            })
            .collect()
    }

    /// Drop records outside the retention window
    async fn prune(&self, today: NaiveDate) -> Result<()> {
        let Some(cutoff) = today.checked_sub_days(Days::new(USAGE_RETENTION_DAYS - 1)) else {
            return Ok(());
        };

        let result = sqlx::query("DELETE FROM usage_records WHERE date < ?")
            .bind(cutoff.format(DATE_FORMAT).to_string())
            .execute(&self.pool)
            .await
            .context("Failed to prune usage records")?;

        if result.rows_affected() > 0 {
            info!("Pruned {} old usage records", result.rows_affected());
        }
        Ok(())
    }

    fn maybe_warn(&self, usage: &UsageRecord) {
        let loop_ratio = usage.loop_count as f64 / self.limits.max_loops_per_day as f64;
        let token_ratio = usage.estimated_tokens as f64 / self.limits.max_tokens_per_day as f64;
        if loop_ratio < self.limits.warn_ratio && token_ratio < self.limits.warn_ratio {
            return;
        }

        let mut warned_on = self
            .warned_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *warned_on == Some(usage.date) {
            return;
        }
        *warned_on = Some(usage.date);

        warn!(
            "Daily budget at {:.0}% of loops ({}/{}) and {:.0}% of tokens ({}/{})",
            loop_ratio * 100.0,
            usage.loop_count,
            self.limits.max_loops_per_day,
            token_ratio * 100.0,
            usage.estimated_tokens,
            self.limits.max_tokens_per_day
        );
    }

    #[cfg(test)]
    fn warned_on(&self) -> Option<NaiveDate> {
        *self.warned_on.lock().unwrap()
    }
}
