//! Quota and entitlement storage
//!
//! Persists premium expiry and per-day usage counters in a local SQLite file.
//! Counter and expiry updates are single upsert statements, so concurrent
//! workers and the dispatcher never need an in-process lock around them.
//! Days are UTC calendar dates.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::UserId;

const SECONDS_PER_DAY: i64 = 86_400;

/// Errors that can occur during quota storage operations
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored timestamp could not be represented
    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC calendar day
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Premium state of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PremiumInfo {
    /// Whether the stored expiry lies in the future
    pub is_premium: bool,
    /// Stored expiry, possibly in the past
    pub premium_until: Option<DateTime<Utc>>,
}

/// Result of a daily quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    /// Whether another job may be submitted
    pub allowed: bool,
    /// Successful exports today
    pub used: u32,
    /// Free daily limit, reported for premium users too
    pub limit: u32,
}

/// Decide whether a user may run another job.
#[must_use]
pub const fn evaluate_quota(is_premium: bool, used: u32, limit: u32) -> QuotaCheck {
    QuotaCheck {
        allowed: is_premium || used < limit,
        used,
        limit,
    }
}

/// Interface for quota and entitlement storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Get the premium state of a user
    async fn premium_info(&self, user_id: UserId) -> Result<PremiumInfo, QuotaError>;
    /// True iff a stored expiry exists and is strictly after now
    async fn is_premium(&self, user_id: UserId) -> Result<bool, QuotaError>;
    /// Overwrite the premium expiry (`None` removes it)
    async fn set_premium_until(
        &self,
        user_id: UserId,
        premium_until: Option<DateTime<Utc>>,
    ) -> Result<(), QuotaError>;
    /// Extend premium by `days` from the later of now and the current expiry
    async fn grant_premium_days(
        &self,
        user_id: UserId,
        days: u32,
    ) -> Result<DateTime<Utc>, QuotaError>;
    /// Usage counter for a given day
    async fn usage_on(&self, user_id: UserId, day: NaiveDate) -> Result<u32, QuotaError>;
    /// Usage counter for the current UTC day
    async fn usage_today(&self, user_id: UserId) -> Result<u32, QuotaError>;
    /// Add `amount` to today's counter and return the new total.
    /// Call this only after a successful export.
    async fn increment_usage(&self, user_id: UserId, amount: u32) -> Result<u32, QuotaError>;
    /// Check whether the user may submit another job today
    async fn can_process(
        &self,
        user_id: UserId,
        free_daily_limit: u32,
    ) -> Result<QuotaCheck, QuotaError>;
}

/// SQLite-backed quota store
pub struct SqliteQuotaStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteQuotaStore {
    /// Open (or create) the database file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, QuotaError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Quota database opened");
        Self::with_pool(pool, Arc::new(SystemClock)).await
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, QuotaError> {
        // Every connection to `sqlite::memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, Arc::new(SystemClock)).await
    }

    /// Wrap an existing pool, creating the schema if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn with_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self, QuotaError> {
        ensure_schema(&pool).await?;
        Ok(Self { pool, clock })
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

async fn ensure_schema(pool: &SqlitePool) -> Result<(), QuotaError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            telegram_id   INTEGER PRIMARY KEY,
            premium_until INTEGER
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS usage (
            telegram_id INTEGER NOT NULL,
            day         TEXT    NOT NULL,
            count       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (telegram_id, day)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn from_epoch(ts: i64) -> Result<DateTime<Utc>, QuotaError> {
    DateTime::<Utc>::from_timestamp(ts, 0).ok_or(QuotaError::InvalidTimestamp(ts))
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn count_from_db(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    async fn premium_info(&self, user_id: UserId) -> Result<PremiumInfo, QuotaError> {
        let stored: Option<Option<i64>> =
            sqlx::query_scalar("SELECT premium_until FROM users WHERE telegram_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(ts) = stored.flatten() else {
            return Ok(PremiumInfo {
                is_premium: false,
                premium_until: None,
            });
        };

        let premium_until = from_epoch(ts)?;
        Ok(PremiumInfo {
            is_premium: premium_until > self.clock.now(),
            premium_until: Some(premium_until),
        })
    }

    async fn is_premium(&self, user_id: UserId) -> Result<bool, QuotaError> {
        Ok(self.premium_info(user_id).await?.is_premium)
    }

    async fn set_premium_until(
        &self,
        user_id: UserId,
        premium_until: Option<DateTime<Utc>>,
    ) -> Result<(), QuotaError> {
        sqlx::query(
            "INSERT INTO users (telegram_id, premium_until)
             VALUES (?1, ?2)
             ON CONFLICT(telegram_id)
             DO UPDATE SET premium_until = excluded.premium_until",
        )
        .bind(user_id)
        .bind(premium_until.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn grant_premium_days(
        &self,
        user_id: UserId,
        days: u32,
    ) -> Result<DateTime<Utc>, QuotaError> {
        let now = self.clock.now().timestamp();
        let extension = i64::from(days) * SECONDS_PER_DAY;

        // Base is max(now, current expiry); one statement keeps it atomic.
        let until: i64 = sqlx::query_scalar(
            "INSERT INTO users (telegram_id, premium_until)
             VALUES (?1, ?2 + ?3)
             ON CONFLICT(telegram_id)
             DO UPDATE SET premium_until = MAX(COALESCE(users.premium_until, 0), ?2) + ?3
             RETURNING premium_until",
        )
        .bind(user_id)
        .bind(now)
        .bind(extension)
        .fetch_one(&self.pool)
        .await?;

        debug!(user_id, days, until, "Premium extended");
        from_epoch(until)
    }

    async fn usage_on(&self, user_id: UserId, day: NaiveDate) -> Result<u32, QuotaError> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT count FROM usage WHERE telegram_id = ? AND day = ?")
                .bind(user_id)
                .bind(day_key(day))
                .fetch_optional(&self.pool)
                .await?;
        Ok(count.map_or(0, count_from_db))
    }

    async fn usage_today(&self, user_id: UserId) -> Result<u32, QuotaError> {
        self.usage_on(user_id, self.clock.today()).await
    }

    async fn increment_usage(&self, user_id: UserId, amount: u32) -> Result<u32, QuotaError> {
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO usage (telegram_id, day, count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(telegram_id, day)
             DO UPDATE SET count = count + excluded.count
             RETURNING count",
        )
        .bind(user_id)
        .bind(day_key(self.clock.today()))
        .bind(i64::from(amount))
        .fetch_one(&self.pool)
        .await?;
        Ok(count_from_db(count))
    }

    async fn can_process(
        &self,
        user_id: UserId,
        free_daily_limit: u32,
    ) -> Result<QuotaCheck, QuotaError> {
        let used = self.usage_today(user_id).await?;
        let is_premium = self.is_premium(user_id).await?;
        Ok(evaluate_quota(is_premium, used, free_daily_limit))
    }
}
