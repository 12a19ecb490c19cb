use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{
    migrate::{MigrateError, Migrator},
    sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{info, warn};

use crate::{
    config::Config,
    domain::{
        allocator::{allocate, RemainderUpdate},
        total_after_grant, Balances, Deduction, GrantRecord, NewGrant, SpendAmount,
    },
    ports::ledger::{Error, LedgerPort},
};

static MIGRATOR: Migrator = sqlx::migrate!();

const GRANT_COLUMNS: &str = "id, payer, granted_points, remainder, created_at, updated_at";

/// Row type for the `grants` table
#[derive(Debug, Clone, sqlx::FromRow)]
struct GrantRow {
    id: i64,
    payer: String,
    granted_points: i64,
    remainder: i64,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<GrantRow> for GrantRecord {
    fn from(row: GrantRow) -> Self {
        Self {
            id: row.id,
            payer: row.payer,
            granted_points: row.granted_points,
            remainder: row.remainder,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Ledger stored in SQLite
///
/// Spends open their transaction with `BEGIN IMMEDIATE`, taking the database write lock before
/// reading candidates. Concurrent spends therefore run one after another, each seeing the
/// remainders committed by the previous one.
#[derive(Clone, Debug)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open the database described by `config`, creating it and its schema if needed
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(config.max_idle_time())
            .acquire_timeout(config.transaction_timeout())
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running pending migrations first
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, Error> {
        MIGRATOR.run(&pool).await?;
        info!("ledger schema is up to date");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Write an allocation's remainders inside the caller's transaction
///
/// Each update only applies if the record still holds the remainder it was allocated from.
/// The first one that does not match stops the loop with [`Error::Conflict`], leaving the
/// caller to roll back the updates already made.
async fn apply_updates(
    conn: &mut SqliteConnection,
    updates: &[RemainderUpdate],
) -> Result<(), Error> {
    for update in updates {
        let result = sqlx::query(
            "UPDATE grants SET remainder = ?, updated_at = ? WHERE id = ? AND remainder = ?",
        )
        .bind(update.remainder)
        .bind(update.updated_at)
        .bind(update.id)
        .bind(update.previous)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() != 1 {
            warn!(record = update.id, "grant changed during spend");
            return Err(Error::Conflict { id: update.id });
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl LedgerPort for SqliteLedger {
    async fn insert_grant(&self, grant: NewGrant) -> Result<GrantRecord, Error> {
        let created_at = grant.created_at.unwrap_or_else(Utc::now);
        // Dropping `tx` on any early return rolls the transaction back
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let (total,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(remainder), 0) FROM grants")
            .fetch_one(&mut *tx)
            .await?;
        if total_after_grant(total, grant.points).is_err() {
            warn!(points = grant.points, total, "grant would overflow the unspent total");
            return Err(Error::GrantOverflow {
                points: grant.points,
            });
        }

        let row = sqlx::query_as::<_, GrantRow>(&format!(
            "INSERT INTO grants (payer, granted_points, remainder, created_at) \
             VALUES (?, ?, ?, ?) RETURNING {GRANT_COLUMNS}"
        ))
        .bind(&grant.payer)
        .bind(grant.points)
        .bind(GrantRecord::initial_remainder(grant.points))
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn spend(&self, amount: SpendAmount) -> Result<Vec<Deduction>, Error> {
        // Dropping `tx` on any early return rolls the transaction back
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let candidates: Vec<GrantRecord> = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM grants \
             WHERE remainder > 0 ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        let allocation = match allocate(&candidates, amount, Utc::now()) {
            Ok(allocation) => allocation,
            Err(shortfall) => {
                // Nothing was written, so a failed rollback must not hide the shortfall
                if let Err(err) = tx.rollback().await {
                    warn!(%err, "rollback after shortfall failed");
                }
                return Err(shortfall.into());
            }
        };

        apply_updates(&mut tx, &allocation.updates).await?;

        tx.commit().await?;
        Ok(allocation.deductions)
    }

    async fn balances(&self) -> Result<Balances, Error> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT payer, SUM(remainder) FROM grants GROUP BY payer",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn grants(&self) -> Result<Vec<GrantRecord>, Error> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM grants ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Adapter(Box::new(err))
    }
}

impl From<MigrateError> for Error {
    fn from(err: MigrateError) -> Self {
        Self::Adapter(Box::new(err))
    }
}
