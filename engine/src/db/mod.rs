/// Database module for SQLite persistence
///
/// This module owns the SQLite file that backs short-term memory, long-term
/// memory, daily usage counters and the steering queue. It uses sqlx with WAL
/// mode so that a reader process can poll the same file while the agent writes.
use anyhow::{Context, Result};
use sdk::errors::EngineError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite busy / locked result codes
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode so readers never block the writer
    /// 3. Run migrations to set up the schema
    ///
    /// SQLite recovers a leftover WAL automatically when the file is reopened
    /// after an unclean shutdown.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        // Configure SQLite connection with WAL mode
        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .disable_statement_logging();

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };

        // Run migrations
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    ///
    /// Migrations are idempotent and can be run multiple times safely.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush the WAL to disk
    ///
    /// Called during graceful shutdown so the main database file is complete.
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Close the database connection
    ///
    /// This flushes the WAL and closes all connections in the pool.
    pub async fn close(&self) -> Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        info!("Database connection closed");
        Ok(())
    }

    /// Create a memory store over this database
    pub fn memory_store(&self) -> crate::memory::SqliteMemoryStore {
        crate::memory::SqliteMemoryStore::new(self.pool.clone())
    }

    /// Create a steering queue over this database
    pub fn steering_queue(&self) -> crate::steering::CommandQueue {
        crate::steering::CommandQueue::new(self.pool.clone())
    }
}

/// Classify a sqlx error for the retry layer
///
/// Pool exhaustion, I/O failures and SQLite busy/locked conditions are
/// transient; everything else is a hard database error.
pub fn classify_sqlx_error(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            EngineError::StoreUnavailable(err.to_string())
        }
        sqlx::Error::Database(db_err)
            if matches!(
                db_err.code().as_deref(),
                Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)
            ) =>
        {
            EngineError::StoreUnavailable(err.to_string())
        }
        _ => EngineError::Database(err.to_string()),
    }
}
