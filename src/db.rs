//! Database connection, schema management and the job index.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode for concurrent reads
//! - Automatic migration execution
//! - The `jobs` table backing cross-run duplicate lookups
//!
//! # Example
//!
//! ```no_run
//! use fetchjob_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("fetchjob.db")).await?;
//! let id = db.insert_job("X", "a.bin", "https://example.com/a.bin", "direct").await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

use crate::duplicate::{DuplicateIndex, LookupError};
use crate::job::{Job, JobId, JobStatus};

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
/// Connections will wait this long before returning SQLITE_BUSY.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to or query the database.
    #[error("database error: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A job id does not fit the SQLite integer range.
    #[error("job id {0} out of range")]
    IdOutOfRange(u64),
}

/// Database connection wrapper with connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection to the specified path.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode for concurrent reads
    /// 3. Run any pending migrations
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing and one-shot runs.
    ///
    /// WAL mode is not enabled for in-memory databases as it provides no benefit.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.to_lowercase() == "wal")
    }

    /// Inserts a job row and returns its id, used as the job's [`JobId`].
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the insert fails.
    #[instrument(skip(self))]
    pub async fn insert_job(
        &self,
        package_folder: &str,
        name: &str,
        url: &str,
        source: &str,
    ) -> Result<JobId, DbError> {
        let result = sqlx::query(
            "INSERT INTO jobs (package_folder, name, url, source) VALUES (?, ?, ?, ?)",
        )
        .bind(package_folder)
        .bind(name)
        .bind(url)
        .bind(source)
        .execute(&self.pool)
        .await?;

        // AUTOINCREMENT ids start at 1 and never go negative.
        Ok(result.last_insert_rowid().unsigned_abs())
    }

    /// Persists a job's current name, status, size and message.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the update fails.
    #[instrument(skip(self, job), fields(job_id = job.id))]
    pub async fn record_job(&self, job: &Job) -> Result<(), DbError> {
        let id = i64::try_from(job.id).map_err(|_| DbError::IdOutOfRange(job.id))?;
        let size = i64::try_from(job.size).unwrap_or(i64::MAX);
        sqlx::query(
            "UPDATE jobs SET name = ?, status = ?, size = ?, message = ?, \
             updated_at = datetime('now') WHERE id = ?",
        )
        .bind(&job.name)
        .bind(job.status.as_str())
        .bind(size)
        .bind(job.message.as_deref())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Updates only the status of a job row.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the update fails.
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: JobId, status: JobStatus) -> Result<(), DbError> {
        let id = i64::try_from(id).map_err(|_| DbError::IdOutOfRange(id))?;
        sqlx::query("UPDATE jobs SET status = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Status of a job row, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    pub async fn job_status(&self, id: JobId) -> Result<Option<JobStatus>, DbError> {
        let id = i64::try_from(id).map_err(|_| DbError::IdOutOfRange(id))?;
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(status,)| status.parse().ok()))
    }

    /// Source label of another finished job with the same folder and name.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn find_finished_duplicate(
        &self,
        exclude: JobId,
        package_folder: &str,
        name: &str,
    ) -> Result<Option<String>, DbError> {
        let exclude = i64::try_from(exclude).map_err(|_| DbError::IdOutOfRange(exclude))?;
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT source FROM jobs WHERE package_folder = ? AND name = ? AND id != ? \
             AND status = 'finished' ORDER BY id DESC LIMIT 1",
        )
        .bind(package_folder)
        .bind(name)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(source,)| source))
    }

    /// Gracefully closes all connections in the pool.
    ///
    /// After calling this method, the Database instance should not be used.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DuplicateIndex for Database {
    async fn find_duplicate(
        &self,
        job_id: JobId,
        folder: &str,
        name: &str,
    ) -> Result<Option<String>, LookupError> {
        self.find_finished_duplicate(job_id, folder, name)
            .await
            .map_err(|e| LookupError(Box::new(e)))
    }
}
