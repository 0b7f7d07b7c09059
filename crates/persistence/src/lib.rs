//! Persistence layer for Entry Discover
//!
//! SQLite storage for analysis reports and their ranked trigger patterns.

pub mod repository;
pub mod schema;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Report store backed by a SQLite pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file at `path` and apply the schema
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::Connection(format!("{}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        Self::open(options, 5).await
    }

    /// Private in-memory database, used by tests
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbError::Connection(e.to_string()))?
            .foreign_keys(true);

        // Every connection to :memory: is its own database
        Self::open(options, 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        for statement in schema::STATEMENTS {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| DbError::Schema(format!("{e}: {}", statement.trim())))?;
        }
        debug!(statements = schema::STATEMENTS.len(), "Schema applied");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Clone the pool for use in spawned tasks
    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}
