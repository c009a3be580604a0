// db/db.rs
use std::sync::Arc;

use sqlx::{Pool, Postgres};
use thiserror::Error;

use super::{labourdb::LaborExt, walletdb::WalletExt};

#[derive(Clone)]
pub struct DBClient {
    pub pool: Pool<Postgres>,
}

impl std::fmt::Debug for DBClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBClient")
            .field("pool", &"Pool<Postgres>")
            .field("size", &self.pool.size())
            .finish()
    }
}

impl DBClient {
    pub fn new(pool: Pool<Postgres>) -> Self {
        DBClient { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Storage failures, reduced to what callers can act on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Duplicate record violates {0}")]
    Duplicate(String),

    /// The transaction lost to a concurrent one and may be replayed.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Constraint violations and every other failure the database reported.
    #[error("Database error: {0}")]
    Database(String),
}

impl DbError {
    fn from_sqlstate(code: Option<&str>, message: String) -> Self {
        match code {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => DbError::Conflict(message),
            _ => DbError::Database(message),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Duplicate(db_err.constraint().unwrap_or("unique constraint").to_string())
            }
            sqlx::Error::Database(db_err) => {
                DbError::from_sqlstate(db_err.code().as_deref(), err.to_string())
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DbError::Unavailable(err.to_string()),
            _ => DbError::Database(err.to_string()),
        }
    }
}

/// Everything the engine needs from persistence.
pub trait EngineStore: WalletExt + LaborExt + std::fmt::Debug + Send + Sync {}

impl<T> EngineStore for T where T: WalletExt + LaborExt + std::fmt::Debug + Send + Sync {}

pub type Store = Arc<dyn EngineStore>;
