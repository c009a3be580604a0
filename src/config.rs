// config.rs
use anyhow::{bail, Context};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub storage_backend: StorageBackend,
    pub jwt_secret: String,
    pub jwt_maxage: i64,
    pub port: u16,
    pub default_currency: String,
    // Ledger
    pub ledger_max_attempts: u32,
    pub ledger_retry_backoff_ms: u64,
    pub contract_budget_periods: i64,
    // Payout scheduler
    pub payout_interval_secs: u64,
    pub payout_batch_size: i64,
    pub payout_concurrency: usize,
    pub payout_item_timeout_secs: u64,
    // Notifications
    pub notifier_webhook_url: Option<String>,
    pub notifier_webhook_secret: Option<String>,
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn init() -> anyhow::Result<Config> {
        let storage_backend = match env_or("STORAGE_BACKEND", "postgres").to_lowercase().as_str() {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => bail!("STORAGE_BACKEND must be postgres or memory, got {}", other),
        };

        let database_url = std::env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set for the postgres backend");
        }

        let jwt_secret = std::env::var("JWT_SECRET_KEY").context("JWT_SECRET_KEY must be set")?;

        let cors_allowed_origins = env_or("CORS_ALLOWED_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let config = Config {
            database_url,
            storage_backend,
            jwt_secret,
            jwt_maxage: parse_env("JWT_MAXAGE", 60)?,
            port: parse_env("PORT", 8000)?,
            default_currency: env_or("DEFAULT_CURRENCY", "NGN"),
            ledger_max_attempts: parse_env("LEDGER_MAX_ATTEMPTS", 3)?,
            ledger_retry_backoff_ms: parse_env("LEDGER_RETRY_BACKOFF_MS", 25)?,
            contract_budget_periods: parse_env("CONTRACT_BUDGET_PERIODS", 1)?,
            payout_interval_secs: parse_env("PAYOUT_INTERVAL_SECS", 86_400)?,
            payout_batch_size: parse_env("PAYOUT_BATCH_SIZE", 200)?,
            payout_concurrency: parse_env("PAYOUT_CONCURRENCY", 8)?,
            payout_item_timeout_secs: parse_env("PAYOUT_ITEM_TIMEOUT_SECS", 30)?,
            notifier_webhook_url: std::env::var("NOTIFIER_WEBHOOK_URL").ok(),
            notifier_webhook_secret: std::env::var("NOTIFIER_WEBHOOK_SECRET").ok(),
            cors_allowed_origins,
        };

        if config.ledger_max_attempts == 0 {
            bail!("LEDGER_MAX_ATTEMPTS must be at least 1");
        }
        if config.contract_budget_periods <= 0 {
            bail!("CONTRACT_BUDGET_PERIODS must be positive");
        }
        if config.payout_concurrency == 0 {
            bail!("PAYOUT_CONCURRENCY must be at least 1");
        }

        Ok(config)
    }

    /// Defaults used by tests and the in-memory backend.
    pub fn for_memory(jwt_secret: &str) -> Config {
        Config {
            database_url: None,
            storage_backend: StorageBackend::Memory,
            jwt_secret: jwt_secret.to_string(),
            jwt_maxage: 60,
            port: 8000,
            default_currency: "NGN".to_string(),
            ledger_max_attempts: 3,
            ledger_retry_backoff_ms: 1,
            contract_budget_periods: 1,
            payout_interval_secs: 86_400,
            payout_batch_size: 200,
            payout_concurrency: 8,
            payout_item_timeout_secs: 30,
            notifier_webhook_url: None,
            notifier_webhook_secret: None,
            cors_allowed_origins: Vec::new(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_falls_back_to_default() {
        let value: u32 = parse_env("JOB_ESCROW_TEST_UNSET_VARIABLE", 3).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn malformed_variable_is_an_error() {
        std::env::set_var("JOB_ESCROW_TEST_BAD_NUMBER", "three");
        let value: anyhow::Result<u32> = parse_env("JOB_ESCROW_TEST_BAD_NUMBER", 3);
        assert!(value.is_err());
        std::env::remove_var("JOB_ESCROW_TEST_BAD_NUMBER");
    }
}
