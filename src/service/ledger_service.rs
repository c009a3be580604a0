// service/ledger_service.rs
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::{
    config::Config,
    db::db::{DbError, Store},
    models::walletmodels::*,
    service::error::ServiceError,
};

pub const MAX_STATS_PERIOD_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.ledger_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.ledger_retry_backoff_ms),
        }
    }

    /// Exponential backoff with up to one base interval of jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_backoff.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
        let jitter = if base_ms > 0 {
            rand::rng().random_range(0..=base_ms)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(25),
        }
    }
}

/// Result of a single-wallet ledger mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerMutation {
    pub wallet: Wallet,
    pub entry: LedgerEntry,
    /// True when the idempotency key had already been applied.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    pub settlement: Settlement,
    pub replayed: bool,
}

#[derive(Debug, Clone)]
pub struct LedgerService {
    db: Store,
    retry: RetryPolicy,
    default_currency: String,
}

impl LedgerService {
    pub fn new(db: Store, retry: RetryPolicy, default_currency: String) -> Self {
        Self {
            db,
            retry,
            default_currency,
        }
    }

    pub async fn open_wallet(&self, owner_id: Uuid) -> Result<Wallet, ServiceError> {
        Ok(self.db.create_wallet(owner_id, &self.default_currency).await?)
    }

    pub async fn wallet_for_owner(&self, owner_id: Uuid) -> Result<Wallet, ServiceError> {
        self.db
            .get_wallet_by_owner(owner_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet for user {}", owner_id)))
    }

    pub async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        self.load(wallet_id).await
    }

    pub async fn transactions(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, ServiceError> {
        if !(1..=100).contains(&limit) {
            return Err(ServiceError::Validation("limit must be between 1 and 100".to_string()));
        }
        if offset < 0 {
            return Err(ServiceError::Validation("offset cannot be negative".to_string()));
        }
        self.load(wallet_id).await?;
        Ok(self.db.get_wallet_entries(wallet_id, limit, offset).await?)
    }

    /// Entry totals and monthly credits over the last `period_days` days.
    pub async fn stats(&self, wallet_id: Uuid, period_days: i64) -> Result<WalletStats, ServiceError> {
        if !(1..=MAX_STATS_PERIOD_DAYS).contains(&period_days) {
            return Err(ServiceError::Validation(format!(
                "period must be between 1 and {} days",
                MAX_STATS_PERIOD_DAYS
            )));
        }

        let wallet = self.load(wallet_id).await?;
        let since = Utc::now() - ChronoDuration::days(period_days);
        let totals = self.db.get_entry_totals(wallet_id, since).await?;
        let monthly_credits = self.db.get_monthly_credits(wallet_id, since).await?;

        Ok(WalletStats {
            wallet,
            since,
            totals,
            monthly_credits,
        })
    }

    /// Credits an owner's wallet, creating it on first use.
    pub async fn fund_owner(
        &self,
        owner_id: Uuid,
        amount: i64,
        reference: Option<String>,
    ) -> Result<LedgerMutation, ServiceError> {
        let wallet = self.open_wallet(owner_id).await?;
        let reference = reference.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.fund(wallet.id, amount, &fund_key(&reference)).await
    }

    pub async fn fund(
        &self,
        wallet_id: Uuid,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<LedgerMutation, ServiceError> {
        ensure_positive(amount)?;

        let mutation = self
            .apply_single(wallet_id, EntryKind::Credit, amount, None, idempotency_key, |w| {
                let balance = w
                    .balance
                    .checked_add(amount)
                    .ok_or_else(|| ServiceError::Validation("amount overflows wallet balance".to_string()))?;
                Ok((balance, w.locked_amount))
            })
            .await?;

        if !mutation.replayed {
            tracing::info!(
                wallet_id = %wallet_id,
                amount,
                balance = mutation.wallet.balance,
                "wallet funded"
            );
        }
        Ok(mutation)
    }

    pub async fn reserve(
        &self,
        wallet_id: Uuid,
        amount: i64,
        related_entity_id: Option<Uuid>,
        idempotency_key: &str,
    ) -> Result<LedgerMutation, ServiceError> {
        ensure_positive(amount)?;

        let mutation = self
            .apply_single(wallet_id, EntryKind::Lock, amount, related_entity_id, idempotency_key, |w| {
                if w.available_balance() < amount {
                    return Err(ServiceError::InsufficientFunds {
                        required: amount,
                        available: w.available_balance(),
                    });
                }
                Ok((w.balance, w.locked_amount + amount))
            })
            .await?;

        if !mutation.replayed {
            tracing::info!(wallet_id = %wallet_id, amount, key = idempotency_key, "funds reserved");
        }
        Ok(mutation)
    }

    pub async fn release(
        &self,
        wallet_id: Uuid,
        amount: i64,
        related_entity_id: Option<Uuid>,
        idempotency_key: &str,
    ) -> Result<LedgerMutation, ServiceError> {
        ensure_positive(amount)?;

        let mutation = self
            .apply_single(wallet_id, EntryKind::Unlock, amount, related_entity_id, idempotency_key, |w| {
                if w.locked_amount < amount {
                    return Err(ServiceError::InsufficientLockedFunds {
                        required: amount,
                        locked: w.locked_amount,
                    });
                }
                Ok((w.balance, w.locked_amount - amount))
            })
            .await?;

        if !mutation.replayed {
            tracing::info!(wallet_id = %wallet_id, amount, key = idempotency_key, "funds released");
        }
        Ok(mutation)
    }

    /// Moves `amount` out of `from`'s locked funds into `to`'s balance. The
    /// debit and credit share `idempotency_key`; a recorded key returns the
    /// recorded pair untouched.
    pub async fn settle(
        &self,
        from_wallet_id: Uuid,
        to_wallet_id: Uuid,
        amount: i64,
        idempotency_key: &str,
        related_entity_id: Option<Uuid>,
    ) -> Result<SettlementOutcome, ServiceError> {
        ensure_positive(amount)?;
        if from_wallet_id == to_wallet_id {
            return Err(ServiceError::Validation("cannot settle a wallet with itself".to_string()));
        }

        for attempt in 1..=self.retry.max_attempts {
            if let Some(settlement) = self.recorded_settlement(idempotency_key, from_wallet_id, to_wallet_id).await? {
                tracing::debug!(key = idempotency_key, "settlement replayed");
                return Ok(SettlementOutcome { settlement, replayed: true });
            }

            let from = self.load(from_wallet_id).await?;
            let to = self.load(to_wallet_id).await?;
            ensure_active(&from)?;
            ensure_active(&to)?;

            if from.currency != to.currency {
                return Err(ServiceError::Validation(format!(
                    "currency mismatch: {} vs {}",
                    from.currency, to.currency
                )));
            }
            if from.locked_amount < amount {
                return Err(ServiceError::InsufficientLockedFunds {
                    required: amount,
                    locked: from.locked_amount,
                });
            }
            let credited = to
                .balance
                .checked_add(amount)
                .ok_or_else(|| ServiceError::Validation("amount overflows wallet balance".to_string()))?;

            let change = SettlementChange {
                from: WalletSide {
                    wallet_id: from.id,
                    expected_version: from.version,
                    balance: from.balance - amount,
                    locked_amount: from.locked_amount - amount,
                },
                to: WalletSide {
                    wallet_id: to.id,
                    expected_version: to.version,
                    balance: credited,
                    locked_amount: to.locked_amount,
                },
                amount,
                related_entity_id,
                idempotency_key: idempotency_key.to_string(),
            };

            match self.db.apply_settlement(change).await {
                Ok(Some(settlement)) => {
                    tracing::info!(
                        from = %from_wallet_id,
                        to = %to_wallet_id,
                        amount,
                        key = idempotency_key,
                        "settlement applied"
                    );
                    return Ok(SettlementOutcome { settlement, replayed: false });
                }
                Ok(None) | Err(DbError::Conflict(_)) => {
                    tracing::debug!(key = idempotency_key, attempt, "settlement version conflict");
                }
                Err(DbError::Duplicate(_)) => {
                    if let Some(settlement) =
                        self.recorded_settlement(idempotency_key, from_wallet_id, to_wallet_id).await?
                    {
                        return Ok(SettlementOutcome { settlement, replayed: true });
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }
        }

        Err(ServiceError::ConcurrentModification(format!(
            "wallets {} and {}",
            from_wallet_id, to_wallet_id
        )))
    }

    /// Deactivates a wallet with no reserved funds.
    pub async fn deactivate(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        for attempt in 1..=self.retry.max_attempts {
            let wallet = self.load(wallet_id).await?;
            if !wallet.is_active {
                return Ok(wallet);
            }
            if wallet.locked_amount > 0 {
                return Err(ServiceError::Validation(format!(
                    "wallet still holds {} in reserved funds",
                    wallet.locked_amount
                )));
            }

            if let Some(wallet) = self.db.set_wallet_active(wallet_id, wallet.version, false).await? {
                tracing::info!(wallet_id = %wallet_id, "wallet deactivated");
                return Ok(wallet);
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }
        }

        Err(ServiceError::ConcurrentModification(format!("wallet {}", wallet_id)))
    }

    async fn load(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        self.db
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Wallet", wallet_id))
    }

    async fn recorded_entry(
        &self,
        wallet_id: Uuid,
        kind: EntryKind,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>, ServiceError> {
        let entry = self
            .db
            .get_entries_by_key(idempotency_key)
            .await?
            .into_iter()
            .find(|e| e.kind == kind);

        match entry {
            Some(entry) if entry.wallet_id != wallet_id => Err(ServiceError::Validation(format!(
                "idempotency key {} belongs to another wallet",
                idempotency_key
            ))),
            other => Ok(other),
        }
    }

    async fn recorded_settlement(
        &self,
        idempotency_key: &str,
        from_wallet_id: Uuid,
        to_wallet_id: Uuid,
    ) -> Result<Option<Settlement>, ServiceError> {
        let entries = self.db.get_entries_by_key(idempotency_key).await?;
        match Settlement::from_entries(entries) {
            Some(s) if s.debit.wallet_id != from_wallet_id || s.credit.wallet_id != to_wallet_id => {
                Err(ServiceError::Validation(format!(
                    "idempotency key {} belongs to another settlement",
                    idempotency_key
                )))
            }
            other => Ok(other),
        }
    }

    /// Optimistic read-modify-write of one wallet. `plan` maps the current
    /// wallet to its new `(balance, locked_amount)`.
    async fn apply_single<F>(
        &self,
        wallet_id: Uuid,
        kind: EntryKind,
        amount: i64,
        related_entity_id: Option<Uuid>,
        idempotency_key: &str,
        plan: F,
    ) -> Result<LedgerMutation, ServiceError>
    where
        F: Fn(&Wallet) -> Result<(i64, i64), ServiceError> + Send + Sync,
    {
        for attempt in 1..=self.retry.max_attempts {
            if let Some(entry) = self.recorded_entry(wallet_id, kind, idempotency_key).await? {
                tracing::debug!(key = idempotency_key, kind = kind.to_str(), "ledger entry replayed");
                let wallet = self.load(wallet_id).await?;
                return Ok(LedgerMutation { wallet, entry, replayed: true });
            }

            let wallet = self.load(wallet_id).await?;
            ensure_active(&wallet)?;
            let (balance, locked_amount) = plan(&wallet)?;

            let change = WalletChange {
                wallet_id,
                expected_version: wallet.version,
                balance,
                locked_amount,
                kind,
                amount,
                related_entity_id,
                idempotency_key: idempotency_key.to_string(),
            };

            match self.db.apply_wallet_change(change).await {
                Ok(Some((wallet, entry))) => {
                    return Ok(LedgerMutation { wallet, entry, replayed: false });
                }
                Ok(None) | Err(DbError::Conflict(_)) => {
                    tracing::debug!(wallet_id = %wallet_id, attempt, "wallet version conflict");
                }
                Err(DbError::Duplicate(_)) => {
                    if let Some(entry) = self.recorded_entry(wallet_id, kind, idempotency_key).await? {
                        let wallet = self.load(wallet_id).await?;
                        return Ok(LedgerMutation { wallet, entry, replayed: true });
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }
        }

        Err(ServiceError::ConcurrentModification(format!("wallet {}", wallet_id)))
    }
}

fn ensure_positive(amount: i64) -> Result<(), ServiceError> {
    if amount <= 0 {
        return Err(ServiceError::Validation("amount must be greater than zero".to_string()));
    }
    Ok(())
}

fn ensure_active(wallet: &Wallet) -> Result<(), ServiceError> {
    if !wallet.is_active {
        return Err(ServiceError::Validation(format!("wallet {} is inactive", wallet.id)));
    }
    Ok(())
}
