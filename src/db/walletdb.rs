// db/walletdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::db::{DBClient, DbError};
use crate::models::walletmodels::*;

const WALLET_COLUMNS: &str =
    "id, owner_id, balance, locked_amount, version, currency, is_active, created_at, updated_at";

const ENTRY_COLUMNS: &str =
    "id, wallet_id, kind, amount, balance_after, locked_after, related_entity_id, idempotency_key, created_at";

#[async_trait]
pub trait WalletExt {
    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DbError>;

    async fn get_wallet_by_owner(&self, owner_id: Uuid) -> Result<Option<Wallet>, DbError>;

    /// Returns the existing wallet when the owner already has one.
    async fn create_wallet(&self, owner_id: Uuid, currency: &str) -> Result<Wallet, DbError>;

    /// Conditional update on `expected_version` plus one ledger entry, atomically.
    /// `Ok(None)` means the version moved on; `Err(Duplicate)` means the
    /// idempotency key is already recorded.
    async fn apply_wallet_change(
        &self,
        change: WalletChange,
    ) -> Result<Option<(Wallet, LedgerEntry)>, DbError>;

    /// Both wallet updates and both entries in one transaction, rows touched in
    /// wallet-id order.
    async fn apply_settlement(
        &self,
        change: SettlementChange,
    ) -> Result<Option<Settlement>, DbError>;

    async fn set_wallet_active(
        &self,
        wallet_id: Uuid,
        expected_version: i64,
        is_active: bool,
    ) -> Result<Option<Wallet>, DbError>;

    async fn get_entries_by_key(&self, idempotency_key: &str) -> Result<Vec<LedgerEntry>, DbError>;

    async fn get_wallet_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, DbError>;

    /// Per-kind totals of entries created at or after `since`; kinds with no
    /// entries are left out.
    async fn get_entry_totals(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<EntryKindTotal>, DbError>;

    /// Credit totals per month since `since`, newest month first.
    async fn get_monthly_credits(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<MonthlyTotal>, DbError>;
}

#[async_trait]
impl WalletExt for DBClient {
    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DbError> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn get_wallet_by_owner(&self, owner_id: Uuid) -> Result<Option<Wallet>, DbError> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE owner_id = $1",
            WALLET_COLUMNS
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn create_wallet(&self, owner_id: Uuid, currency: &str) -> Result<Wallet, DbError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, currency)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(currency)
        .execute(&self.pool)
        .await?;

        self.get_wallet_by_owner(owner_id)
            .await?
            .ok_or_else(|| DbError::Database(format!("wallet for owner {} vanished", owner_id)))
    }

    async fn apply_wallet_change(
        &self,
        change: WalletChange,
    ) -> Result<Option<(Wallet, LedgerEntry)>, DbError> {
        let mut tx = self.pool.begin().await?;

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            UPDATE wallets
            SET balance = $3, locked_amount = $4, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND is_active = TRUE
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(change.wallet_id)
        .bind(change.expected_version)
        .bind(change.balance)
        .bind(change.locked_amount)
        .fetch_optional(&mut *tx)
        .await?;

        let wallet = match wallet {
            Some(wallet) => wallet,
            None => return Ok(None),
        };

        let entry = insert_entry(
            &mut tx,
            &wallet,
            change.kind,
            change.amount,
            change.related_entity_id,
            &change.idempotency_key,
        )
        .await?;

        tx.commit().await?;
        Ok(Some((wallet, entry)))
    }

    async fn apply_settlement(
        &self,
        change: SettlementChange,
    ) -> Result<Option<Settlement>, DbError> {
        let mut tx = self.pool.begin().await?;

        let mut updated = Vec::with_capacity(2);
        for side in change.ordered_sides() {
            let wallet = sqlx::query_as::<_, Wallet>(&format!(
                r#"
                UPDATE wallets
                SET balance = $3, locked_amount = $4, version = version + 1, updated_at = NOW()
                WHERE id = $1 AND version = $2 AND is_active = TRUE
                RETURNING {}
                "#,
                WALLET_COLUMNS
            ))
            .bind(side.wallet_id)
            .bind(side.expected_version)
            .bind(side.balance)
            .bind(side.locked_amount)
            .fetch_optional(&mut *tx)
            .await?;

            match wallet {
                Some(wallet) => updated.push(wallet),
                // dropping the transaction rolls back the first update
                None => return Ok(None),
            }
        }

        let from = updated
            .iter()
            .find(|w| w.id == change.from.wallet_id)
            .ok_or_else(|| DbError::Database("settlement source row missing".to_string()))?;
        let to = updated
            .iter()
            .find(|w| w.id == change.to.wallet_id)
            .ok_or_else(|| DbError::Database("settlement target row missing".to_string()))?;

        let debit = insert_entry(
            &mut tx,
            from,
            EntryKind::Debit,
            change.amount,
            change.related_entity_id,
            &change.idempotency_key,
        )
        .await?;

        let credit = insert_entry(
            &mut tx,
            to,
            EntryKind::Credit,
            change.amount,
            change.related_entity_id,
            &change.idempotency_key,
        )
        .await?;

        tx.commit().await?;

        Ok(Some(Settlement {
            idempotency_key: change.idempotency_key,
            amount: change.amount,
            debit,
            credit,
        }))
    }

    async fn set_wallet_active(
        &self,
        wallet_id: Uuid,
        expected_version: i64,
        is_active: bool,
    ) -> Result<Option<Wallet>, DbError> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            UPDATE wallets
            SET is_active = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .bind(expected_version)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn get_entries_by_key(&self, idempotency_key: &str) -> Result<Vec<LedgerEntry>, DbError> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {} FROM ledger_entries WHERE idempotency_key = $1 ORDER BY created_at",
            ENTRY_COLUMNS
        ))
        .bind(idempotency_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn get_wallet_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, DbError> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {} FROM ledger_entries
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            ENTRY_COLUMNS
        ))
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn get_entry_totals(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<EntryKindTotal>, DbError> {
        let totals = sqlx::query_as::<_, EntryKindTotal>(
            r#"
            SELECT kind, COUNT(*)::BIGINT AS count, SUM(amount)::BIGINT AS total_amount
            FROM ledger_entries
            WHERE wallet_id = $1 AND created_at >= $2
            GROUP BY kind
            ORDER BY kind
            "#,
        )
        .bind(wallet_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(totals)
    }

    async fn get_monthly_credits(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<MonthlyTotal>, DbError> {
        let months = sqlx::query_as::<_, MonthlyTotal>(
            r#"
            SELECT to_char(date_trunc('month', created_at AT TIME ZONE 'UTC'), 'YYYY-MM') AS month,
                   SUM(amount)::BIGINT AS total_amount
            FROM ledger_entries
            WHERE wallet_id = $1 AND kind = 'credit' AND created_at >= $2
            GROUP BY 1
            ORDER BY 1 DESC
            "#,
        )
        .bind(wallet_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(months)
    }
}

async fn insert_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    wallet: &Wallet,
    kind: EntryKind,
    amount: i64,
    related_entity_id: Option<Uuid>,
    idempotency_key: &str,
) -> Result<LedgerEntry, DbError> {
    let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
        r#"
        INSERT INTO ledger_entries
        (id, wallet_id, kind, amount, balance_after, locked_after, related_entity_id, idempotency_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        ENTRY_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(wallet.id)
    .bind(kind)
    .bind(amount)
    .bind(wallet.balance)
    .bind(wallet.locked_amount)
    .bind(related_entity_id)
    .bind(idempotency_key)
    .fetch_one(&mut **tx)
    .await?;

    Ok(entry)
}
