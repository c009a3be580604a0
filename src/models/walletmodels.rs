// models/walletmodels.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "ledger_entry_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Credit,
    Debit,
    Lock,
    Unlock,
}

impl EntryKind {
    pub fn to_str(&self) -> &str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
            EntryKind::Lock => "lock",
            EntryKind::Unlock => "unlock",
        }
    }
}

/// Per-user monetary account. `version` is bumped by every mutation and is the
/// optimistic-concurrency token for read-modify-write cycles.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub balance: i64,
    pub locked_amount: i64,
    pub version: i64,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn available_balance(&self) -> i64 {
        self.balance - self.locked_amount
    }

    pub fn invariants_hold(&self) -> bool {
        self.balance >= 0 && self.locked_amount >= 0 && self.locked_amount <= self.balance
    }
}

/// Immutable ledger row. One per balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    pub locked_after: i64,
    pub related_entity_id: Option<Uuid>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Count and sum of one entry kind over a window.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct EntryKindTotal {
    pub kind: EntryKind,
    pub count: i64,
    pub total_amount: i64,
}

/// Credits received in one calendar month (`YYYY-MM`, UTC).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct MonthlyTotal {
    pub month: String,
    pub total_amount: i64,
}

#[derive(Debug, Clone)]
pub struct WalletStats {
    pub wallet: Wallet,
    pub since: DateTime<Utc>,
    pub totals: Vec<EntryKindTotal>,
    pub monthly_credits: Vec<MonthlyTotal>,
}

/// The matched debit/credit pair written by one settlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub idempotency_key: String,
    pub amount: i64,
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

impl Settlement {
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Option<Self> {
        let debit = entries.iter().find(|e| e.kind == EntryKind::Debit)?.clone();
        let credit = entries.iter().find(|e| e.kind == EntryKind::Credit)?.clone();

        Some(Settlement {
            idempotency_key: debit.idempotency_key.clone(),
            amount: debit.amount,
            debit,
            credit,
        })
    }
}

/// Target state for a single-wallet mutation. Applied only if the stored
/// wallet still carries `expected_version`.
#[derive(Debug, Clone)]
pub struct WalletChange {
    pub wallet_id: Uuid,
    pub expected_version: i64,
    pub balance: i64,
    pub locked_amount: i64,
    pub kind: EntryKind,
    pub amount: i64,
    pub related_entity_id: Option<Uuid>,
    pub idempotency_key: String,
}

/// New balances for one side of a settlement.
#[derive(Debug, Clone)]
pub struct WalletSide {
    pub wallet_id: Uuid,
    pub expected_version: i64,
    pub balance: i64,
    pub locked_amount: i64,
}

#[derive(Debug, Clone)]
pub struct SettlementChange {
    pub from: WalletSide,
    pub to: WalletSide,
    pub amount: i64,
    pub related_entity_id: Option<Uuid>,
    pub idempotency_key: String,
}

impl SettlementChange {
    /// Both sides ordered by wallet id; storage updates rows in this order.
    pub fn ordered_sides(&self) -> [&WalletSide; 2] {
        if self.from.wallet_id <= self.to.wallet_id {
            [&self.from, &self.to]
        } else {
            [&self.to, &self.from]
        }
    }
}

// Idempotency keys
pub fn fund_key(reference: &str) -> String {
    format!("fund:{}", reference)
}

pub fn contract_reserve_key(contract_id: Uuid) -> String {
    format!("contract:{}:reserve", contract_id)
}

pub fn contract_release_key(contract_id: Uuid) -> String {
    format!("contract:{}:release", contract_id)
}

pub fn timesheet_settlement_key(timesheet_id: Uuid) -> String {
    format!("timesheet:{}:approve", timesheet_id)
}
