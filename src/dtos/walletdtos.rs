use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::walletmodels::{EntryKind, EntryKindTotal, LedgerEntry, MonthlyTotal, Wallet, WalletStats};

/// Trusted top-up of a user's wallet. `reference` makes retries idempotent.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct FundWalletDto {
    pub owner_id: Uuid,

    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,

    #[validate(length(min = 1, max = 100, message = "Reference must be between 1 and 100 characters"))]
    pub reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct TransactionHistoryQueryDto {
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,

    #[validate(range(min = 0, message = "Offset cannot be negative"))]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct WalletStatsQueryDto {
    #[validate(range(min = 1, max = 365, message = "Period must be between 1 and 365 days"))]
    pub period_days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponseDto {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub balance: i64,
    pub locked_amount: i64,
    pub available_balance: i64,
    pub currency: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponseDto {
    fn from(wallet: Wallet) -> Self {
        Self {
            available_balance: wallet.available_balance(),
            id: wallet.id,
            owner_id: wallet.owner_id,
            balance: wallet.balance,
            locked_amount: wallet.locked_amount,
            currency: wallet.currency,
            is_active: wallet.is_active,
            updated_at: wallet.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerEntryDto {
    pub id: Uuid,
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    pub locked_after: i64,
    pub related_entity_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryDto {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            amount: entry.amount,
            balance_after: entry.balance_after,
            locked_after: entry.locked_after,
            related_entity_id: entry.related_entity_id,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionHistoryDto {
    pub entries: Vec<LedgerEntryDto>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletStatsDto {
    pub wallet: WalletResponseDto,
    pub period_days: i64,
    pub since: DateTime<Utc>,
    pub totals: Vec<EntryKindTotal>,
    pub monthly_credits: Vec<MonthlyTotal>,
}

impl WalletStatsDto {
    pub fn new(stats: WalletStats, period_days: i64) -> Self {
        Self {
            wallet: WalletResponseDto::from(stats.wallet),
            period_days,
            since: stats.since,
            totals: stats.totals,
            monthly_credits: stats.monthly_credits,
        }
    }
}
