use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use sqlx::types::BigDecimal;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Paused,
    Closed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "application_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Offered,
    Accepted,
    Rejected,
    Withdrawn,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "contract_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Pending,
    Active,
    Terminated,
    Completed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "timesheet_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TimesheetStatus {
    Submitted,
    Approved,
    Rejected,
    Paid,
}

impl JobStatus {
    pub fn to_str(&self) -> &str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Closed => "closed",
        }
    }
}

impl ApplicationStatus {
    pub fn to_str(&self) -> &str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Offered => "offered",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }
}

impl ContractStatus {
    pub fn to_str(&self) -> &str {
        match self {
            ContractStatus::Pending => "pending",
            ContractStatus::Active => "active",
            ContractStatus::Terminated => "terminated",
            ContractStatus::Completed => "completed",
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, ContractStatus::Terminated | ContractStatus::Completed)
    }
}

impl TimesheetStatus {
    pub fn to_str(&self) -> &str {
        match self {
            TimesheetStatus::Submitted => "submitted",
            TimesheetStatus::Approved => "approved",
            TimesheetStatus::Rejected => "rejected",
            TimesheetStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub employer_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: JobStatus,
    pub hourly_rate: Option<i64>,
    pub rate_min: Option<i64>,
    pub rate_max: Option<i64>,
    pub hours_per_week: i32,
    pub duration_weeks: Option<i32>,
    pub is_accepting_applications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn accepts_applications(&self) -> bool {
        self.status == JobStatus::Active && self.is_accepting_applications
    }

    pub fn rate_in_range(&self, rate: i64) -> bool {
        self.rate_min.map_or(true, |min| rate >= min) && self.rate_max.map_or(true, |max| rate <= max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Application {
    pub id: Uuid,
    pub job_id: Uuid,
    pub applicant_id: Uuid,
    pub status: ApplicationStatus,
    pub offer_amount: Option<i64>,
    pub cover_letter: String,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Contract {
    pub id: Uuid,
    pub application_id: Uuid,
    pub job_id: Uuid,
    pub employer_id: Uuid,
    pub employee_id: Uuid,
    pub rate: i64,
    pub hours_per_period: i32,
    pub status: ContractStatus,
    pub locked_amount: i64,
    pub committed_amount: i64,
    pub paid_amount: i64,
    pub approved_timesheets: i32,
    pub termination_reason: Option<String>,
    pub terminated_by: Option<Uuid>,
    pub funds_released: bool,
    pub started_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Contract {
    /// Budget still reserved for this contract and not claimed by any timesheet.
    pub fn remaining_budget(&self) -> i64 {
        self.locked_amount - self.committed_amount
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.employer_id == user_id || self.employee_id == user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Timesheet {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub period_label: String,
    pub hours_worked: BigDecimal,
    pub description: String,
    pub status: TimesheetStatus,
    pub amount: Option<i64>,
    pub rejection_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub settled_transaction_id: Option<Uuid>,
    pub last_settlement_error: Option<String>,
    pub settlement_attempted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub employer_id: Uuid,
    pub title: String,
    pub description: String,
    pub hourly_rate: Option<i64>,
    pub rate_min: Option<i64>,
    pub rate_max: Option<i64>,
    pub hours_per_week: i32,
    pub duration_weeks: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewContract {
    pub id: Uuid,
    pub application_id: Uuid,
    pub job_id: Uuid,
    pub employer_id: Uuid,
    pub employee_id: Uuid,
    pub rate: i64,
    pub hours_per_period: i32,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewTimesheet {
    pub contract_id: Uuid,
    pub period_label: String,
    pub hours_worked: BigDecimal,
    pub description: String,
}

/// Result of atomically claiming budget for a timesheet approval.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalClaim {
    Claimed { timesheet: Timesheet, contract: Contract },
    InsufficientBudget { remaining: i64 },
    ContractNotActive(ContractStatus),
    TimesheetNotSubmitted(TimesheetStatus),
}
