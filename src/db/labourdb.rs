// db/labourdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::db::{DBClient, DbError};
use crate::models::labourmodel::*;

const JOB_COLUMNS: &str = "id, employer_id, title, description, status, hourly_rate, rate_min, rate_max, \
     hours_per_week, duration_weeks, is_accepting_applications, created_at, updated_at";

const APPLICATION_COLUMNS: &str = "id, job_id, applicant_id, status, offer_amount, cover_letter, \
     rejection_reason, created_at, updated_at";

const CONTRACT_COLUMNS: &str = "id, application_id, job_id, employer_id, employee_id, rate, hours_per_period, \
     status, locked_amount, committed_amount, paid_amount, approved_timesheets, termination_reason, \
     terminated_by, funds_released, started_at, ends_at, ended_at";

const TIMESHEET_COLUMNS: &str = "id, contract_id, period_label, hours_worked, description, status, amount, \
     rejection_reason, submitted_at, approved_at, paid_at, settled_transaction_id, last_settlement_error, \
     settlement_attempted_at";

#[async_trait]
pub trait LaborExt {
    // Jobs
    async fn create_job(&self, job: NewJob) -> Result<Job, DbError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, DbError>;

    async fn update_job_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        status: JobStatus,
        is_accepting_applications: bool,
    ) -> Result<Option<Job>, DbError>;

    // Applications
    async fn create_application(
        &self,
        job_id: Uuid,
        applicant_id: Uuid,
        cover_letter: String,
    ) -> Result<Application, DbError>;

    async fn get_application(&self, application_id: Uuid) -> Result<Option<Application>, DbError>;

    async fn get_job_applications(&self, job_id: Uuid) -> Result<Vec<Application>, DbError>;

    async fn get_applicant_applications(&self, applicant_id: Uuid) -> Result<Vec<Application>, DbError>;

    /// Moves an application from `from` to `to`. `offer_amount` and
    /// `rejection_reason` overwrite the stored values only when given.
    async fn transition_application(
        &self,
        application_id: Uuid,
        from: ApplicationStatus,
        to: ApplicationStatus,
        offer_amount: Option<i64>,
        rejection_reason: Option<String>,
    ) -> Result<Option<Application>, DbError>;

    // Contracts
    /// Inserts a contract in `pending` status. `Duplicate` when the application
    /// already has one.
    async fn create_contract(&self, contract: NewContract) -> Result<Contract, DbError>;

    async fn get_contract(&self, contract_id: Uuid) -> Result<Option<Contract>, DbError>;

    async fn get_contract_by_application(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Contract>, DbError>;

    async fn get_user_contracts(
        &self,
        user_id: Uuid,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, DbError>;

    /// pending -> active with the confirmed reservation.
    async fn activate_contract(
        &self,
        contract_id: Uuid,
        locked_amount: i64,
    ) -> Result<Option<Contract>, DbError>;

    /// active -> terminated | completed.
    async fn end_contract(
        &self,
        contract_id: Uuid,
        status: ContractStatus,
        ended_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Option<Contract>, DbError>;

    /// Removes a contract whose reservation never went through.
    async fn delete_pending_contract(&self, contract_id: Uuid) -> Result<bool, DbError>;

    async fn get_expired_contracts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Contract>, DbError>;

    async fn get_contracts_pending_release(&self, limit: i64) -> Result<Vec<Contract>, DbError>;

    /// Contracts still `pending` that were created before `started_before`.
    async fn get_stale_pending_contracts(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Contract>, DbError>;

    async fn mark_funds_released(&self, contract_id: Uuid) -> Result<Option<Contract>, DbError>;

    // Timesheets
    /// Inserts while holding the contract row, so it cannot interleave with
    /// ending the contract. `None` when the contract is not active,
    /// `Duplicate` when it already has a timesheet for the period.
    async fn create_timesheet(&self, timesheet: NewTimesheet) -> Result<Option<Timesheet>, DbError>;

    async fn get_timesheet(&self, timesheet_id: Uuid) -> Result<Option<Timesheet>, DbError>;

    async fn get_contract_timesheets(&self, contract_id: Uuid) -> Result<Vec<Timesheet>, DbError>;

    async fn get_timesheets_by_status(
        &self,
        status: TimesheetStatus,
        limit: i64,
    ) -> Result<Vec<Timesheet>, DbError>;

    async fn get_employer_pending_timesheets(
        &self,
        employer_id: Uuid,
    ) -> Result<Vec<Timesheet>, DbError>;

    async fn get_employee_timesheets(&self, employee_id: Uuid) -> Result<Vec<Timesheet>, DbError>;

    /// submitted -> approved together with `committed_amount += amount` on the
    /// contract, only while the contract is active and its remaining budget
    /// covers the amount.
    async fn claim_timesheet_approval(
        &self,
        timesheet_id: Uuid,
        amount: i64,
    ) -> Result<ApprovalClaim, DbError>;

    /// approved -> submitted, returning the claimed amount to the contract budget.
    async fn revert_timesheet_approval(
        &self,
        timesheet_id: Uuid,
    ) -> Result<Option<Timesheet>, DbError>;

    /// approved -> paid together with the contract's paid counters.
    async fn mark_timesheet_paid(
        &self,
        timesheet_id: Uuid,
        settled_transaction_id: Uuid,
    ) -> Result<Option<Timesheet>, DbError>;

    async fn record_settlement_error(&self, timesheet_id: Uuid, error: String) -> Result<(), DbError>;

    /// submitted -> rejected.
    async fn reject_timesheet(
        &self,
        timesheet_id: Uuid,
        reason: String,
    ) -> Result<Option<Timesheet>, DbError>;

    async fn reject_submitted_timesheets(&self, contract_id: Uuid, reason: String) -> Result<u64, DbError>;
}

#[async_trait]
impl LaborExt for DBClient {
    async fn create_job(&self, job: NewJob) -> Result<Job, DbError> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO jobs
            (id, employer_id, title, description, hourly_rate, rate_min, rate_max, hours_per_week, duration_weeks)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(job.employer_id)
        .bind(job.title)
        .bind(job.description)
        .bind(job.hourly_rate)
        .bind(job.rate_min)
        .bind(job.rate_max)
        .bind(job.hours_per_week)
        .bind(job.duration_weeks)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, DbError> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        status: JobStatus,
        is_accepting_applications: bool,
    ) -> Result<Option<Job>, DbError> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = $3, is_accepting_applications = $4, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(expected)
        .bind(status)
        .bind(is_accepting_applications)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn create_application(
        &self,
        job_id: Uuid,
        applicant_id: Uuid,
        cover_letter: String,
    ) -> Result<Application, DbError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            r#"
            INSERT INTO applications (id, job_id, applicant_id, cover_letter)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            APPLICATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(applicant_id)
        .bind(cover_letter)
        .fetch_one(&self.pool)
        .await?;

        Ok(application)
    }

    async fn get_application(&self, application_id: Uuid) -> Result<Option<Application>, DbError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications WHERE id = $1",
            APPLICATION_COLUMNS
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(application)
    }

    async fn get_job_applications(&self, job_id: Uuid) -> Result<Vec<Application>, DbError> {
        let applications = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications WHERE job_id = $1 ORDER BY created_at",
            APPLICATION_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(applications)
    }

    async fn get_applicant_applications(&self, applicant_id: Uuid) -> Result<Vec<Application>, DbError> {
        let applications = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications WHERE applicant_id = $1 ORDER BY created_at DESC",
            APPLICATION_COLUMNS
        ))
        .bind(applicant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(applications)
    }

    async fn transition_application(
        &self,
        application_id: Uuid,
        from: ApplicationStatus,
        to: ApplicationStatus,
        offer_amount: Option<i64>,
        rejection_reason: Option<String>,
    ) -> Result<Option<Application>, DbError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            r#"
            UPDATE applications
            SET status = $3,
                offer_amount = COALESCE($4, offer_amount),
                rejection_reason = COALESCE($5, rejection_reason),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            APPLICATION_COLUMNS
        ))
        .bind(application_id)
        .bind(from)
        .bind(to)
        .bind(offer_amount)
        .bind(rejection_reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(application)
    }

    async fn create_contract(&self, contract: NewContract) -> Result<Contract, DbError> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            INSERT INTO contracts
            (id, application_id, job_id, employer_id, employee_id, rate, hours_per_period, ends_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract.id)
        .bind(contract.application_id)
        .bind(contract.job_id)
        .bind(contract.employer_id)
        .bind(contract.employee_id)
        .bind(contract.rate)
        .bind(contract.hours_per_period)
        .bind(contract.ends_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(contract)
    }

    async fn get_contract(&self, contract_id: Uuid) -> Result<Option<Contract>, DbError> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            "SELECT {} FROM contracts WHERE id = $1",
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contract)
    }

    async fn get_contract_by_application(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Contract>, DbError> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            "SELECT {} FROM contracts WHERE application_id = $1",
            CONTRACT_COLUMNS
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contract)
    }

    async fn get_user_contracts(
        &self,
        user_id: Uuid,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, DbError> {
        let contracts = sqlx::query_as::<_, Contract>(&format!(
            r#"
            SELECT {} FROM contracts
            WHERE (employer_id = $1 OR employee_id = $1)
              AND status <> 'pending'
              AND ($2::contract_status IS NULL OR status = $2)
            ORDER BY started_at DESC
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(user_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(contracts)
    }

    async fn activate_contract(
        &self,
        contract_id: Uuid,
        locked_amount: i64,
    ) -> Result<Option<Contract>, DbError> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            UPDATE contracts
            SET status = 'active', locked_amount = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .bind(locked_amount)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contract)
    }

    async fn end_contract(
        &self,
        contract_id: Uuid,
        status: ContractStatus,
        ended_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Option<Contract>, DbError> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            UPDATE contracts
            SET status = $2, terminated_by = $3, termination_reason = $4, ended_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .bind(status)
        .bind(ended_by)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contract)
    }

    async fn delete_pending_contract(&self, contract_id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM contracts WHERE id = $1 AND status = 'pending'")
            .bind(contract_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_expired_contracts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Contract>, DbError> {
        let contracts = sqlx::query_as::<_, Contract>(&format!(
            r#"
            SELECT {} FROM contracts
            WHERE status = 'active' AND ends_at IS NOT NULL AND ends_at <= $1
            ORDER BY ends_at
            LIMIT $2
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(contracts)
    }

    async fn get_contracts_pending_release(&self, limit: i64) -> Result<Vec<Contract>, DbError> {
        let contracts = sqlx::query_as::<_, Contract>(&format!(
            r#"
            SELECT {} FROM contracts
            WHERE status IN ('terminated', 'completed') AND funds_released = FALSE
            ORDER BY ended_at
            LIMIT $1
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(contracts)
    }

    async fn get_stale_pending_contracts(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Contract>, DbError> {
        let contracts = sqlx::query_as::<_, Contract>(&format!(
            r#"
            SELECT {} FROM contracts
            WHERE status = 'pending' AND started_at < $1
            ORDER BY started_at
            LIMIT $2
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(started_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(contracts)
    }

    async fn mark_funds_released(&self, contract_id: Uuid) -> Result<Option<Contract>, DbError> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            UPDATE contracts SET funds_released = TRUE
            WHERE id = $1 AND status IN ('terminated', 'completed')
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contract)
    }

    async fn create_timesheet(&self, timesheet: NewTimesheet) -> Result<Option<Timesheet>, DbError> {
        let mut tx = self.pool.begin().await?;

        let active: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM contracts WHERE id = $1 AND status = 'active' FOR SHARE",
        )
        .bind(timesheet.contract_id)
        .fetch_optional(&mut *tx)
        .await?;
        if active.is_none() {
            return Ok(None);
        }

        let timesheet = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            INSERT INTO timesheets (id, contract_id, period_label, hours_worked, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(timesheet.contract_id)
        .bind(timesheet.period_label)
        .bind(timesheet.hours_worked)
        .bind(timesheet.description)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(timesheet))
    }

    async fn get_timesheet(&self, timesheet_id: Uuid) -> Result<Option<Timesheet>, DbError> {
        let timesheet = sqlx::query_as::<_, Timesheet>(&format!(
            "SELECT {} FROM timesheets WHERE id = $1",
            TIMESHEET_COLUMNS
        ))
        .bind(timesheet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(timesheet)
    }

    async fn get_contract_timesheets(&self, contract_id: Uuid) -> Result<Vec<Timesheet>, DbError> {
        let timesheets = sqlx::query_as::<_, Timesheet>(&format!(
            "SELECT {} FROM timesheets WHERE contract_id = $1 ORDER BY submitted_at",
            TIMESHEET_COLUMNS
        ))
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(timesheets)
    }

    async fn get_timesheets_by_status(
        &self,
        status: TimesheetStatus,
        limit: i64,
    ) -> Result<Vec<Timesheet>, DbError> {
        let timesheets = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            SELECT {} FROM timesheets WHERE status = $1
            ORDER BY settlement_attempted_at NULLS FIRST, approved_at NULLS LAST, submitted_at
            LIMIT $2
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(timesheets)
    }

    async fn get_employer_pending_timesheets(
        &self,
        employer_id: Uuid,
    ) -> Result<Vec<Timesheet>, DbError> {
        let timesheets = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            SELECT {} FROM timesheets
            WHERE status = 'submitted'
              AND contract_id IN (SELECT id FROM contracts WHERE employer_id = $1)
            ORDER BY submitted_at
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(employer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(timesheets)
    }

    async fn get_employee_timesheets(&self, employee_id: Uuid) -> Result<Vec<Timesheet>, DbError> {
        let timesheets = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            SELECT {} FROM timesheets
            WHERE contract_id IN (SELECT id FROM contracts WHERE employee_id = $1)
            ORDER BY submitted_at DESC
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(timesheets)
    }

    async fn claim_timesheet_approval(
        &self,
        timesheet_id: Uuid,
        amount: i64,
    ) -> Result<ApprovalClaim, DbError> {
        let mut tx = self.pool.begin().await?;

        // contract row first, timesheet second, everywhere both are locked
        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            SELECT {} FROM contracts
            WHERE id = (SELECT contract_id FROM timesheets WHERE id = $1)
            FOR UPDATE
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(timesheet_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::Database(format!("timesheet {} has no contract", timesheet_id)))?;

        let timesheet = sqlx::query_as::<_, Timesheet>(&format!(
            "SELECT {} FROM timesheets WHERE id = $1 FOR UPDATE",
            TIMESHEET_COLUMNS
        ))
        .bind(timesheet_id)
        .fetch_one(&mut *tx)
        .await?;

        if timesheet.status != TimesheetStatus::Submitted {
            return Ok(ApprovalClaim::TimesheetNotSubmitted(timesheet.status));
        }
        if contract.status != ContractStatus::Active {
            return Ok(ApprovalClaim::ContractNotActive(contract.status));
        }
        if contract.remaining_budget() < amount {
            return Ok(ApprovalClaim::InsufficientBudget {
                remaining: contract.remaining_budget(),
            });
        }

        let timesheet = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            UPDATE timesheets
            SET status = 'approved', amount = $2, approved_at = NOW(), last_settlement_error = NULL,
                settlement_attempted_at = NULL
            WHERE id = $1
            RETURNING {}
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(timesheet_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            UPDATE contracts SET committed_amount = committed_amount + $2
            WHERE id = $1
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract.id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ApprovalClaim::Claimed { timesheet, contract })
    }

    async fn revert_timesheet_approval(
        &self,
        timesheet_id: Uuid,
    ) -> Result<Option<Timesheet>, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "SELECT id FROM contracts WHERE id = (SELECT contract_id FROM timesheets WHERE id = $1) FOR UPDATE",
        )
        .bind(timesheet_id)
        .execute(&mut *tx)
        .await?;

        let previous = sqlx::query_as::<_, Timesheet>(&format!(
            "SELECT {} FROM timesheets WHERE id = $1 AND status = 'approved' FOR UPDATE",
            TIMESHEET_COLUMNS
        ))
        .bind(timesheet_id)
        .fetch_optional(&mut *tx)
        .await?;

        let previous = match previous {
            Some(timesheet) => timesheet,
            None => return Ok(None),
        };

        let timesheet = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            UPDATE timesheets
            SET status = 'submitted', amount = NULL, approved_at = NULL
            WHERE id = $1
            RETURNING {}
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(timesheet_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE contracts SET committed_amount = committed_amount - $2 WHERE id = $1")
            .bind(previous.contract_id)
            .bind(previous.amount.unwrap_or(0))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(timesheet))
    }

    async fn mark_timesheet_paid(
        &self,
        timesheet_id: Uuid,
        settled_transaction_id: Uuid,
    ) -> Result<Option<Timesheet>, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "SELECT id FROM contracts WHERE id = (SELECT contract_id FROM timesheets WHERE id = $1) FOR UPDATE",
        )
        .bind(timesheet_id)
        .execute(&mut *tx)
        .await?;

        let timesheet = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            UPDATE timesheets
            SET status = 'paid', paid_at = NOW(), settled_transaction_id = $2, last_settlement_error = NULL
            WHERE id = $1 AND status = 'approved'
            RETURNING {}
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(timesheet_id)
        .bind(settled_transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let timesheet = match timesheet {
            Some(timesheet) => timesheet,
            None => return Ok(None),
        };

        sqlx::query(
            r#"
            UPDATE contracts
            SET paid_amount = paid_amount + $2, approved_timesheets = approved_timesheets + 1
            WHERE id = $1
            "#,
        )
        .bind(timesheet.contract_id)
        .bind(timesheet.amount.unwrap_or(0))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(timesheet))
    }

    async fn record_settlement_error(&self, timesheet_id: Uuid, error: String) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE timesheets SET last_settlement_error = $2, settlement_attempted_at = NOW()
            WHERE id = $1 AND status = 'approved'
            "#,
        )
        .bind(timesheet_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reject_timesheet(
        &self,
        timesheet_id: Uuid,
        reason: String,
    ) -> Result<Option<Timesheet>, DbError> {
        let timesheet = sqlx::query_as::<_, Timesheet>(&format!(
            r#"
            UPDATE timesheets SET status = 'rejected', rejection_reason = $2
            WHERE id = $1 AND status = 'submitted'
            RETURNING {}
            "#,
            TIMESHEET_COLUMNS
        ))
        .bind(timesheet_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(timesheet)
    }

    async fn reject_submitted_timesheets(&self, contract_id: Uuid, reason: String) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE timesheets SET status = 'rejected', rejection_reason = $2
            WHERE contract_id = $1 AND status = 'submitted'
            "#,
        )
        .bind(contract_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
