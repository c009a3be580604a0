// db/memorydb.rs
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::db::DbError;
use super::labourdb::LaborExt;
use super::walletdb::WalletExt;
use crate::models::labourmodel::*;
use crate::models::walletmodels::*;

/// Process-local store with the same conditional-update semantics as the
/// PostgreSQL client. Every operation takes the lock once and never awaits
/// while holding it.
#[derive(Debug, Default)]
pub struct MemoryDb {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<Uuid, Wallet>,
    entries: Vec<LedgerEntry>,
    jobs: HashMap<Uuid, Job>,
    applications: HashMap<Uuid, Application>,
    contracts: HashMap<Uuid, Contract>,
    timesheets: HashMap<Uuid, Timesheet>,
    faults: Faults,
}

#[derive(Debug, Default)]
struct Faults {
    version_conflicts: usize,
    unavailable: bool,
    failing_keys: HashSet<String>,
    failing_suffixes: HashSet<String>,
    activation_failures: usize,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` versioned wallet writes report a conflict.
    #[cfg(test)]
    pub fn force_version_conflicts(&self, count: usize) {
        self.state.lock().faults.version_conflicts = count;
    }

    #[cfg(test)]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().faults.unavailable = unavailable;
    }

    /// Ledger writes carrying `idempotency_key` fail as a storage outage.
    #[cfg(test)]
    pub fn fail_ledger_key(&self, idempotency_key: &str) {
        self.state.lock().faults.failing_keys.insert(idempotency_key.to_string());
    }

    /// Ledger writes whose key ends with `suffix` fail as a storage outage.
    #[cfg(test)]
    pub fn fail_ledger_suffix(&self, suffix: &str) {
        self.state.lock().faults.failing_suffixes.insert(suffix.to_string());
    }

    #[cfg(test)]
    pub fn clear_ledger_failures(&self) {
        let mut state = self.state.lock();
        state.faults.failing_keys.clear();
        state.faults.failing_suffixes.clear();
    }

    /// The next `count` contract activations fail as a storage outage.
    #[cfg(test)]
    pub fn fail_contract_activations(&self, count: usize) {
        self.state.lock().faults.activation_failures = count;
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }
}

impl State {
    fn check_available(&self) -> Result<(), DbError> {
        if self.faults.unavailable {
            return Err(DbError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn check_ledger_key(&self, key: &str) -> Result<(), DbError> {
        if self.faults.failing_keys.contains(key)
            || self.faults.failing_suffixes.iter().any(|suffix| key.ends_with(suffix.as_str()))
        {
            return Err(DbError::Unavailable(format!("ledger write for {} failed", key)));
        }
        Ok(())
    }

    fn take_conflict(&mut self) -> bool {
        if self.faults.version_conflicts > 0 {
            self.faults.version_conflicts -= 1;
            return true;
        }
        false
    }

    fn key_recorded(&self, key: &str, kind: EntryKind) -> bool {
        self.entries.iter().any(|e| e.idempotency_key == key && e.kind == kind)
    }

    /// Validates a versioned write without applying it.
    fn staged_wallet(
        &self,
        wallet_id: Uuid,
        expected_version: i64,
        balance: i64,
        locked_amount: i64,
    ) -> Result<Option<Wallet>, DbError> {
        let wallet = match self.wallets.get(&wallet_id) {
            Some(w) if w.version == expected_version && w.is_active => w,
            _ => return Ok(None),
        };

        if balance < 0 {
            return Err(DbError::Database("wallets_balance_non_negative".to_string()));
        }
        if locked_amount < 0 || locked_amount > balance {
            return Err(DbError::Database("wallets_locked_within_balance".to_string()));
        }

        let mut next = wallet.clone();
        next.balance = balance;
        next.locked_amount = locked_amount;
        next.version += 1;
        next.updated_at = Utc::now();
        Ok(Some(next))
    }

    fn entry_for(
        wallet: &Wallet,
        kind: EntryKind,
        amount: i64,
        related_entity_id: Option<Uuid>,
        idempotency_key: &str,
    ) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            kind,
            amount,
            balance_after: wallet.balance,
            locked_after: wallet.locked_amount,
            related_entity_id,
            idempotency_key: idempotency_key.to_string(),
            created_at: Utc::now(),
        }
    }

    fn contract_of(&self, timesheet_id: Uuid) -> Result<(Timesheet, Contract), DbError> {
        let timesheet = self
            .timesheets
            .get(&timesheet_id)
            .cloned()
            .ok_or_else(|| DbError::Database(format!("timesheet {} not found", timesheet_id)))?;
        let contract = self
            .contracts
            .get(&timesheet.contract_id)
            .cloned()
            .ok_or_else(|| DbError::Database(format!("timesheet {} has no contract", timesheet_id)))?;
        Ok((timesheet, contract))
    }
}

fn duplicate(constraint: &str) -> DbError {
    DbError::Duplicate(constraint.to_string())
}

#[async_trait]
impl WalletExt for MemoryDb {
    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.wallets.get(&wallet_id).cloned())
    }

    async fn get_wallet_by_owner(&self, owner_id: Uuid) -> Result<Option<Wallet>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.wallets.values().find(|w| w.owner_id == owner_id).cloned())
    }

    async fn create_wallet(&self, owner_id: Uuid, currency: &str) -> Result<Wallet, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        if let Some(existing) = state.wallets.values().find(|w| w.owner_id == owner_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: Uuid::new_v4(),
            owner_id,
            balance: 0,
            locked_amount: 0,
            version: 0,
            currency: currency.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn apply_wallet_change(
        &self,
        change: WalletChange,
    ) -> Result<Option<(Wallet, LedgerEntry)>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;
        state.check_ledger_key(&change.idempotency_key)?;

        if state.take_conflict() {
            return Ok(None);
        }

        let wallet = match state.staged_wallet(
            change.wallet_id,
            change.expected_version,
            change.balance,
            change.locked_amount,
        )? {
            Some(wallet) => wallet,
            None => return Ok(None),
        };

        if state.key_recorded(&change.idempotency_key, change.kind) {
            return Err(duplicate("ledger_entries_idempotency_key"));
        }

        let entry = State::entry_for(
            &wallet,
            change.kind,
            change.amount,
            change.related_entity_id,
            &change.idempotency_key,
        );
        state.wallets.insert(wallet.id, wallet.clone());
        state.entries.push(entry.clone());
        Ok(Some((wallet, entry)))
    }

    async fn apply_settlement(
        &self,
        change: SettlementChange,
    ) -> Result<Option<Settlement>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;
        state.check_ledger_key(&change.idempotency_key)?;

        if state.take_conflict() {
            return Ok(None);
        }

        let from = state.staged_wallet(
            change.from.wallet_id,
            change.from.expected_version,
            change.from.balance,
            change.from.locked_amount,
        )?;
        let to = state.staged_wallet(
            change.to.wallet_id,
            change.to.expected_version,
            change.to.balance,
            change.to.locked_amount,
        )?;
        let (from, to) = match (from, to) {
            (Some(from), Some(to)) => (from, to),
            _ => return Ok(None),
        };

        if state.key_recorded(&change.idempotency_key, EntryKind::Debit)
            || state.key_recorded(&change.idempotency_key, EntryKind::Credit)
        {
            return Err(duplicate("ledger_entries_idempotency_key"));
        }

        let debit = State::entry_for(
            &from,
            EntryKind::Debit,
            change.amount,
            change.related_entity_id,
            &change.idempotency_key,
        );
        let credit = State::entry_for(
            &to,
            EntryKind::Credit,
            change.amount,
            change.related_entity_id,
            &change.idempotency_key,
        );

        state.wallets.insert(from.id, from);
        state.wallets.insert(to.id, to);
        state.entries.push(debit.clone());
        state.entries.push(credit.clone());

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
        let mut state = self.state.lock();
        state.check_available()?;

        let wallet = match state.wallets.get_mut(&wallet_id) {
            Some(w) if w.version == expected_version => w,
            _ => return Ok(None),
        };
        wallet.is_active = is_active;
        wallet.version += 1;
        wallet.updated_at = Utc::now();
        Ok(Some(wallet.clone()))
    }

    async fn get_entries_by_key(&self, idempotency_key: &str) -> Result<Vec<LedgerEntry>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.idempotency_key == idempotency_key)
            .cloned()
            .collect())
    }

    async fn get_wallet_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.wallet_id == wallet_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_entry_totals(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<EntryKindTotal>, DbError> {
        let state = self.state.lock();
        state.check_available()?;

        let in_window: Vec<&LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id && e.created_at >= since)
            .collect();

        // enum declaration order, as the PG enum sorts
        Ok([EntryKind::Credit, EntryKind::Debit, EntryKind::Lock, EntryKind::Unlock]
            .into_iter()
            .filter_map(|kind| {
                let (count, total_amount) = in_window
                    .iter()
                    .filter(|e| e.kind == kind)
                    .fold((0i64, 0i64), |(count, total), e| (count + 1, total + e.amount));
                (count > 0).then(|| EntryKindTotal { kind, count, total_amount })
            })
            .collect())
    }

    async fn get_monthly_credits(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<MonthlyTotal>, DbError> {
        let state = self.state.lock();
        state.check_available()?;

        let mut months: BTreeMap<String, i64> = BTreeMap::new();
        for entry in state
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id && e.kind == EntryKind::Credit && e.created_at >= since)
        {
            *months.entry(entry.created_at.format("%Y-%m").to_string()).or_default() += entry.amount;
        }

        Ok(months
            .into_iter()
            .rev()
            .map(|(month, total_amount)| MonthlyTotal { month, total_amount })
            .collect())
    }
}

#[async_trait]
impl LaborExt for MemoryDb {
    async fn create_job(&self, job: NewJob) -> Result<Job, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            employer_id: job.employer_id,
            title: job.title,
            description: job.description,
            status: JobStatus::Active,
            hourly_rate: job.hourly_rate,
            rate_min: job.rate_min,
            rate_max: job.rate_max,
            hours_per_week: job.hours_per_week,
            duration_weeks: job.duration_weeks,
            is_accepting_applications: true,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        status: JobStatus,
        is_accepting_applications: bool,
    ) -> Result<Option<Job>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let job = match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == expected => job,
            _ => return Ok(None),
        };
        job.status = status;
        job.is_accepting_applications = is_accepting_applications;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn create_application(
        &self,
        job_id: Uuid,
        applicant_id: Uuid,
        cover_letter: String,
    ) -> Result<Application, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        if state
            .applications
            .values()
            .any(|a| a.job_id == job_id && a.applicant_id == applicant_id)
        {
            return Err(duplicate("applications_job_applicant_key"));
        }

        let now = Utc::now();
        let application = Application {
            id: Uuid::new_v4(),
            job_id,
            applicant_id,
            status: ApplicationStatus::Pending,
            offer_amount: None,
            cover_letter,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.applications.insert(application.id, application.clone());
        Ok(application)
    }

    async fn get_application(&self, application_id: Uuid) -> Result<Option<Application>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.applications.get(&application_id).cloned())
    }

    async fn get_job_applications(&self, job_id: Uuid) -> Result<Vec<Application>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        applications.sort_by_key(|a| a.created_at);
        Ok(applications)
    }

    async fn get_applicant_applications(&self, applicant_id: Uuid) -> Result<Vec<Application>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|a| a.applicant_id == applicant_id)
            .cloned()
            .collect();
        applications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
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
        let mut state = self.state.lock();
        state.check_available()?;

        let application = match state.applications.get_mut(&application_id) {
            Some(a) if a.status == from => a,
            _ => return Ok(None),
        };
        application.status = to;
        if offer_amount.is_some() {
            application.offer_amount = offer_amount;
        }
        if rejection_reason.is_some() {
            application.rejection_reason = rejection_reason;
        }
        application.updated_at = Utc::now();
        Ok(Some(application.clone()))
    }

    async fn create_contract(&self, contract: NewContract) -> Result<Contract, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        if state
            .contracts
            .values()
            .any(|c| c.application_id == contract.application_id)
        {
            return Err(duplicate("contracts_application_key"));
        }

        let contract = Contract {
            id: contract.id,
            application_id: contract.application_id,
            job_id: contract.job_id,
            employer_id: contract.employer_id,
            employee_id: contract.employee_id,
            rate: contract.rate,
            hours_per_period: contract.hours_per_period,
            status: ContractStatus::Pending,
            locked_amount: 0,
            committed_amount: 0,
            paid_amount: 0,
            approved_timesheets: 0,
            termination_reason: None,
            terminated_by: None,
            funds_released: false,
            started_at: Utc::now(),
            ends_at: contract.ends_at,
            ended_at: None,
        };
        state.contracts.insert(contract.id, contract.clone());
        Ok(contract)
    }

    async fn get_contract(&self, contract_id: Uuid) -> Result<Option<Contract>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.contracts.get(&contract_id).cloned())
    }

    async fn get_contract_by_application(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Contract>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .contracts
            .values()
            .find(|c| c.application_id == application_id)
            .cloned())
    }

    async fn get_user_contracts(
        &self,
        user_id: Uuid,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut contracts: Vec<Contract> = state
            .contracts
            .values()
            .filter(|c| c.is_party(user_id) && c.status != ContractStatus::Pending)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        contracts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(contracts)
    }

    async fn activate_contract(
        &self,
        contract_id: Uuid,
        locked_amount: i64,
    ) -> Result<Option<Contract>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;
        if state.faults.activation_failures > 0 {
            state.faults.activation_failures -= 1;
            return Err(DbError::Unavailable(format!("activation of contract {} failed", contract_id)));
        }

        let contract = match state.contracts.get_mut(&contract_id) {
            Some(c) if c.status == ContractStatus::Pending => c,
            _ => return Ok(None),
        };
        contract.status = ContractStatus::Active;
        contract.locked_amount = locked_amount;
        Ok(Some(contract.clone()))
    }

    async fn end_contract(
        &self,
        contract_id: Uuid,
        status: ContractStatus,
        ended_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Option<Contract>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let contract = match state.contracts.get_mut(&contract_id) {
            Some(c) if c.status == ContractStatus::Active => c,
            _ => return Ok(None),
        };
        contract.status = status;
        contract.terminated_by = ended_by;
        contract.termination_reason = reason;
        contract.ended_at = Some(Utc::now());
        Ok(Some(contract.clone()))
    }

    async fn delete_pending_contract(&self, contract_id: Uuid) -> Result<bool, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        match state.contracts.get(&contract_id) {
            Some(c) if c.status == ContractStatus::Pending => {
                state.contracts.remove(&contract_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_expired_contracts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Contract>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut contracts: Vec<Contract> = state
            .contracts
            .values()
            .filter(|c| c.status == ContractStatus::Active && c.ends_at.map_or(false, |end| end <= now))
            .cloned()
            .collect();
        contracts.sort_by_key(|c| c.ends_at);
        contracts.truncate(limit.max(0) as usize);
        Ok(contracts)
    }

    async fn get_contracts_pending_release(&self, limit: i64) -> Result<Vec<Contract>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut contracts: Vec<Contract> = state
            .contracts
            .values()
            .filter(|c| c.status.is_ended() && !c.funds_released)
            .cloned()
            .collect();
        contracts.sort_by_key(|c| c.ended_at);
        contracts.truncate(limit.max(0) as usize);
        Ok(contracts)
    }

    async fn get_stale_pending_contracts(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Contract>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut contracts: Vec<Contract> = state
            .contracts
            .values()
            .filter(|c| c.status == ContractStatus::Pending && c.started_at < started_before)
            .cloned()
            .collect();
        contracts.sort_by_key(|c| c.started_at);
        contracts.truncate(limit.max(0) as usize);
        Ok(contracts)
    }

    async fn mark_funds_released(&self, contract_id: Uuid) -> Result<Option<Contract>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let contract = match state.contracts.get_mut(&contract_id) {
            Some(c) if c.status.is_ended() => c,
            _ => return Ok(None),
        };
        contract.funds_released = true;
        Ok(Some(contract.clone()))
    }

    async fn create_timesheet(&self, timesheet: NewTimesheet) -> Result<Option<Timesheet>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        match state.contracts.get(&timesheet.contract_id) {
            Some(c) if c.status == ContractStatus::Active => {}
            _ => return Ok(None),
        }

        if state
            .timesheets
            .values()
            .any(|t| t.contract_id == timesheet.contract_id && t.period_label == timesheet.period_label)
        {
            return Err(duplicate("timesheets_contract_period_key"));
        }

        let timesheet = Timesheet {
            id: Uuid::new_v4(),
            contract_id: timesheet.contract_id,
            period_label: timesheet.period_label,
            hours_worked: timesheet.hours_worked,
            description: timesheet.description,
            status: TimesheetStatus::Submitted,
            amount: None,
            rejection_reason: None,
            submitted_at: Utc::now(),
            approved_at: None,
            paid_at: None,
            settled_transaction_id: None,
            last_settlement_error: None,
            settlement_attempted_at: None,
        };
        state.timesheets.insert(timesheet.id, timesheet.clone());
        Ok(Some(timesheet))
    }

    async fn get_timesheet(&self, timesheet_id: Uuid) -> Result<Option<Timesheet>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.timesheets.get(&timesheet_id).cloned())
    }

    async fn get_contract_timesheets(&self, contract_id: Uuid) -> Result<Vec<Timesheet>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut timesheets: Vec<Timesheet> = state
            .timesheets
            .values()
            .filter(|t| t.contract_id == contract_id)
            .cloned()
            .collect();
        timesheets.sort_by_key(|t| t.submitted_at);
        Ok(timesheets)
    }

    async fn get_timesheets_by_status(
        &self,
        status: TimesheetStatus,
        limit: i64,
    ) -> Result<Vec<Timesheet>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut timesheets: Vec<Timesheet> = state
            .timesheets
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        // never attempted (None) first, then least recently attempted
        timesheets.sort_by_key(|t| (t.settlement_attempted_at, t.approved_at, t.submitted_at));
        timesheets.truncate(limit.max(0) as usize);
        Ok(timesheets)
    }

    async fn get_employer_pending_timesheets(
        &self,
        employer_id: Uuid,
    ) -> Result<Vec<Timesheet>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut timesheets: Vec<Timesheet> = state
            .timesheets
            .values()
            .filter(|t| t.status == TimesheetStatus::Submitted)
            .filter(|t| {
                state
                    .contracts
                    .get(&t.contract_id)
                    .map_or(false, |c| c.employer_id == employer_id)
            })
            .cloned()
            .collect();
        timesheets.sort_by_key(|t| t.submitted_at);
        Ok(timesheets)
    }

    async fn get_employee_timesheets(&self, employee_id: Uuid) -> Result<Vec<Timesheet>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let mut timesheets: Vec<Timesheet> = state
            .timesheets
            .values()
            .filter(|t| {
                state
                    .contracts
                    .get(&t.contract_id)
                    .map_or(false, |c| c.employee_id == employee_id)
            })
            .cloned()
            .collect();
        timesheets.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(timesheets)
    }

    async fn claim_timesheet_approval(
        &self,
        timesheet_id: Uuid,
        amount: i64,
    ) -> Result<ApprovalClaim, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let (timesheet, contract) = state.contract_of(timesheet_id)?;
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

        let mut timesheet = timesheet;
        timesheet.status = TimesheetStatus::Approved;
        timesheet.amount = Some(amount);
        timesheet.approved_at = Some(Utc::now());
        timesheet.last_settlement_error = None;
        timesheet.settlement_attempted_at = None;

        let mut contract = contract;
        contract.committed_amount += amount;

        state.timesheets.insert(timesheet.id, timesheet.clone());
        state.contracts.insert(contract.id, contract.clone());
        Ok(ApprovalClaim::Claimed { timesheet, contract })
    }

    async fn revert_timesheet_approval(
        &self,
        timesheet_id: Uuid,
    ) -> Result<Option<Timesheet>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let (mut timesheet, mut contract) = state.contract_of(timesheet_id)?;
        if timesheet.status != TimesheetStatus::Approved {
            return Ok(None);
        }

        contract.committed_amount -= timesheet.amount.unwrap_or(0);
        timesheet.status = TimesheetStatus::Submitted;
        timesheet.amount = None;
        timesheet.approved_at = None;

        state.timesheets.insert(timesheet.id, timesheet.clone());
        state.contracts.insert(contract.id, contract);
        Ok(Some(timesheet))
    }

    async fn mark_timesheet_paid(
        &self,
        timesheet_id: Uuid,
        settled_transaction_id: Uuid,
    ) -> Result<Option<Timesheet>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let (mut timesheet, mut contract) = state.contract_of(timesheet_id)?;
        if timesheet.status != TimesheetStatus::Approved {
            return Ok(None);
        }

        timesheet.status = TimesheetStatus::Paid;
        timesheet.paid_at = Some(Utc::now());
        timesheet.settled_transaction_id = Some(settled_transaction_id);
        timesheet.last_settlement_error = None;
        contract.paid_amount += timesheet.amount.unwrap_or(0);
        contract.approved_timesheets += 1;

        state.timesheets.insert(timesheet.id, timesheet.clone());
        state.contracts.insert(contract.id, contract);
        Ok(Some(timesheet))
    }

    async fn record_settlement_error(&self, timesheet_id: Uuid, error: String) -> Result<(), DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        if let Some(timesheet) = state.timesheets.get_mut(&timesheet_id) {
            if timesheet.status == TimesheetStatus::Approved {
                timesheet.last_settlement_error = Some(error);
                timesheet.settlement_attempted_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn reject_timesheet(
        &self,
        timesheet_id: Uuid,
        reason: String,
    ) -> Result<Option<Timesheet>, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let timesheet = match state.timesheets.get_mut(&timesheet_id) {
            Some(t) if t.status == TimesheetStatus::Submitted => t,
            _ => return Ok(None),
        };
        timesheet.status = TimesheetStatus::Rejected;
        timesheet.rejection_reason = Some(reason);
        Ok(Some(timesheet.clone()))
    }

    async fn reject_submitted_timesheets(&self, contract_id: Uuid, reason: String) -> Result<u64, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let mut rejected = 0;
        for timesheet in state.timesheets.values_mut() {
            if timesheet.contract_id == contract_id && timesheet.status == TimesheetStatus::Submitted {
                timesheet.status = TimesheetStatus::Rejected;
                timesheet.rejection_reason = Some(reason.clone());
                rejected += 1;
            }
        }
        Ok(rejected)
    }
}
