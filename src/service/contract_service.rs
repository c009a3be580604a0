// service/contract_service.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    db::db::{DbError, Store},
    models::{
        labourmodel::*,
        walletmodels::{contract_release_key, contract_reserve_key, EntryKind},
    },
    service::{
        error::ServiceError,
        ledger_service::LedgerService,
        notification_service::{EngineEvent, NotificationService},
    },
    utils::currency::contract_budget,
};

const ENDED_CONTRACT_REASON: &str = "Contract ended before approval";

#[derive(Debug, Clone)]
pub struct ContractService {
    db: Store,
    ledger: Arc<LedgerService>,
    notifications: Arc<NotificationService>,
    budget_periods: i64,
}

impl ContractService {
    pub fn new(
        db: Store,
        ledger: Arc<LedgerService>,
        notifications: Arc<NotificationService>,
        budget_periods: i64,
    ) -> Self {
        Self {
            db,
            ledger,
            notifications,
            budget_periods,
        }
    }

    /// Employer confirmation of an accepted application. Reserves the budget
    /// on the employer's wallet and returns the active contract; on a failed
    /// reservation the application goes back to `offered`.
    pub async fn create_from_application(
        &self,
        application_id: Uuid,
        employer_id: Uuid,
    ) -> Result<Contract, ServiceError> {
        let application = self
            .db
            .get_application(application_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Application", application_id))?;
        let job = self
            .db
            .get_job(application.job_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Job", application.job_id))?;

        if job.employer_id != employer_id {
            return Err(ServiceError::Forbidden(
                employer_id,
                format!("confirm application {}", application_id),
            ));
        }
        if application.status != ApplicationStatus::Accepted {
            return Err(ServiceError::InvalidStateTransition(format!(
                "application {} is {}; only accepted applications become contracts",
                application_id,
                application.status.to_str()
            )));
        }
        if self.db.get_contract_by_application(application_id).await?.is_some() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "application {} already has a contract",
                application_id
            )));
        }

        let rate = application
            .offer_amount
            .or(job.hourly_rate)
            .ok_or_else(|| ServiceError::Validation("no agreed rate on the application".to_string()))?;
        let budget = contract_budget(rate, job.hours_per_week, self.budget_periods)
            .ok_or_else(|| ServiceError::Validation("contract budget overflows".to_string()))?;

        let wallet = match self.ledger.wallet_for_owner(employer_id).await {
            Ok(wallet) => wallet,
            Err(ServiceError::NotFound(_)) => {
                return Err(ServiceError::InsufficientFunds { required: budget, available: 0 })
            }
            Err(e) => return Err(e),
        };

        let contract_id = Uuid::new_v4();
        let pending = match self
            .db
            .create_contract(NewContract {
                id: contract_id,
                application_id,
                job_id: job.id,
                employer_id,
                employee_id: application.applicant_id,
                rate,
                hours_per_period: job.hours_per_week,
                ends_at: contract_end(Utc::now(), job.duration_weeks),
            })
            .await
        {
            Ok(contract) => contract,
            Err(DbError::Duplicate(_)) => {
                return Err(ServiceError::InvalidStateTransition(format!(
                    "application {} already has a contract",
                    application_id
                )))
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self
            .ledger
            .reserve(wallet.id, budget, Some(contract_id), &contract_reserve_key(contract_id))
            .await
        {
            self.discard_pending(&pending).await;
            return Err(e);
        }

        let activated = match self.db.activate_contract(contract_id, budget).await {
            Ok(Some(contract)) => Ok(contract),
            Ok(None) => Err(ServiceError::Internal(format!("contract {} left pending state", contract_id))),
            Err(e) => Err(ServiceError::from(e)),
        };
        let contract = match activated {
            Ok(contract) => contract,
            Err(e) => {
                if let Err(undo) = self.unwind_pending(&pending).await {
                    // the stale-pending sweep finishes the rollback
                    tracing::error!(contract_id = %contract_id, error = %undo, "failed to unwind reservation");
                }
                return Err(e);
            }
        };

        tracing::info!(
            contract_id = %contract.id,
            application_id = %application_id,
            locked_amount = budget,
            "contract created"
        );
        self.notifications
            .publish(EngineEvent::ContractCreated {
                contract_id: contract.id,
                employer_id,
                employee_id: contract.employee_id,
                locked_amount: budget,
            });

        Ok(contract)
    }

    pub async fn get(&self, contract_id: Uuid, actor_id: Uuid) -> Result<Contract, ServiceError> {
        let contract = self.load(contract_id).await?;
        if !contract.is_party(actor_id) {
            return Err(ServiceError::Forbidden(actor_id, format!("view contract {}", contract_id)));
        }
        Ok(contract)
    }

    pub async fn list_for_user(
        &self,
        actor_id: Uuid,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, ServiceError> {
        Ok(self.db.get_user_contracts(actor_id, status).await?)
    }

    /// Either party ends an active contract early.
    pub async fn terminate(
        &self,
        contract_id: Uuid,
        actor_id: Uuid,
        reason: String,
    ) -> Result<Contract, ServiceError> {
        let contract = self.load(contract_id).await?;
        if !contract.is_party(actor_id) {
            return Err(ServiceError::Forbidden(actor_id, format!("terminate contract {}", contract_id)));
        }
        self.end(contract, ContractStatus::Terminated, Some(actor_id), Some(reason)).await
    }

    /// The employer closes out an active contract.
    pub async fn complete(&self, contract_id: Uuid, employer_id: Uuid) -> Result<Contract, ServiceError> {
        let contract = self.load(contract_id).await?;
        if contract.employer_id != employer_id {
            return Err(ServiceError::Forbidden(employer_id, format!("complete contract {}", contract_id)));
        }
        self.end(contract, ContractStatus::Completed, Some(employer_id), None).await
    }

    /// Completes active contracts whose end date has passed.
    pub async fn complete_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<usize, ServiceError> {
        let expired = self.db.get_expired_contracts(now, limit).await?;
        let mut completed = 0;

        for contract in expired {
            let contract_id = contract.id;
            match self.end(contract, ContractStatus::Completed, None, None).await {
                Ok(_) => completed += 1,
                Err(e) => tracing::warn!(contract_id = %contract_id, error = %e, "failed to complete expired contract"),
            }
        }
        Ok(completed)
    }

    /// Releases budget of ended contracts whose release did not go through.
    pub async fn retry_pending_releases(&self, limit: i64) -> Result<usize, ServiceError> {
        let pending = self.db.get_contracts_pending_release(limit).await?;
        let mut released = 0;

        for contract in pending {
            let contract_id = contract.id;
            match self.release_funds(contract).await {
                Ok(_) => released += 1,
                Err(e) => tracing::warn!(contract_id = %contract_id, error = %e, "fund release retry failed"),
            }
        }
        Ok(released)
    }

    async fn end(
        &self,
        contract: Contract,
        status: ContractStatus,
        ended_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Contract, ServiceError> {
        if contract.status != ContractStatus::Active {
            return Err(ServiceError::InvalidStateTransition(format!(
                "contract {} is {} and cannot become {}",
                contract.id,
                contract.status.to_str(),
                status.to_str()
            )));
        }

        let ended = match self.db.end_contract(contract.id, status, ended_by, reason).await? {
            Some(ended) => ended,
            None => {
                let current = self.load(contract.id).await?;
                return Err(ServiceError::InvalidStateTransition(format!(
                    "contract {} is already {}",
                    contract.id,
                    current.status.to_str()
                )));
            }
        };

        let rejected = self
            .db
            .reject_submitted_timesheets(ended.id, ENDED_CONTRACT_REASON.to_string())
            .await?;
        tracing::info!(
            contract_id = %ended.id,
            status = status.to_str(),
            rejected_timesheets = rejected,
            "contract ended"
        );

        let contract_id = ended.id;
        match self.release_funds(ended).await {
            Ok((contract, released_amount)) => {
                self.notifications
                    .publish(EngineEvent::ContractEnded {
                        contract_id,
                        status,
                        released_amount,
                    });
                Ok(contract)
            }
            Err(e) => {
                // the scheduler picks up funds_released = false
                tracing::warn!(contract_id = %contract_id, error = %e, "fund release deferred");
                self.load(contract_id).await
            }
        }
    }

    /// Unlocks the budget no timesheet has claimed.
    async fn release_funds(&self, contract: Contract) -> Result<(Contract, i64), ServiceError> {
        let amount = contract.remaining_budget();
        if amount > 0 {
            let wallet = self.ledger.wallet_for_owner(contract.employer_id).await?;
            self.ledger
                .release(wallet.id, amount, Some(contract.id), &contract_release_key(contract.id))
                .await?;
        }

        let contract = self
            .db
            .mark_funds_released(contract.id)
            .await?
            .ok_or_else(|| ServiceError::Internal(format!("contract {} is not ended", contract.id)))?;

        tracing::info!(contract_id = %contract.id, released = amount, "contract funds released");
        Ok((contract, amount))
    }

    /// Rolls back contracts stuck in `pending` since before `started_before`:
    /// their reservation is released and the application goes back to `offered`.
    pub async fn discard_stale_pending(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<usize, ServiceError> {
        let stale = self.db.get_stale_pending_contracts(started_before, limit).await?;
        let mut discarded = 0;

        for contract in stale {
            let contract_id = contract.id;
            match self.unwind_pending(&contract).await {
                Ok(()) => discarded += 1,
                Err(e) => tracing::warn!(contract_id = %contract_id, error = %e, "stale pending contract kept"),
            }
        }
        Ok(discarded)
    }

    /// Releases whatever the pending contract reserved, then discards it.
    async fn unwind_pending(&self, pending: &Contract) -> Result<(), ServiceError> {
        let reserved = self
            .db
            .get_entries_by_key(&contract_reserve_key(pending.id))
            .await?
            .into_iter()
            .find(|e| e.kind == EntryKind::Lock);

        if let Some(entry) = reserved {
            self.ledger
                .release(entry.wallet_id, entry.amount, Some(pending.id), &contract_release_key(pending.id))
                .await?;
            tracing::info!(contract_id = %pending.id, released = entry.amount, "pending reservation released");
        }

        self.discard_pending(pending).await;
        Ok(())
    }

    async fn discard_pending(&self, pending: &Contract) {
        if let Err(e) = self.db.delete_pending_contract(pending.id).await {
            tracing::error!(contract_id = %pending.id, error = %e, "failed to discard pending contract");
        }
        if let Err(e) = self
            .db
            .transition_application(
                pending.application_id,
                ApplicationStatus::Accepted,
                ApplicationStatus::Offered,
                None,
                None,
            )
            .await
        {
            tracing::error!(application_id = %pending.application_id, error = %e, "failed to roll back application");
        }
        tracing::info!(application_id = %pending.application_id, "contract not created, application back to offered");
    }

    async fn load(&self, contract_id: Uuid) -> Result<Contract, ServiceError> {
        self.db
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Contract", contract_id))
    }
}

fn contract_end(started_at: DateTime<Utc>, duration_weeks: Option<i32>) -> Option<DateTime<Utc>> {
    duration_weeks.map(|weeks| started_at + Duration::weeks(weeks as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::labourdb::LaborExt, service::fixtures::Engine};

    #[tokio::test]
    async fn confirmation_reserves_budget() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;

        assert_eq!(contract.status, ContractStatus::Active);
        assert_eq!(contract.locked_amount, 10_000);
        let wallet = engine.ledger.wallet_for_owner(employer).await.unwrap();
        assert_eq!(wallet.balance, 50_000);
        assert_eq!(wallet.locked_amount, 10_000);
        assert!(engine.event_names().await.contains(&"contract_created"));
    }

    #[tokio::test]
    async fn underfunded_confirmation_rolls_back() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        engine.ledger.fund_owner(employer, 4_000, None).await.unwrap();
        let application = engine.accepted_application(employer, employee, 1_000, 10).await;

        let err = engine
            .contracts
            .create_from_application(application.id, employer)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::InsufficientFunds { required: 10_000, available: 4_000 });

        let application = engine.db_application(application.id).await;
        assert_eq!(application.status, ApplicationStatus::Offered);
        assert!(engine.contracts.list_for_user(employer, None).await.unwrap().is_empty());
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 0);
    }

    #[tokio::test]
    async fn failed_activation_releases_the_reservation() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        engine.ledger.fund_owner(employer, 50_000, None).await.unwrap();
        let application = engine.accepted_application(employer, employee, 1_000, 10).await;
        engine.db.fail_contract_activations(1);

        let err = engine
            .contracts
            .create_from_application(application.id, employer)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "DependencyUnavailable");

        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 0);
        assert_eq!(engine.db_application(application.id).await.status, ApplicationStatus::Offered);
        assert!(engine.db.get_contract_by_application(application.id).await.unwrap().is_none());

        // the applicant accepts again and the employer can confirm
        engine.applications.respond(application.id, employee, true).await.unwrap();
        let contract = engine
            .contracts
            .create_from_application(application.id, employer)
            .await
            .unwrap();
        assert_eq!(contract.status, ContractStatus::Active);
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 10_000);
    }

    #[tokio::test]
    async fn stale_pending_contract_is_unwound() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        engine.ledger.fund_owner(employer, 50_000, None).await.unwrap();
        let application = engine.accepted_application(employer, employee, 1_000, 10).await;
        engine.db.fail_contract_activations(1);
        engine.db.fail_ledger_suffix(":release");

        assert!(engine
            .contracts
            .create_from_application(application.id, employer)
            .await
            .is_err());
        let pending = engine
            .db
            .get_contract_by_application(application.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.status, ContractStatus::Pending);
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 10_000);
        engine.db.clear_ledger_failures();

        // too recent to sweep
        let swept = engine
            .contracts
            .discard_stale_pending(Utc::now() - Duration::minutes(10), 10)
            .await
            .unwrap();
        assert_eq!(swept, 0);

        let swept = engine
            .contracts
            .discard_stale_pending(Utc::now() + Duration::minutes(1), 10)
            .await
            .unwrap();
        assert_eq!(swept, 1);
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 0);
        assert_eq!(engine.db_application(application.id).await.status, ApplicationStatus::Offered);
        assert!(engine.db.get_contract(pending.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn employer_without_wallet_has_no_funds() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let application = engine.accepted_application(employer, employee, 1_000, 10).await;

        let err = engine
            .contracts
            .create_from_application(application.id, employer)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::InsufficientFunds { required: 10_000, available: 0 });
    }

    #[tokio::test]
    async fn second_confirmation_is_refused() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;

        let err = engine
            .contracts
            .create_from_application(contract.application_id, employer)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "InvalidStateTransition");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirmations_create_one_contract() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        engine.ledger.fund_owner(employer, 100_000, None).await.unwrap();
        let application = engine.accepted_application(employer, employee, 1_000, 10).await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let contracts = engine.contracts.clone();
            let id = application.id;
            handles.push(tokio::spawn(async move { contracts.create_from_application(id, employer).await }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e.error_kind(), "InvalidStateTransition"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(engine.contracts.list_for_user(employer, None).await.unwrap().len(), 1);
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 10_000);
    }

    #[tokio::test]
    async fn two_hires_on_one_job_are_distinct() {
        let engine = Engine::new();
        let employer = Uuid::new_v4();
        engine.ledger.fund_owner(employer, 50_000, None).await.unwrap();
        let job = engine.fixed_rate_job(employer, 1_000, 10).await;

        let mut contracts = Vec::new();
        for _ in 0..2 {
            let applicant = Uuid::new_v4();
            let application = engine.applications.submit(job.id, applicant, "hi".into()).await.unwrap();
            engine.applications.make_offer(application.id, employer, None).await.unwrap();
            engine.applications.respond(application.id, applicant, true).await.unwrap();
            contracts.push(engine.contracts.create_from_application(application.id, employer).await.unwrap());
        }

        assert_ne!(contracts[0].id, contracts[1].id);
        assert_ne!(contracts[0].employee_id, contracts[1].employee_id);
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 20_000);
        // hiring does not close the job
        assert!(engine.jobs.get_job(job.id).await.unwrap().accepts_applications());
    }

    #[tokio::test]
    async fn termination_releases_unconsumed_budget() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "7", "2024-W01").await;
        engine.timesheets.approve(timesheet.id, employer).await.unwrap();
        let pending = engine.submit_hours(&contract, "2", "2024-W02").await;

        let terminated = engine
            .contracts
            .terminate(contract.id, employee, "Moving city".into())
            .await
            .unwrap();

        assert_eq!(terminated.status, ContractStatus::Terminated);
        assert_eq!(terminated.terminated_by, Some(employee));
        assert!(terminated.funds_released);

        let wallet = engine.ledger.wallet_for_owner(employer).await.unwrap();
        assert_eq!(wallet.locked_amount, 0);
        assert_eq!(wallet.balance, 43_000);

        let pending = engine.db_timesheet(pending.id).await;
        assert_eq!(pending.status, TimesheetStatus::Rejected);
    }

    #[tokio::test]
    async fn termination_keeps_claimed_budget_locked() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "7", "2024-W01").await;

        // approval claims the budget but the transfer fails
        engine.db.fail_ledger_key(&crate::models::walletmodels::timesheet_settlement_key(timesheet.id));
        assert!(engine.timesheets.approve(timesheet.id, employer).await.is_err());

        engine.contracts.terminate(contract.id, employer, "Budget cut".into()).await.unwrap();
        let wallet = engine.ledger.wallet_for_owner(employer).await.unwrap();
        assert_eq!(wallet.locked_amount, 7_000);
    }

    #[tokio::test]
    async fn only_parties_terminate_and_only_employer_completes() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;

        let err = engine.contracts.terminate(contract.id, Uuid::new_v4(), "x".into()).await.unwrap_err();
        assert_eq!(err.error_kind(), "Forbidden");
        let err = engine.contracts.complete(contract.id, employee).await.unwrap_err();
        assert_eq!(err.error_kind(), "Forbidden");

        let completed = engine.contracts.complete(contract.id, employer).await.unwrap();
        assert_eq!(completed.status, ContractStatus::Completed);

        let err = engine.contracts.terminate(contract.id, employer, "again".into()).await.unwrap_err();
        assert_eq!(err.error_kind(), "InvalidStateTransition");
    }

    #[tokio::test]
    async fn failed_release_is_retried_later() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;

        engine.db.fail_ledger_key(&contract_release_key(contract.id));
        let ended = engine.contracts.complete(contract.id, employer).await.unwrap();
        assert!(!ended.funds_released);
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 10_000);

        engine.db.clear_ledger_failures();
        assert_eq!(engine.contracts.retry_pending_releases(10).await.unwrap(), 1);
        assert_eq!(engine.ledger.wallet_for_owner(employer).await.unwrap().locked_amount, 0);
        assert_eq!(engine.contracts.retry_pending_releases(10).await.unwrap(), 0);
    }

    #[test]
    fn end_date_follows_duration() {
        let start = Utc::now();
        assert_eq!(contract_end(start, Some(2)), Some(start + Duration::weeks(2)));
        assert_eq!(contract_end(start, None), None);
    }
}
