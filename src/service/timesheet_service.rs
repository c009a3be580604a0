// service/timesheet_service.rs
use std::sync::Arc;

use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    db::db::{DbError, Store},
    models::{labourmodel::*, walletmodels::timesheet_settlement_key},
    service::{
        error::ServiceError,
        ledger_service::LedgerService,
        notification_service::{EngineEvent, NotificationService},
    },
    utils::currency::{amount_for_hours, centi_hours},
};

#[derive(Debug, Clone)]
pub struct TimesheetService {
    db: Store,
    ledger: Arc<LedgerService>,
    notifications: Arc<NotificationService>,
}

impl TimesheetService {
    pub fn new(db: Store, ledger: Arc<LedgerService>, notifications: Arc<NotificationService>) -> Self {
        Self {
            db,
            ledger,
            notifications,
        }
    }

    pub async fn submit(
        &self,
        contract_id: Uuid,
        employee_id: Uuid,
        period_label: String,
        hours_worked: BigDecimal,
        description: String,
    ) -> Result<Timesheet, ServiceError> {
        let contract = self.load_contract(contract_id).await?;
        if contract.employee_id != employee_id {
            return Err(ServiceError::Forbidden(
                employee_id,
                format!("submit timesheets for contract {}", contract_id),
            ));
        }
        if contract.status != ContractStatus::Active {
            return Err(ServiceError::InvalidStateTransition(format!(
                "contract {} is {}",
                contract_id,
                contract.status.to_str()
            )));
        }

        let period_label = period_label.trim().to_string();
        if period_label.is_empty() {
            return Err(ServiceError::Validation("period_label is required".to_string()));
        }
        centi_hours(&hours_worked).map_err(ServiceError::Validation)?;

        let timesheet = match self
            .db
            .create_timesheet(NewTimesheet {
                contract_id,
                period_label,
                hours_worked,
                description,
            })
            .await
        {
            Ok(Some(timesheet)) => timesheet,
            Ok(None) => {
                // ended after the check above
                let current = self.load_contract(contract_id).await?;
                return Err(ServiceError::InvalidStateTransition(format!(
                    "contract {} is {}",
                    contract_id,
                    current.status.to_str()
                )));
            }
            Err(DbError::Duplicate(_)) => {
                return Err(ServiceError::InvalidStateTransition(
                    "a timesheet for this period was already submitted".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(timesheet_id = %timesheet.id, contract_id = %contract_id, "timesheet submitted");
        self.notifications
            .publish(EngineEvent::TimesheetSubmitted {
                timesheet_id: timesheet.id,
                contract_id,
                employer_id: contract.employer_id,
            });

        Ok(timesheet)
    }

    /// Approves a submitted timesheet and pays it out of the contract budget.
    /// Calling it again on an approved timesheet re-drives the same
    /// settlement; a paid timesheet is returned as is.
    pub async fn approve(&self, timesheet_id: Uuid, employer_id: Uuid) -> Result<Timesheet, ServiceError> {
        let timesheet = self.load(timesheet_id).await?;
        let contract = self.load_contract(timesheet.contract_id).await?;
        if contract.employer_id != employer_id {
            return Err(ServiceError::Forbidden(employer_id, format!("approve timesheet {}", timesheet_id)));
        }

        match timesheet.status {
            TimesheetStatus::Submitted => {}
            TimesheetStatus::Approved => return self.settle_approved(timesheet, &contract).await,
            TimesheetStatus::Paid => return Ok(timesheet),
            TimesheetStatus::Rejected => return Err(not_approvable(&timesheet)),
        }

        let centi = centi_hours(&timesheet.hours_worked).map_err(ServiceError::Validation)?;
        let amount = amount_for_hours(centi, contract.rate)
            .ok_or_else(|| ServiceError::Validation("timesheet amount overflows".to_string()))?;

        match self.db.claim_timesheet_approval(timesheet_id, amount).await? {
            ApprovalClaim::Claimed { timesheet, contract } => {
                tracing::info!(timesheet_id = %timesheet_id, amount, "timesheet approved");
                self.settle_approved(timesheet, &contract).await
            }
            ApprovalClaim::InsufficientBudget { remaining } => Err(ServiceError::InsufficientLockedFunds {
                required: amount,
                locked: remaining,
            }),
            ApprovalClaim::ContractNotActive(status) => Err(ServiceError::InvalidStateTransition(format!(
                "contract {} is {}",
                contract.id,
                status.to_str()
            ))),
            ApprovalClaim::TimesheetNotSubmitted(_) => {
                // another approval got there first
                let current = self.load(timesheet_id).await?;
                match current.status {
                    TimesheetStatus::Approved => self.settle_approved(current, &contract).await,
                    TimesheetStatus::Paid => Ok(current),
                    _ => Err(not_approvable(&current)),
                }
            }
        }
    }

    /// Scheduler entry point for approved-but-unsettled timesheets.
    pub async fn settle_pending(&self, timesheet: Timesheet) -> Result<Timesheet, ServiceError> {
        if timesheet.status != TimesheetStatus::Approved {
            return Err(not_approvable(&timesheet));
        }
        let contract = self.load_contract(timesheet.contract_id).await?;
        self.settle_approved(timesheet, &contract).await
    }

    pub async fn reject(
        &self,
        timesheet_id: Uuid,
        employer_id: Uuid,
        reason: String,
    ) -> Result<Timesheet, ServiceError> {
        let timesheet = self.load(timesheet_id).await?;
        let contract = self.load_contract(timesheet.contract_id).await?;
        if contract.employer_id != employer_id {
            return Err(ServiceError::Forbidden(employer_id, format!("reject timesheet {}", timesheet_id)));
        }
        if timesheet.status != TimesheetStatus::Submitted {
            return Err(ServiceError::InvalidStateTransition(format!(
                "timesheet {} is {} and cannot be rejected",
                timesheet_id,
                timesheet.status.to_str()
            )));
        }

        let rejected = match self.db.reject_timesheet(timesheet_id, reason.clone()).await? {
            Some(rejected) => rejected,
            None => {
                let current = self.load(timesheet_id).await?;
                return Err(ServiceError::InvalidStateTransition(format!(
                    "timesheet {} is {} and cannot be rejected",
                    timesheet_id,
                    current.status.to_str()
                )));
            }
        };

        tracing::info!(timesheet_id = %timesheet_id, "timesheet rejected");
        self.notifications
            .publish(EngineEvent::TimesheetRejected {
                timesheet_id,
                employee_id: contract.employee_id,
                reason,
            });

        Ok(rejected)
    }

    pub async fn contract_timesheets(&self, contract_id: Uuid, actor_id: Uuid) -> Result<Vec<Timesheet>, ServiceError> {
        let contract = self.load_contract(contract_id).await?;
        if !contract.is_party(actor_id) {
            return Err(ServiceError::Forbidden(actor_id, format!("view timesheets of contract {}", contract_id)));
        }
        Ok(self.db.get_contract_timesheets(contract_id).await?)
    }

    pub async fn pending_for_employer(&self, employer_id: Uuid) -> Result<Vec<Timesheet>, ServiceError> {
        Ok(self.db.get_employer_pending_timesheets(employer_id).await?)
    }

    pub async fn for_employee(&self, employee_id: Uuid) -> Result<Vec<Timesheet>, ServiceError> {
        Ok(self.db.get_employee_timesheets(employee_id).await?)
    }

    /// approved -> paid through one idempotent settlement.
    async fn settle_approved(&self, timesheet: Timesheet, contract: &Contract) -> Result<Timesheet, ServiceError> {
        match self.transfer(&timesheet, contract).await {
            Ok(paid) => Ok(paid),
            Err(e @ ServiceError::InsufficientLockedFunds { .. }) => {
                tracing::warn!(timesheet_id = %timesheet.id, error = %e, "settlement refused, approval reverted");
                self.db.revert_timesheet_approval(timesheet.id).await?;
                Err(e)
            }
            Err(e) => {
                tracing::warn!(timesheet_id = %timesheet.id, error = %e, "settlement failed, left for the scheduler");
                if let Err(record_err) = self.db.record_settlement_error(timesheet.id, e.to_string()).await {
                    tracing::error!(timesheet_id = %timesheet.id, error = %record_err, "failed to record settlement error");
                }
                Err(e)
            }
        }
    }

    async fn transfer(&self, timesheet: &Timesheet, contract: &Contract) -> Result<Timesheet, ServiceError> {
        let amount = timesheet
            .amount
            .ok_or_else(|| ServiceError::Internal(format!("approved timesheet {} has no amount", timesheet.id)))?;

        let employer_wallet = self.ledger.wallet_for_owner(contract.employer_id).await?;
        let employee_wallet = self.ledger.open_wallet(contract.employee_id).await?;

        let outcome = self
            .ledger
            .settle(
                employer_wallet.id,
                employee_wallet.id,
                amount,
                &timesheet_settlement_key(timesheet.id),
                Some(timesheet.id),
            )
            .await?;

        let paid = match self
            .db
            .mark_timesheet_paid(timesheet.id, outcome.settlement.credit.id)
            .await?
        {
            Some(paid) => paid,
            None => {
                let current = self.load(timesheet.id).await?;
                if current.status == TimesheetStatus::Paid {
                    return Ok(current);
                }
                return Err(not_approvable(&current));
            }
        };

        tracing::info!(
            timesheet_id = %paid.id,
            contract_id = %contract.id,
            amount,
            replayed = outcome.replayed,
            "timesheet paid"
        );
        self.notifications
            .publish(EngineEvent::TimesheetPaid {
                timesheet_id: paid.id,
                contract_id: contract.id,
                employee_id: contract.employee_id,
                amount,
            });

        Ok(paid)
    }

    async fn load(&self, timesheet_id: Uuid) -> Result<Timesheet, ServiceError> {
        self.db
            .get_timesheet(timesheet_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Timesheet", timesheet_id))
    }

    async fn load_contract(&self, contract_id: Uuid) -> Result<Contract, ServiceError> {
        self.db
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Contract", contract_id))
    }
}

fn not_approvable(timesheet: &Timesheet) -> ServiceError {
    ServiceError::InvalidStateTransition(format!(
        "timesheet {} is {} and cannot be approved",
        timesheet.id,
        timesheet.status.to_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixtures::Engine;
    use std::str::FromStr;

    #[tokio::test]
    async fn approval_pays_the_employee() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "10", "2024-W01").await;

        let paid = engine.timesheets.approve(timesheet.id, employer).await.unwrap();
        assert_eq!(paid.status, TimesheetStatus::Paid);
        assert_eq!(paid.amount, Some(10_000));
        assert!(paid.settled_transaction_id.is_some());

        let employer_wallet = engine.ledger.wallet_for_owner(employer).await.unwrap();
        assert_eq!(employer_wallet.balance, 40_000);
        assert_eq!(employer_wallet.locked_amount, 0);
        let employee_wallet = engine.ledger.wallet_for_owner(employee).await.unwrap();
        assert_eq!(employee_wallet.balance, 10_000);

        let contract = engine.contracts.get(contract.id, employer).await.unwrap();
        assert_eq!(contract.paid_amount, 10_000);
        assert_eq!(contract.approved_timesheets, 1);
        assert!(engine.event_names().await.contains(&"timesheet_paid"));
    }

    #[tokio::test]
    async fn settled_transaction_is_the_credit_entry() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "2.5", "2024-W01").await;

        let paid = engine.timesheets.approve(timesheet.id, employer).await.unwrap();
        let employee_wallet = engine.ledger.wallet_for_owner(employee).await.unwrap();
        let entries = engine.ledger.transactions(employee_wallet.id, 10, 0).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(Some(entries[0].id), paid.settled_transaction_id);
        assert_eq!(entries[0].amount, 2_500);
    }

    #[tokio::test]
    async fn approval_beyond_budget_is_refused() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 5, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "10", "2024-W01").await;

        let err = engine.timesheets.approve(timesheet.id, employer).await.unwrap_err();
        assert_eq!(err, ServiceError::InsufficientLockedFunds { required: 10_000, locked: 5_000 });

        let timesheet = engine.db_timesheet(timesheet.id).await;
        assert_eq!(timesheet.status, TimesheetStatus::Submitted);
        let wallet = engine.ledger.wallet_for_owner(employer).await.unwrap();
        assert_eq!((wallet.balance, wallet.locked_amount), (50_000, 5_000));
        assert!(engine.ledger.wallet_for_owner(employee).await.is_err());
    }

    #[tokio::test]
    async fn budget_is_shared_across_timesheets() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let first = engine.submit_hours(&contract, "6", "2024-W01").await;
        let second = engine.submit_hours(&contract, "6", "2024-W02").await;

        engine.timesheets.approve(first.id, employer).await.unwrap();
        let err = engine.timesheets.approve(second.id, employer).await.unwrap_err();
        assert_eq!(err, ServiceError::InsufficientLockedFunds { required: 6_000, locked: 4_000 });
    }

    #[tokio::test]
    async fn failed_transfer_stays_approved_and_is_redriven() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "4", "2024-W01").await;

        engine.db.fail_ledger_key(&timesheet_settlement_key(timesheet.id));
        let err = engine.timesheets.approve(timesheet.id, employer).await.unwrap_err();
        assert_eq!(err.error_kind(), "DependencyUnavailable");

        let stuck = engine.db_timesheet(timesheet.id).await;
        assert_eq!(stuck.status, TimesheetStatus::Approved);
        assert!(stuck.last_settlement_error.is_some());

        engine.db.clear_ledger_failures();
        let paid = engine.timesheets.approve(timesheet.id, employer).await.unwrap();
        assert_eq!(paid.status, TimesheetStatus::Paid);
        assert!(paid.last_settlement_error.is_none());
        assert_eq!(engine.ledger.wallet_for_owner(employee).await.unwrap().balance, 4_000);
    }

    #[tokio::test]
    async fn approving_twice_pays_once() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "3", "2024-W01").await;

        let first = engine.timesheets.approve(timesheet.id, employer).await.unwrap();
        let second = engine.timesheets.approve(timesheet.id, employer).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.ledger.wallet_for_owner(employee).await.unwrap().balance, 3_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_approvals_pay_once() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "5", "2024-W01").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let timesheets = engine.timesheets.clone();
            let id = timesheet.id;
            handles.push(tokio::spawn(async move { timesheets.approve(id, employer).await }));
        }
        for handle in handles {
            let paid = handle.await.unwrap().unwrap();
            assert_eq!(paid.status, TimesheetStatus::Paid);
        }

        let entries = engine
            .db_entries(&timesheet_settlement_key(timesheet.id))
            .await;
        assert_eq!(entries.len(), 2);
        assert_eq!(engine.ledger.wallet_for_owner(employee).await.unwrap().balance, 5_000);
        let contract = engine.contracts.get(contract.id, employer).await.unwrap();
        assert_eq!(contract.paid_amount, 5_000);
        assert_eq!(contract.approved_timesheets, 1);
    }

    #[tokio::test]
    async fn hours_are_validated() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;

        for bad in ["0", "168.5", "1.234"] {
            let err = engine
                .timesheets
                .submit(contract.id, employee, "2024-W01".into(), BigDecimal::from_str(bad).unwrap(), String::new())
                .await
                .unwrap_err();
            assert_eq!(err.error_kind(), "ValidationError", "hours {}", bad);
        }
    }

    #[tokio::test]
    async fn one_timesheet_per_period_by_the_employee_only() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        engine.submit_hours(&contract, "1", "2024-W01").await;

        let err = engine
            .timesheets
            .submit(contract.id, employee, "2024-W01".into(), BigDecimal::from(2), String::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "InvalidStateTransition");

        let err = engine
            .timesheets
            .submit(contract.id, employer, "2024-W02".into(), BigDecimal::from(2), String::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "Forbidden");
    }

    #[tokio::test]
    async fn rejection_has_no_ledger_effect() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let timesheet = engine.submit_hours(&contract, "4", "2024-W01").await;
        let entries = engine.db.entry_count();

        let rejected = engine
            .timesheets
            .reject(timesheet.id, employer, "Hours not agreed".into())
            .await
            .unwrap();
        assert_eq!(rejected.status, TimesheetStatus::Rejected);
        assert_eq!(engine.db.entry_count(), entries);

        let err = engine.timesheets.approve(timesheet.id, employer).await.unwrap_err();
        assert_eq!(err.error_kind(), "InvalidStateTransition");
    }

    #[tokio::test]
    async fn listings_follow_roles() {
        let engine = Engine::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let contract = engine.hire(employer, employee, 1_000, 10, 50_000).await;
        let first = engine.submit_hours(&contract, "1", "2024-W01").await;
        engine.submit_hours(&contract, "1", "2024-W02").await;
        engine.timesheets.approve(first.id, employer).await.unwrap();

        assert_eq!(engine.timesheets.pending_for_employer(employer).await.unwrap().len(), 1);
        assert_eq!(engine.timesheets.for_employee(employee).await.unwrap().len(), 2);
        assert_eq!(engine.timesheets.contract_timesheets(contract.id, employee).await.unwrap().len(), 2);
        let err = engine.timesheets.contract_timesheets(contract.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.error_kind(), "Forbidden");
    }
}
