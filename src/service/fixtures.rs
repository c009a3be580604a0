// service/fixtures.rs
//! Wires every service over a shared in-memory store for tests.
use std::{str::FromStr, sync::Arc, time::Duration};

use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    db::{labourdb::LaborExt, memorydb::MemoryDb, walletdb::WalletExt},
    models::{labourmodel::*, walletmodels::LedgerEntry},
    service::{
        application_service::ApplicationService,
        contract_service::ContractService,
        job_service::JobService,
        ledger_service::{LedgerService, RetryPolicy},
        notification_service::{testing::RecordingNotifier, EventNotifier, NotificationService},
        payout_scheduler::{PayoutScheduler, PayoutSettings},
        timesheet_service::TimesheetService,
    },
};

pub struct Engine {
    pub db: Arc<MemoryDb>,
    pub recorder: Arc<RecordingNotifier>,
    pub notifications: Arc<NotificationService>,
    pub ledger: Arc<LedgerService>,
    pub jobs: Arc<JobService>,
    pub applications: Arc<ApplicationService>,
    pub contracts: Arc<ContractService>,
    pub timesheets: Arc<TimesheetService>,
}

impl Engine {
    pub fn new() -> Self {
        let recorder = Arc::new(RecordingNotifier::default());
        Self::build(recorder.clone(), recorder)
    }

    /// Delivers events to `notifier`; `recorder` stays empty.
    pub fn with_notifier(notifier: Arc<dyn EventNotifier>) -> Self {
        Self::build(notifier, Arc::new(RecordingNotifier::default()))
    }

    fn build(notifier: Arc<dyn EventNotifier>, recorder: Arc<RecordingNotifier>) -> Self {
        let db = Arc::new(MemoryDb::new());
        let notifications = Arc::new(NotificationService::new(notifier));
        let retry = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(1),
        };
        let ledger = Arc::new(LedgerService::new(db.clone(), retry, "NGN".to_string()));

        Self {
            jobs: Arc::new(JobService::new(db.clone())),
            applications: Arc::new(ApplicationService::new(db.clone(), notifications.clone())),
            contracts: Arc::new(ContractService::new(db.clone(), ledger.clone(), notifications.clone(), 1)),
            timesheets: Arc::new(TimesheetService::new(db.clone(), ledger.clone(), notifications.clone())),
            db,
            recorder,
            notifications,
            ledger,
        }
    }

    pub fn scheduler(&self, settings: PayoutSettings) -> PayoutScheduler {
        PayoutScheduler::new(
            self.db.clone(),
            self.timesheets.clone(),
            self.contracts.clone(),
            self.notifications.clone(),
            settings,
        )
    }

    pub async fn fixed_rate_job(&self, employer_id: Uuid, rate: i64, hours_per_week: i32) -> Job {
        self.jobs
            .create_job(NewJob {
                employer_id,
                title: "Shelf stacker".into(),
                description: "Weekend shifts".into(),
                hourly_rate: Some(rate),
                rate_min: None,
                rate_max: None,
                hours_per_week,
                duration_weeks: None,
            })
            .await
            .unwrap()
    }

    /// Applies, offers at the listed rate and accepts.
    pub async fn accept_on(&self, job: &Job, employee_id: Uuid) -> Application {
        let application = self
            .applications
            .submit(job.id, employee_id, "Available immediately".into())
            .await
            .unwrap();
        self.applications
            .make_offer(application.id, job.employer_id, None)
            .await
            .unwrap();
        self.applications.respond(application.id, employee_id, true).await.unwrap()
    }

    pub async fn accepted_application(
        &self,
        employer_id: Uuid,
        employee_id: Uuid,
        rate: i64,
        hours_per_week: i32,
    ) -> Application {
        let job = self.fixed_rate_job(employer_id, rate, hours_per_week).await;
        self.accept_on(&job, employee_id).await
    }

    /// Funds the employer with `funding` and returns an active contract.
    pub async fn hire(
        &self,
        employer_id: Uuid,
        employee_id: Uuid,
        rate: i64,
        hours_per_week: i32,
        funding: i64,
    ) -> Contract {
        self.ledger.fund_owner(employer_id, funding, None).await.unwrap();
        let application = self
            .accepted_application(employer_id, employee_id, rate, hours_per_week)
            .await;
        self.contracts
            .create_from_application(application.id, employer_id)
            .await
            .unwrap()
    }

    /// Hires on an existing job; the employer must already be funded.
    pub async fn hire_for_job(&self, job: &Job, employee_id: Uuid) -> Contract {
        let application = self.accept_on(job, employee_id).await;
        self.contracts
            .create_from_application(application.id, job.employer_id)
            .await
            .unwrap()
    }

    pub async fn submit_hours(&self, contract: &Contract, hours: &str, period_label: &str) -> Timesheet {
        self.timesheets
            .submit(
                contract.id,
                contract.employee_id,
                period_label.to_string(),
                BigDecimal::from_str(hours).unwrap(),
                "Shift work".into(),
            )
            .await
            .unwrap()
    }

    /// Names of the events delivered so far, in publish order.
    pub async fn event_names(&self) -> Vec<&'static str> {
        self.notifications.flush().await;
        self.recorder.names()
    }

    pub async fn db_application(&self, application_id: Uuid) -> Application {
        self.db.get_application(application_id).await.unwrap().unwrap()
    }

    pub async fn db_timesheet(&self, timesheet_id: Uuid) -> Timesheet {
        self.db.get_timesheet(timesheet_id).await.unwrap().unwrap()
    }

    pub async fn db_entries(&self, idempotency_key: &str) -> Vec<LedgerEntry> {
        self.db.get_entries_by_key(idempotency_key).await.unwrap()
    }
}
