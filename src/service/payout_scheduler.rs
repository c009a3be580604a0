// service/payout_scheduler.rs
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    db::db::Store,
    models::labourmodel::{Timesheet, TimesheetStatus},
    service::{
        contract_service::ContractService,
        error::ServiceError,
        notification_service::{EngineEvent, NotificationService},
        timesheet_service::TimesheetService,
    },
};

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PayoutRunSummary {
    pub settled: usize,
    pub failed: usize,
    pub failed_timesheets: Vec<Uuid>,
    pub contracts_completed: usize,
    pub releases_retried: usize,
    pub pending_discarded: usize,
}

/// How long a contract may sit in `pending` before its reservation is unwound.
const PENDING_CONTRACT_GRACE_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct PayoutSettings {
    pub interval: Duration,
    pub batch_size: i64,
    pub concurrency: usize,
    pub item_timeout: Duration,
}

impl PayoutSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.payout_interval_secs.max(1)),
            batch_size: config.payout_batch_size,
            concurrency: config.payout_concurrency.max(1),
            item_timeout: Duration::from_secs(config.payout_item_timeout_secs.max(1)),
        }
    }
}

pub struct PayoutScheduler {
    db: Store,
    timesheets: Arc<TimesheetService>,
    contracts: Arc<ContractService>,
    notifications: Arc<NotificationService>,
    settings: PayoutSettings,
}

impl PayoutScheduler {
    pub fn new(
        db: Store,
        timesheets: Arc<TimesheetService>,
        contracts: Arc<ContractService>,
        notifications: Arc<NotificationService>,
        settings: PayoutSettings,
    ) -> Self {
        Self {
            db,
            timesheets,
            contracts,
            notifications,
            settings,
        }
    }

    /// Runs the payout loop in the background until the runtime shuts down.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                info!("Running payout job at {}", Utc::now());

                match self.run_once().await {
                    Ok(summary) => info!(
                        settled = summary.settled,
                        failed = summary.failed,
                        contracts_completed = summary.contracts_completed,
                        releases_retried = summary.releases_retried,
                        pending_discarded = summary.pending_discarded,
                        "payout job completed"
                    ),
                    Err(e) => error!("Payout job failed: {}", e),
                }
            }
        })
    }

    pub async fn run_once(&self) -> Result<PayoutRunSummary, ServiceError> {
        let approved = self
            .db
            .get_timesheets_by_status(TimesheetStatus::Approved, self.settings.batch_size)
            .await?;

        let results: Vec<(Uuid, Result<Timesheet, ServiceError>)> = stream::iter(approved)
            .map(|timesheet| self.settle_one(timesheet))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut summary = PayoutRunSummary::default();
        for (timesheet_id, result) in results {
            match result {
                Ok(_) => summary.settled += 1,
                Err(e) => {
                    warn!(
                        timesheet_id = %timesheet_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "scheduled settlement failed"
                    );
                    summary.failed += 1;
                    summary.failed_timesheets.push(timesheet_id);
                }
            }
        }

        summary.contracts_completed = self
            .contracts
            .complete_expired(Utc::now(), self.settings.batch_size)
            .await?;
        summary.releases_retried = self
            .contracts
            .retry_pending_releases(self.settings.batch_size)
            .await?;
        summary.pending_discarded = self
            .contracts
            .discard_stale_pending(
                Utc::now() - ChronoDuration::minutes(PENDING_CONTRACT_GRACE_MINUTES),
                self.settings.batch_size,
            )
            .await?;

        self.notifications
            .publish(EngineEvent::PayoutRunCompleted(summary.clone()));

        Ok(summary)
    }

    async fn settle_one(&self, timesheet: Timesheet) -> (Uuid, Result<Timesheet, ServiceError>) {
        let timesheet_id = timesheet.id;
        let result = match tokio::time::timeout(self.settings.item_timeout, self.timesheets.settle_pending(timesheet)).await
        {
            Ok(result) => result,
            Err(_) => {
                let message = format!("settlement timed out after {:?}", self.settings.item_timeout);
                if let Err(e) = self.db.record_settlement_error(timesheet_id, message.clone()).await {
                    warn!(timesheet_id = %timesheet_id, error = %e, "failed to record settlement timeout");
                }
                Err(ServiceError::DependencyUnavailable(message))
            }
        };
        (timesheet_id, result)
    }
}
