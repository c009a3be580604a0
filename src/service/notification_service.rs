// service/notification_service.rs
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{models::labourmodel::ContractStatus, service::payout_scheduler::PayoutRunSummary};

type HmacSha256 = Hmac<Sha256>;

const WEBHOOK_ATTEMPTS: u32 = 3;

/// Events published after a state change has been committed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    WalletFunded {
        wallet_id: Uuid,
        owner_id: Uuid,
        amount: i64,
    },
    ApplicationSubmitted {
        application_id: Uuid,
        job_id: Uuid,
        applicant_id: Uuid,
        employer_id: Uuid,
    },
    OfferMade {
        application_id: Uuid,
        applicant_id: Uuid,
        offer_amount: i64,
    },
    OfferResponded {
        application_id: Uuid,
        employer_id: Uuid,
        accepted: bool,
    },
    ApplicationRejected {
        application_id: Uuid,
        applicant_id: Uuid,
        reason: Option<String>,
    },
    ContractCreated {
        contract_id: Uuid,
        employer_id: Uuid,
        employee_id: Uuid,
        locked_amount: i64,
    },
    ContractEnded {
        contract_id: Uuid,
        status: ContractStatus,
        released_amount: i64,
    },
    TimesheetSubmitted {
        timesheet_id: Uuid,
        contract_id: Uuid,
        employer_id: Uuid,
    },
    TimesheetPaid {
        timesheet_id: Uuid,
        contract_id: Uuid,
        employee_id: Uuid,
        amount: i64,
    },
    TimesheetRejected {
        timesheet_id: Uuid,
        employee_id: Uuid,
        reason: String,
    },
    PayoutRunCompleted(PayoutRunSummary),
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::WalletFunded { .. } => "wallet_funded",
            EngineEvent::ApplicationSubmitted { .. } => "application_submitted",
            EngineEvent::OfferMade { .. } => "offer_made",
            EngineEvent::OfferResponded { .. } => "offer_responded",
            EngineEvent::ApplicationRejected { .. } => "application_rejected",
            EngineEvent::ContractCreated { .. } => "contract_created",
            EngineEvent::ContractEnded { .. } => "contract_ended",
            EngineEvent::TimesheetSubmitted { .. } => "timesheet_submitted",
            EngineEvent::TimesheetPaid { .. } => "timesheet_paid",
            EngineEvent::TimesheetRejected { .. } => "timesheet_rejected",
            EngineEvent::PayoutRunCompleted(_) => "payout_run_completed",
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Webhook delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid webhook signing key")]
    InvalidKey,
}

#[async_trait]
pub trait EventNotifier: std::fmt::Debug + Send + Sync {
    async fn notify(&self, event: &EngineEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl EventNotifier for LogNotifier {
    async fn notify(&self, event: &EngineEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(event = event.name(), %payload, "engine event");
        Ok(())
    }
}

/// POSTs each event as JSON, signed with `X-Signature` when a secret is set.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self { client, url, secret }
    }

    fn sign(&self, body: &[u8]) -> Result<Option<String>, NotifyError> {
        let secret = match &self.secret {
            Some(secret) => secret,
            None => return Ok(None),
        };
        Ok(Some(sign_payload(secret.as_bytes(), body)?))
    }
}

pub fn sign_payload(secret: &[u8], body: &[u8]) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| NotifyError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl EventNotifier for WebhookNotifier {
    async fn notify(&self, event: &EngineEvent) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(event)?;
        let signature = self.sign(&body)?;

        let mut last_error = String::new();
        for attempt in 1..=WEBHOOK_ATTEMPTS {
            let mut request = self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(signature) = &signature {
                request = request.header("X-Signature", signature);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => last_error = format!("status {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }

            tracing::debug!(event = event.name(), attempt, error = %last_error, "webhook delivery attempt failed");
            if attempt < WEBHOOK_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
        }

        Err(NotifyError::Delivery(last_error))
    }
}

const NOTIFICATION_QUEUE: usize = 1024;

enum Dispatch {
    Event(EngineEvent),
    #[cfg(test)]
    Flush(tokio::sync::oneshot::Sender<()>),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Event(event) => f.debug_tuple("Event").field(&event.name()).finish(),
            #[cfg(test)]
            Dispatch::Flush(_) => f.write_str("Flush"),
        }
    }
}

/// Front door for publishing. Events are queued for a background worker, so
/// callers never wait on delivery; failures are logged and never propagate.
#[derive(Debug, Clone)]
pub struct NotificationService {
    sender: mpsc::Sender<Dispatch>,
}

impl NotificationService {
    /// Spawns the delivery worker; must be called inside a Tokio runtime.
    pub fn new(notifier: Arc<dyn EventNotifier>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Dispatch>(NOTIFICATION_QUEUE);

        tokio::spawn(async move {
            while let Some(dispatch) = receiver.recv().await {
                match dispatch {
                    Dispatch::Event(event) => {
                        if let Err(e) = notifier.notify(&event).await {
                            tracing::warn!(event = event.name(), error = %e, "failed to deliver notification");
                        }
                    }
                    #[cfg(test)]
                    Dispatch::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        let name = event.name();
        if let Err(e) = self.sender.try_send(Dispatch::Event(event)) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker stopped",
            };
            tracing::warn!(event = name, reason, "notification dropped");
        }
    }

    /// Resolves once every event published before the call was handed to the notifier.
    #[cfg(test)]
    pub async fn flush(&self) {
        let (done, wait) = tokio::sync::oneshot::channel();
        if self.sender.send(Dispatch::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Keeps every published event for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub events: Mutex<Vec<EngineEvent>>,
    }

    impl RecordingNotifier {
        pub fn names(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(|e| e.name()).collect()
        }
    }

    #[async_trait]
    impl EventNotifier for RecordingNotifier {
        async fn notify(&self, event: &EngineEvent) -> Result<(), NotifyError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct FailingNotifier;

    #[async_trait]
    impl EventNotifier for FailingNotifier {
        async fn notify(&self, _event: &EngineEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("receiver offline".to_string()))
        }
    }

    /// Records like `RecordingNotifier`, but only after `delay`.
    #[derive(Debug, Default)]
    pub struct SlowNotifier {
        pub delay: std::time::Duration,
        pub inner: RecordingNotifier,
    }

    #[async_trait]
    impl EventNotifier for SlowNotifier {
        async fn notify(&self, event: &EngineEvent) -> Result<(), NotifyError> {
            tokio::time::sleep(self.delay).await;
            self.inner.notify(event).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn events_are_tagged_by_name() {
        let event = EngineEvent::TimesheetPaid {
            timesheet_id: Uuid::nil(),
            contract_id: Uuid::nil(),
            employee_id: Uuid::nil(),
            amount: 10_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "timesheet_paid");
        assert_eq!(json["amount"], 10_000);
    }

    #[test]
    fn signature_is_hex_hmac_sha256() {
        // RFC 4231 test case 2
        let signature = sign_payload(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn failed_delivery_is_swallowed() {
        let service = NotificationService::new(Arc::new(FailingNotifier));
        service.publish(EngineEvent::WalletFunded {
            wallet_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            amount: 1,
        });
        service.flush().await;
    }

    #[tokio::test]
    async fn recorded_in_order() {
        let recorder = Arc::new(RecordingNotifier::default());
        let service = NotificationService::new(recorder.clone());
        service.publish(EngineEvent::OfferMade {
            application_id: Uuid::nil(),
            applicant_id: Uuid::nil(),
            offer_amount: 900,
        });
        service.publish(EngineEvent::PayoutRunCompleted(PayoutRunSummary::default()));

        service.flush().await;
        assert_eq!(recorder.names(), vec!["offer_made", "payout_run_completed"]);
    }

    #[tokio::test]
    async fn publishing_does_not_wait_for_delivery() {
        let slow = Arc::new(SlowNotifier {
            delay: Duration::from_millis(300),
            ..Default::default()
        });
        let service = NotificationService::new(slow.clone());

        let started = std::time::Instant::now();
        service.publish(EngineEvent::OfferMade {
            application_id: Uuid::nil(),
            applicant_id: Uuid::nil(),
            offer_amount: 900,
        });
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(slow.inner.names().is_empty());

        service.flush().await;
        assert_eq!(slow.inner.names(), vec!["offer_made"]);
    }
}
