// service/application_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::db::{DbError, Store},
    models::{
        labourmodel::*,
        usermodel::{AuthenticatedUser, UserRole},
    },
    service::{
        error::ServiceError,
        notification_service::{EngineEvent, NotificationService},
    },
};

/// Application and offer negotiation between an employer and applicants.
///
/// pending -> offered -> accepted | rejected, pending -> rejected,
/// pending -> withdrawn. Contract creation from an accepted application lives
/// in the contract service.
#[derive(Debug, Clone)]
pub struct ApplicationService {
    db: Store,
    notifications: Arc<NotificationService>,
}

impl ApplicationService {
    pub fn new(db: Store, notifications: Arc<NotificationService>) -> Self {
        Self { db, notifications }
    }

    pub async fn submit(
        &self,
        job_id: Uuid,
        applicant_id: Uuid,
        cover_letter: String,
    ) -> Result<Application, ServiceError> {
        let job = self.load_job(job_id).await?;
        if job.employer_id == applicant_id {
            return Err(ServiceError::Forbidden(applicant_id, "apply to own job".to_string()));
        }
        if !job.accepts_applications() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "job {} is not accepting applications",
                job_id
            )));
        }

        let application = match self.db.create_application(job_id, applicant_id, cover_letter).await {
            Ok(application) => application,
            Err(DbError::Duplicate(_)) => {
                return Err(ServiceError::InvalidStateTransition(
                    "you have already applied to this job".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(application_id = %application.id, job_id = %job_id, "application submitted");
        self.notifications
            .publish(EngineEvent::ApplicationSubmitted {
                application_id: application.id,
                job_id,
                applicant_id,
                employer_id: job.employer_id,
            });

        Ok(application)
    }

    /// pending -> offered. Without an explicit amount the job's fixed hourly
    /// rate is offered.
    pub async fn make_offer(
        &self,
        application_id: Uuid,
        employer_id: Uuid,
        offer_amount: Option<i64>,
    ) -> Result<Application, ServiceError> {
        let (application, job) = self.load_for_employer(application_id, employer_id).await?;

        let amount = offer_amount
            .or(job.hourly_rate)
            .ok_or_else(|| ServiceError::Validation("offer_amount is required for ranged jobs".to_string()))?;
        if amount <= 0 {
            return Err(ServiceError::Validation("offer_amount must be greater than zero".to_string()));
        }
        if !job.rate_in_range(amount) {
            return Err(ServiceError::Validation(format!(
                "offer_amount {} lies outside the job's rate range",
                amount
            )));
        }

        let offered = self
            .transition(&application, ApplicationStatus::Pending, ApplicationStatus::Offered, Some(amount), None)
            .await?;

        tracing::info!(application_id = %application_id, offer_amount = amount, "offer made");
        self.notifications
            .publish(EngineEvent::OfferMade {
                application_id,
                applicant_id: offered.applicant_id,
                offer_amount: amount,
            });

        Ok(offered)
    }

    /// pending | offered -> rejected, by the employer.
    pub async fn reject(
        &self,
        application_id: Uuid,
        employer_id: Uuid,
        reason: Option<String>,
    ) -> Result<Application, ServiceError> {
        let (application, _) = self.load_for_employer(application_id, employer_id).await?;
        if !matches!(application.status, ApplicationStatus::Pending | ApplicationStatus::Offered) {
            return Err(invalid(&application, ApplicationStatus::Rejected));
        }

        let rejected = self
            .transition(&application, application.status, ApplicationStatus::Rejected, None, reason.clone())
            .await?;

        tracing::info!(application_id = %application_id, "application rejected");
        self.notifications
            .publish(EngineEvent::ApplicationRejected {
                application_id,
                applicant_id: rejected.applicant_id,
                reason,
            });

        Ok(rejected)
    }

    /// offered -> accepted | rejected, by the applicant.
    pub async fn respond(
        &self,
        application_id: Uuid,
        applicant_id: Uuid,
        accept: bool,
    ) -> Result<Application, ServiceError> {
        let application = self.load_for_applicant(application_id, applicant_id).await?;
        let (to, reason) = if accept {
            (ApplicationStatus::Accepted, None)
        } else {
            (ApplicationStatus::Rejected, Some("Offer declined by applicant".to_string()))
        };

        let updated = self
            .transition(&application, ApplicationStatus::Offered, to, None, reason)
            .await?;

        let job = self.load_job(updated.job_id).await?;
        tracing::info!(application_id = %application_id, accepted = accept, "offer answered");
        self.notifications
            .publish(EngineEvent::OfferResponded {
                application_id,
                employer_id: job.employer_id,
                accepted: accept,
            });

        Ok(updated)
    }

    /// pending -> withdrawn, by the applicant.
    pub async fn withdraw(&self, application_id: Uuid, applicant_id: Uuid) -> Result<Application, ServiceError> {
        let application = self.load_for_applicant(application_id, applicant_id).await?;
        let withdrawn = self
            .transition(&application, ApplicationStatus::Pending, ApplicationStatus::Withdrawn, None, None)
            .await?;

        tracing::info!(application_id = %application_id, "application withdrawn");
        Ok(withdrawn)
    }

    pub async fn job_applications(&self, job_id: Uuid, employer_id: Uuid) -> Result<Vec<Application>, ServiceError> {
        let job = self.load_job(job_id).await?;
        if job.employer_id != employer_id {
            return Err(ServiceError::Forbidden(employer_id, format!("view applications of job {}", job_id)));
        }
        Ok(self.db.get_job_applications(job_id).await?)
    }

    /// The applicant, the job's employer or an admin may view an application.
    pub async fn get(&self, application_id: Uuid, viewer: AuthenticatedUser) -> Result<Application, ServiceError> {
        let application = self.load(application_id).await?;
        if viewer.role == UserRole::Admin || application.applicant_id == viewer.id {
            return Ok(application);
        }

        let job = self.load_job(application.job_id).await?;
        if job.employer_id != viewer.id {
            return Err(ServiceError::Forbidden(viewer.id, format!("view application {}", application_id)));
        }
        Ok(application)
    }

    pub async fn my_applications(&self, applicant_id: Uuid) -> Result<Vec<Application>, ServiceError> {
        Ok(self.db.get_applicant_applications(applicant_id).await?)
    }

    async fn transition(
        &self,
        application: &Application,
        from: ApplicationStatus,
        to: ApplicationStatus,
        offer_amount: Option<i64>,
        reason: Option<String>,
    ) -> Result<Application, ServiceError> {
        if application.status != from {
            return Err(invalid(application, to));
        }

        match self
            .db
            .transition_application(application.id, from, to, offer_amount, reason)
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                // lost a race; report against the state that won
                let current = self
                    .db
                    .get_application(application.id)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Application", application.id))?;
                Err(invalid(&current, to))
            }
        }
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Job, ServiceError> {
        self.db
            .get_job(job_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Job", job_id))
    }

    async fn load(&self, application_id: Uuid) -> Result<Application, ServiceError> {
        self.db
            .get_application(application_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Application", application_id))
    }

    async fn load_for_employer(
        &self,
        application_id: Uuid,
        employer_id: Uuid,
    ) -> Result<(Application, Job), ServiceError> {
        let application = self.load(application_id).await?;
        let job = self.load_job(application.job_id).await?;
        if job.employer_id != employer_id {
            return Err(ServiceError::Forbidden(
                employer_id,
                format!("manage application {}", application_id),
            ));
        }
        Ok((application, job))
    }

    async fn load_for_applicant(&self, application_id: Uuid, applicant_id: Uuid) -> Result<Application, ServiceError> {
        let application = self.load(application_id).await?;
        if application.applicant_id != applicant_id {
            return Err(ServiceError::Forbidden(
                applicant_id,
                format!("act on application {}", application_id),
            ));
        }
        Ok(application)
    }
}

fn invalid(application: &Application, to: ApplicationStatus) -> ServiceError {
    ServiceError::InvalidStateTransition(format!(
        "application {} is {} and cannot become {}",
        application.id,
        application.status.to_str(),
        to.to_str()
    ))
}
