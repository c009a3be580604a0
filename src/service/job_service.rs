// service/job_service.rs
use uuid::Uuid;

use crate::{
    db::db::Store,
    models::labourmodel::*,
    service::error::ServiceError,
    utils::currency::MAX_HOURS_PER_PERIOD,
};

#[derive(Debug, Clone)]
pub struct JobService {
    db: Store,
}

impl JobService {
    pub fn new(db: Store) -> Self {
        Self { db }
    }

    pub async fn create_job(&self, job: NewJob) -> Result<Job, ServiceError> {
        validate_new_job(&job)?;

        let job = self.db.create_job(job).await?;
        tracing::info!(job_id = %job.id, employer_id = %job.employer_id, "job created");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, ServiceError> {
        self.db
            .get_job(job_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Job", job_id))
    }

    /// active <-> paused, active | paused -> closed. Closed is terminal.
    pub async fn set_job_status(
        &self,
        job_id: Uuid,
        employer_id: Uuid,
        status: JobStatus,
    ) -> Result<Job, ServiceError> {
        let job = self.get_job(job_id).await?;
        if job.employer_id != employer_id {
            return Err(ServiceError::Forbidden(employer_id, format!("change job {}", job_id)));
        }
        if job.status == status {
            return Ok(job);
        }
        if job.status == JobStatus::Closed {
            return Err(ServiceError::InvalidStateTransition(format!(
                "job {} is closed and cannot become {}",
                job_id,
                status.to_str()
            )));
        }

        let accepting = status == JobStatus::Active;
        let updated = self
            .db
            .update_job_status(job_id, job.status, status, accepting)
            .await?
            .ok_or_else(|| ServiceError::ConcurrentModification(format!("job {}", job_id)))?;

        tracing::info!(
            job_id = %job_id,
            from = job.status.to_str(),
            to = status.to_str(),
            "job status changed"
        );
        Ok(updated)
    }
}

fn validate_new_job(job: &NewJob) -> Result<(), ServiceError> {
    if job.title.trim().is_empty() {
        return Err(ServiceError::Validation("title is required".to_string()));
    }

    let rates = [job.hourly_rate, job.rate_min, job.rate_max];
    if rates.iter().flatten().any(|rate| *rate <= 0) {
        return Err(ServiceError::Validation("rates must be greater than zero".to_string()));
    }
    match (job.hourly_rate, job.rate_min, job.rate_max) {
        (None, None, None) => {
            return Err(ServiceError::Validation(
                "either hourly_rate or a rate range is required".to_string(),
            ))
        }
        (_, Some(min), Some(max)) if min > max => {
            return Err(ServiceError::Validation("rate_min cannot exceed rate_max".to_string()))
        }
        (Some(rate), min, max) if min.map_or(false, |m| rate < m) || max.map_or(false, |m| rate > m) => {
            return Err(ServiceError::Validation("hourly_rate lies outside the rate range".to_string()))
        }
        _ => {}
    }

    if job.hours_per_week <= 0 || job.hours_per_week as i64 > MAX_HOURS_PER_PERIOD {
        return Err(ServiceError::Validation(format!(
            "hours_per_week must be between 1 and {}",
            MAX_HOURS_PER_PERIOD
        )));
    }
    if job.duration_weeks.map_or(false, |weeks| weeks <= 0) {
        return Err(ServiceError::Validation("duration_weeks must be positive".to_string()));
    }

    Ok(())
}
