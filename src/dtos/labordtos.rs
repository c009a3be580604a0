use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;
use validator::Validate;

use crate::models::labourmodel::*;

// Job DTOs
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateJobDto {
    #[validate(length(min = 1, max = 100, message = "Title must be between 1 and 100 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    #[serde(default)]
    pub description: String,

    #[validate(range(min = 1, message = "Hourly rate must be positive"))]
    pub hourly_rate: Option<i64>,

    #[validate(range(min = 1, message = "Minimum rate must be positive"))]
    pub rate_min: Option<i64>,

    #[validate(range(min = 1, message = "Maximum rate must be positive"))]
    pub rate_max: Option<i64>,

    #[validate(range(min = 1, max = 168, message = "Hours per week must be between 1 and 168"))]
    pub hours_per_week: i32,

    #[validate(range(min = 1, max = 520, message = "Duration must be between 1 and 520 weeks"))]
    pub duration_weeks: Option<i32>,
}

impl CreateJobDto {
    pub fn into_new_job(self, employer_id: Uuid) -> NewJob {
        NewJob {
            employer_id,
            title: self.title.trim().to_string(),
            description: self.description,
            hourly_rate: self.hourly_rate,
            rate_min: self.rate_min,
            rate_max: self.rate_max,
            hours_per_week: self.hours_per_week,
            duration_weeks: self.duration_weeks,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateJobStatusDto {
    pub status: JobStatus,
}

// Application DTOs
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateJobApplicationDto {
    #[validate(length(max = 2500, message = "Cover letter cannot exceed 2500 characters"))]
    #[serde(default)]
    pub cover_letter: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct MakeOfferDto {
    #[validate(range(min = 1, message = "Offer amount must be positive"))]
    pub offer_amount: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RespondOfferDto {
    pub accept: bool,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RejectApplicationDto {
    #[validate(length(max = 1000, message = "Reason cannot exceed 1000 characters"))]
    pub reason: Option<String>,
}

/// Employer decision on an application; `accepted` confirms the hire.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateApplicationStatusDto {
    pub status: ApplicationStatus,

    #[validate(length(max = 1000, message = "Reason cannot exceed 1000 characters"))]
    pub reason: Option<String>,
}

// Contract DTOs
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct TerminateContractDto {
    #[validate(length(min = 1, max = 1000, message = "Reason must be between 1 and 1000 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ContractFilterQuery {
    pub status: Option<ContractStatus>,
}

// Timesheet DTOs
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitTimesheetDto {
    pub contract_id: Uuid,

    #[validate(length(min = 1, max = 50, message = "Period label must be between 1 and 50 characters"))]
    pub period_label: String,

    /// Accepts `7.5` or `"7.5"`.
    #[serde(deserialize_with = "deserialize_hours")]
    pub hours_worked: BigDecimal,

    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RejectTimesheetDto {
    #[validate(length(min = 1, max = 1000, message = "Reason must be between 1 and 1000 characters"))]
    pub reason: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HoursInput {
    Text(String),
    Number(serde_json::Number),
}

fn deserialize_hours<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match HoursInput::deserialize(deserializer)? {
        HoursInput::Text(text) => text,
        HoursInput::Number(number) => number.to_string(),
    };
    BigDecimal::from_str(raw.trim()).map_err(|_| de::Error::custom(format!("invalid hours value: {}", raw)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }
}
