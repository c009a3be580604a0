use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::{db::db::DbError, error::HttpError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("User {0} is not allowed to {1}")]
    Forbidden(Uuid, String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Insufficient locked funds: required {required}, locked {locked}")]
    InsufficientLockedFunds { required: i64, locked: i64 },

    #[error("Concurrent modification of {0}, retry the request")]
    ConcurrentModification(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "ValidationError",
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::Forbidden(_, _) => "Forbidden",
            ServiceError::InvalidStateTransition(_) => "InvalidStateTransition",
            ServiceError::InsufficientFunds { .. } => "InsufficientFunds",
            ServiceError::InsufficientLockedFunds { .. } => "InsufficientLockedFunds",
            ServiceError::ConcurrentModification(_) => "ConcurrentModification",
            ServiceError::DependencyUnavailable(_) => "DependencyUnavailable",
            ServiceError::Internal(_) => "Internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_, _) => StatusCode::FORBIDDEN,
            ServiceError::InvalidStateTransition(_) => StatusCode::CONFLICT,
            ServiceError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            ServiceError::InsufficientLockedFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            ServiceError::ConcurrentModification(_) => StatusCode::CONFLICT,
            ServiceError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::ConcurrentModification(_) | ServiceError::DependencyUnavailable(_)
        )
    }

    pub fn not_found(entity: &str, id: Uuid) -> Self {
        ServiceError::NotFound(format!("{} {}", entity, id))
    }
}

impl From<DbError> for ServiceError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::Duplicate(constraint) => {
                ServiceError::InvalidStateTransition(format!("record already exists ({})", constraint))
            }
            DbError::Conflict(msg) => ServiceError::ConcurrentModification(msg),
            DbError::Unavailable(msg) => ServiceError::DependencyUnavailable(msg),
            DbError::Database(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        let kind = error.error_kind();
        match &error {
            // storage detail stays in the logs
            ServiceError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                HttpError::with_kind("Something went wrong", status, kind)
            }
            _ => HttpError::with_kind(error.to_string(), status, kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_translated() {
        let err: ServiceError = DbError::Unavailable("pool timed out".into()).into();
        assert_eq!(err.error_kind(), "DependencyUnavailable");
        assert!(err.is_retryable());

        let err: ServiceError = DbError::Duplicate("contracts_application_key".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(!err.is_retryable());

        let err: ServiceError = DbError::Conflict("could not serialize access".into()).into();
        assert_eq!(err.error_kind(), "ConcurrentModification");
        assert!(err.is_retryable());

        let err: ServiceError = DbError::Database("wallets_locked_within_balance".into()).into();
        assert_eq!(err.error_kind(), "Internal");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_retryable());
    }

    #[test]
    fn internal_detail_is_hidden() {
        let http: HttpError = ServiceError::from(DbError::Database("contracts_committed_within_locked".into())).into();
        assert_eq!(http.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(http.kind, "Internal");
        assert!(!http.message.contains("contracts_committed_within_locked"));
    }

    #[test]
    fn http_mapping_keeps_kind() {
        let http: HttpError = ServiceError::InsufficientFunds { required: 10, available: 5 }.into();
        assert_eq!(http.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(http.kind, "InsufficientFunds");

        let http: HttpError = ServiceError::ConcurrentModification("wallet".into()).into();
        assert_eq!(http.status, StatusCode::CONFLICT);
        assert_eq!(http.kind, "ConcurrentModification");
    }
}
