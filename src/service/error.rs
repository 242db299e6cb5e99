use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::HttpError,
    models::labourmodel::JobStatus,
    service::lifecycle::JobAction,
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("{0}")]
    Forbidden(String),

    #[error("Cannot {action} job {job_id} while it is {status:?}")]
    InvalidTransition {
        job_id: Uuid,
        status: JobStatus,
        action: JobAction,
    },

    #[error("{entity} {id} was modified by someone else; reload and try again")]
    Conflict { entity: &'static str, id: Uuid },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) | ServiceError::JobNotFound(_) => StatusCode::NOT_FOUND,

            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,

            ServiceError::InvalidTransition { .. } | ServiceError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }

            ServiceError::Conflict { .. } => StatusCode::CONFLICT,

            ServiceError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,

            ServiceError::Database(_) | ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Unique violations mean "already exists"; everything else is a plain database error.
    pub fn from_unique(error: sqlx::Error, entity: &'static str, id: Uuid) -> ServiceError {
        match &error {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                ServiceError::Conflict { entity, id }
            }
            _ => ServiceError::Database(error),
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        match error {
            ServiceError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                HttpError::server_error(crate::error::ErrorMessage::ServerError.to_string())
            }
            ServiceError::Other(ref e) => {
                tracing::error!("Service error: {}", e);
                HttpError::server_error(crate::error::ErrorMessage::ServerError.to_string())
            }
            _ => HttpError::new(error.to_string(), status),
        }
    }
}

impl From<String> for ServiceError {
    fn from(err: String) -> Self {
        ServiceError::Other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_distinct_from_other_failures() {
        let conflict = ServiceError::Conflict { entity: "Job", id: Uuid::nil() };
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let http: HttpError = conflict.into();
        assert_eq!(http.status, StatusCode::CONFLICT);
        assert!(http.message.contains("modified by someone else"));
    }

    #[test]
    fn test_database_errors_are_not_leaked() {
        let http: HttpError = ServiceError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(http.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!http.message.contains("pool"));
    }

    #[test]
    fn test_invalid_transition_is_bad_request() {
        let err = ServiceError::InvalidTransition {
            job_id: Uuid::nil(),
            status: JobStatus::Completed,
            action: JobAction::Cancel,
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("cancel"));
    }
}
