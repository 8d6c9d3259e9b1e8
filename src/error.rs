use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError},
};

/// Errors surfaced by the session engines and the services wrapping them.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or out-of-range input; no state changed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Referenced poll, question or instance does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The store rejected or could not perform a write or read.
    #[error("persistence failure: {0}")]
    Persistence(#[source] StorageError),
    /// Operation not allowed in the current phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Store write did not complete within the transition timeout.
    #[error("operation timed out")]
    Timeout,
    /// The instance actor has shut down.
    #[error("instance closed")]
    InstanceClosed,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { table, constraint } => ServiceError::InvalidState(format!(
                "constraint `{constraint}` violated on {table:?}"
            )),
            other => ServiceError::Persistence(other),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Instance is gone.
    #[error("gone: {0}")]
    Gone(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Persistence(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            ServiceError::InstanceClosed => AppError::Gone("instance closed".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gone(_) => StatusCode::GONE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "phase changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "phase version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("transition plan does not match".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Table;

    #[test]
    fn conflicts_surface_as_invalid_state() {
        let err: ServiceError = StorageError::Conflict {
            table: Table::Responses,
            constraint: "one_response_per_participant",
        }
        .into();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn http_status_mapping() {
        let cases = [
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                ServiceError::Persistence(StorageError::offline("down")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ServiceError::InvalidState("x".into()), StatusCode::CONFLICT),
            (ServiceError::Timeout, StatusCode::SERVICE_UNAVAILABLE),
            (ServiceError::InstanceClosed, StatusCode::GONE),
        ];
        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
