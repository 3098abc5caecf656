use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::{
    dao::{repository::RepositoryError, storage::StorageError},
    playback::PlaybackError,
    state::state_machine::InvalidTransition,
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No caller identity was supplied.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Malformed or missing input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Caller is not allowed to act on this record.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Operation cannot be performed in the current state.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// Requested record was not found (for sessions: it has ended).
    #[error("not found: {0}")]
    NotFound(String),
    /// Collaborator or storage failure.
    #[error("internal error: {0}")]
    Internal(String),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath { path, reason } => {
                ServiceError::InvalidArgument(format!("`{path}`: {reason}"))
            }
            StorageError::InvalidValue { path, reason } => {
                ServiceError::InvalidArgument(format!("`{path}`: {reason}"))
            }
            StorageError::Contended { path } => {
                ServiceError::Internal(format!("write to `{path}` kept conflicting"))
            }
            unavailable @ StorageError::Unavailable { .. } => ServiceError::Unavailable(unavailable),
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            RepositoryError::Storage(storage) => storage.into(),
            RepositoryError::Decode { .. } => {
                error!(error = %err, "stored record could not be decoded");
                ServiceError::Internal(err.to_string())
            }
        }
    }
}

impl From<PlaybackError> for ServiceError {
    fn from(err: PlaybackError) -> Self {
        match err {
            PlaybackError::LinkExpired { .. } => ServiceError::FailedPrecondition(err.to_string()),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::FailedPrecondition(err.to_string())
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("{0}")]
    BadRequest(String),
    /// Missing caller identity.
    #[error("{0}")]
    Unauthorized(String),
    /// Caller lacks the role the operation requires.
    #[error("{0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("{0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("{0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthenticated(message) => AppError::Unauthorized(message),
            ServiceError::InvalidArgument(message) => AppError::BadRequest(message),
            ServiceError::PermissionDenied(message) => AppError::Forbidden(message),
            ServiceError::FailedPrecondition(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Internal(message) => AppError::Internal(message),
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
        }
    }
}

impl AppError {
    /// Stable machine-readable code clients switch on (e.g. `not-found` means "ended").
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid-argument",
            AppError::Unauthorized(_) => "unauthenticated",
            AppError::Forbidden(_) => "permission-denied",
            AppError::NotFound(_) => "not-found",
            AppError::Conflict(_) => "failed-precondition",
            AppError::ServiceUnavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error payload returned by every failing route.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Error kind, e.g. `permission-denied`.
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let payload = Json(ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
