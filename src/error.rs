use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::lifecycle::InvalidTransition};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The targeted team lost its last open slot to a concurrent join.
    #[error("team is already at capacity")]
    CapacityExceeded,
    /// Every candidate match filled up before the caller could claim a slot.
    #[error("no joinable match available")]
    NoMatchAvailable,
    /// The user already belongs to an active match.
    #[error("user already belongs to active match `{0}`")]
    AlreadyInMatch(Uuid),
    /// Leave or discovery referenced a user that is not a member.
    #[error("user is not a member of this match")]
    MemberNotFound,
    /// The match id does not resolve to a stored match.
    #[error("match `{0}` not found")]
    MatchNotFound(Uuid),
    /// Leaving is only allowed before the match starts.
    #[error("cannot leave a match in progress")]
    MatchInProgress,
    /// Discoveries and settlement require a playing match.
    #[error("match is not in playing status")]
    MatchNotPlaying,
    /// Conditional writes kept losing races past the retry budget.
    #[error("conflicting concurrent update, please retry")]
    Conflict,
    /// Reported position implies implausible travel speed.
    #[error("movement of {speed_kmh:.0} km/h exceeds the {limit_kmh:.0} km/h limit")]
    SuspiciousMovement {
        /// Speed implied by the reported position.
        speed_kmh: f64,
        /// Configured plausibility threshold.
        limit_kmh: f64,
    },
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The lifecycle state machine rejected the requested transition.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::MatchMissing { id } => ServiceError::MatchNotFound(id),
            StorageError::WriteConflict { .. } => ServiceError::Conflict,
            unavailable => ServiceError::Unavailable(unavailable),
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
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            err @ ServiceError::SuspiciousMovement { .. } => AppError::BadRequest(err.to_string()),
            err @ ServiceError::MatchNotFound(_) => AppError::NotFound(err.to_string()),
            err @ (ServiceError::CapacityExceeded
            | ServiceError::NoMatchAvailable
            | ServiceError::AlreadyInMatch(_)
            | ServiceError::MemberNotFound
            | ServiceError::MatchInProgress
            | ServiceError::MatchNotPlaying
            | ServiceError::Conflict
            | ServiceError::InvalidTransition(_)) => AppError::Conflict(err.to_string()),
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
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
