use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    engine::{
        PlayerId,
        lifecycle::{AbortError, ApplyError, PlanError},
    },
};

/// Errors raised by the match engine core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A module was constructed or configured with invalid parameters.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The player is not part of the match roster.
    #[error("unknown player `{0}`")]
    UnknownPlayer(PlayerId),
    /// The role is not part of the available role set.
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    /// The phase is not part of the configured phase plan.
    #[error("unknown phase `{0}`")]
    UnknownPhase(String),
    /// The operation is not allowed in the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// The player is already locked for the current round.
    #[error("player `{0}` already acted this round")]
    AlreadyActed(PlayerId),
    /// A scoped lock could not be acquired.
    #[error("concurrency conflict on {0}")]
    ConcurrencyConflict(String),
    /// A deferred signal no longer matches the match state.
    #[error("stale signal: {0}")]
    StaleSignal(String),
    /// Persisted match state could not be decoded.
    #[error("corrupt match state: {0}")]
    CorruptState(String),
}

/// Coarse classification of [`EngineError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid construction parameters.
    Configuration,
    /// Unrecognized player, role or phase.
    UnknownEntity,
    /// Operation rejected by the current state.
    InvalidTransition,
    /// Lock not acquired.
    ConcurrencyConflict,
    /// Signal for a state that has moved on.
    StaleSignal,
    /// Persisted state unreadable.
    Corrupt,
}

impl EngineError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::UnknownPlayer(_)
            | EngineError::UnknownRole(_)
            | EngineError::UnknownPhase(_) => ErrorKind::UnknownEntity,
            EngineError::InvalidTransition(_) | EngineError::AlreadyActed(_) => {
                ErrorKind::InvalidTransition
            }
            EngineError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            EngineError::StaleSignal(_) => ErrorKind::StaleSignal,
            EngineError::CorruptState(_) => ErrorKind::Corrupt,
        }
    }

    /// Expected races that are logged and dropped instead of surfaced to players.
    pub fn is_absorbed(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConcurrencyConflict | ErrorKind::StaleSignal
        )
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidTransition(message.into())
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<PlanError> for EngineError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                EngineError::ConcurrencyConflict("lifecycle transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                EngineError::InvalidTransition(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for EngineError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => EngineError::invalid("no lifecycle transition is pending"),
            ApplyError::IdMismatch { .. } => {
                EngineError::ConcurrencyConflict("pending lifecycle transition does not match".into())
            }
        }
    }
}

impl From<AbortError> for EngineError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => EngineError::invalid("no pending lifecycle transition"),
            AbortError::IdMismatch { .. } => {
                EngineError::ConcurrencyConflict("lifecycle plan does not match".into())
            }
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Automated progression is halted for this match.
    #[error("match halted: {0}")]
    Halted(String),
    /// Error raised by the engine core.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ServiceError {
    /// Whether the underlying failure is an expected race.
    pub fn is_absorbed(&self) -> bool {
        matches!(self, ServiceError::Engine(err) if err.is_absorbed())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
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
    /// Service unavailable.
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
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Halted(message) => AppError::ServiceUnavailable(message),
            ServiceError::Engine(err) => match err.kind() {
                ErrorKind::Configuration => AppError::BadRequest(err.to_string()),
                ErrorKind::UnknownEntity => AppError::NotFound(err.to_string()),
                ErrorKind::InvalidTransition => AppError::Conflict(err.to_string()),
                ErrorKind::ConcurrencyConflict | ErrorKind::StaleSignal => {
                    AppError::Conflict("match is busy, retry".into())
                }
                ErrorKind::Corrupt => AppError::Internal(err.to_string()),
            },
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
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
