use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, services::identity::AuthError};

/// Machine-readable error codes returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed input or caller mismatch.
    ValidationError,
    /// Missing or rejected credential.
    AuthorizationFailed,
    /// Unknown teamspace.
    TeamspaceNotFound,
    /// Organizer-only operation by another user.
    NotAAuthor,
    /// Caller is not a member.
    NotAMember,
    /// Caller already belongs to a teamspace.
    UserAlreadyInTeam,
    /// Caller is already a member of this teamspace.
    AlreadyJoined,
    /// Teamspace has four members.
    TeamspaceFull,
    /// Party has not started yet.
    GameNotStarted,
    /// Committed, but some observers were not notified.
    NotificationFailed,
    /// Store or unexpected failure.
    InternalServerError,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthorizationFailed => "AUTHORIZATION_FAILED",
            ErrorCode::TeamspaceNotFound => "TEAMSPACE_NOT_FOUND",
            ErrorCode::NotAAuthor => "NOT_A_AUTHOR",
            ErrorCode::NotAMember => "NOT_A_MEMBER",
            ErrorCode::UserAlreadyInTeam => "USER_ALREADY_IN_TEAM",
            ErrorCode::AlreadyJoined => "ALREADY_JOINED",
            ErrorCode::TeamspaceFull => "TEAMSPACE_FULL",
            ErrorCode::GameNotStarted => "GAME_NOT_STARTED",
            ErrorCode::NotificationFailed => "NOTIFICATION_FAILED",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The teamspace does not exist.
    #[error("teamspace `{0}` not found")]
    TeamspaceNotFound(Uuid),
    /// Caller is not the organizer.
    #[error("user is not the organizer of this teamspace")]
    NotAuthor,
    /// Caller is not a member.
    #[error("user is not a member of this teamspace")]
    NotAMember,
    /// Caller already belongs to a teamspace.
    #[error("user already belongs to another teamspace")]
    UserAlreadyInTeam,
    /// Caller is already a member of this teamspace.
    #[error("user already joined this teamspace")]
    AlreadyJoined,
    /// No room left.
    #[error("teamspace is full")]
    TeamspaceFull,
    /// The party is not live yet.
    #[error("game has not started")]
    GameNotStarted,
    /// The state change committed but some observers were not notified.
    #[error("committed, but notifying {} observer(s) failed", failed.len())]
    NotificationFailed { failed: Vec<String> },
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// Unexpected failure that is not the caller's fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Error code reported to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::InvalidInput(_) => ErrorCode::ValidationError,
            ServiceError::Unauthorized(_) => ErrorCode::AuthorizationFailed,
            ServiceError::TeamspaceNotFound(_) => ErrorCode::TeamspaceNotFound,
            ServiceError::NotAuthor => ErrorCode::NotAAuthor,
            ServiceError::NotAMember => ErrorCode::NotAMember,
            ServiceError::UserAlreadyInTeam => ErrorCode::UserAlreadyInTeam,
            ServiceError::AlreadyJoined => ErrorCode::AlreadyJoined,
            ServiceError::TeamspaceFull => ErrorCode::TeamspaceFull,
            ServiceError::GameNotStarted => ErrorCode::GameNotStarted,
            ServiceError::NotificationFailed { .. } => ErrorCode::NotificationFailed,
            ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::Timeout
            | ServiceError::Internal(_) => ErrorCode::InternalServerError,
        }
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
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {1}")]
    Conflict(ErrorCode, String),
    /// Mutation committed, fan-out to observers failed.
    #[error("notification failed: {0}")]
    NotificationFailed(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Error code reported to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) => ErrorCode::ValidationError,
            AppError::Unauthorized(_) => ErrorCode::AuthorizationFailed,
            AppError::NotFound(_) => ErrorCode::TeamspaceNotFound,
            AppError::Conflict(code, _) => *code,
            AppError::NotificationFailed(_) => ErrorCode::NotificationFailed,
            AppError::ServiceUnavailable(_) | AppError::Internal(_) => {
                ErrorCode::InternalServerError
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::TeamspaceNotFound(_) => AppError::NotFound(err.to_string()),
            ServiceError::NotificationFailed { .. } => {
                AppError::NotificationFailed(err.to_string())
            }
            ServiceError::Internal(message) => AppError::Internal(message),
            ServiceError::NotAuthor
            | ServiceError::NotAMember
            | ServiceError::UserAlreadyInTeam
            | ServiceError::AlreadyJoined
            | ServiceError::TeamspaceFull
            | ServiceError::GameNotStarted => AppError::Conflict(code, err.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredential | AuthError::Rejected => {
                AppError::Unauthorized(err.to_string())
            }
            AuthError::Provider(_) | AuthError::Misconfigured(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

/// JSON error payload shared by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Machine-readable error kind.
    pub error_code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
    /// Present on `NOTIFICATION_FAILED`: the state change itself was committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<bool>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(..) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotificationFailed(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let payload = Json(ErrorBody {
            error_code: self.code(),
            committed: matches!(self, AppError::NotificationFailed(_)).then_some(true),
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_conflict_with_their_code() {
        let err: AppError = ServiceError::TeamspaceFull.into();
        assert!(matches!(err, AppError::Conflict(ErrorCode::TeamspaceFull, _)));
        assert_eq!(err.code().as_str(), "TEAMSPACE_FULL");
    }

    #[test]
    fn infrastructure_errors_surface_as_internal_server_error() {
        for err in [
            ServiceError::Degraded,
            ServiceError::Timeout,
            ServiceError::Internal("boom".into()),
        ] {
            assert_eq!(AppError::from(err).code(), ErrorCode::InternalServerError);
        }
    }

    #[test]
    fn error_code_serializes_like_as_str() {
        let json = serde_json::to_string(&ErrorCode::NotAAuthor).unwrap();
        assert_eq!(json, "\"NOT_A_AUTHOR\"");
    }

    #[test]
    fn notification_failure_body_reports_commit() {
        let response = AppError::from(ServiceError::NotificationFailed {
            failed: vec!["bob".into()],
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
