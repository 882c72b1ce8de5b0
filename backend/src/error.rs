//! Error type shared by every handler.
//!
//! All variants render as the JSON body `{"error":{"code":..,"message":..}}`
//! from [`shared::ApiError`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::DatabaseErrorKind;
use shared::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),

    /// An external service (PinballMap, email API) failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(diesel::result::Error::NotFound) => StatusCode::NOT_FOUND,
            AppError::Database(diesel::result::Error::DatabaseError(kind, _)) => match kind {
                DatabaseErrorKind::UniqueViolation => StatusCode::CONFLICT,
                DatabaseErrorKind::ForeignKeyViolation => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ApiError {
        match self {
            AppError::NotFound(msg) => ApiError::not_found(msg),
            AppError::Validation(msg) => ApiError::validation_error(msg),
            AppError::Unauthorized(msg) => ApiError::unauthorized(msg),
            AppError::Forbidden(msg) => ApiError::forbidden(msg),
            AppError::Conflict(msg) => ApiError::conflict(msg),
            AppError::Upstream(msg) => ApiError::bad_gateway(msg),
            AppError::Database(diesel::result::Error::NotFound) => {
                ApiError::not_found("Record not found")
            }
            AppError::Database(diesel::result::Error::DatabaseError(kind, info)) => match kind {
                DatabaseErrorKind::UniqueViolation => {
                    ApiError::conflict(format!("Already exists: {}", info.message()))
                }
                DatabaseErrorKind::ForeignKeyViolation => {
                    ApiError::validation_error(format!("Invalid reference: {}", info.message()))
                }
                _ => ApiError::internal_error("Database error"),
            },
            AppError::Database(_) => ApiError::internal_error("Database error"),
            AppError::Pool(_) => ApiError::internal_error("Database connection failed"),
            AppError::Internal(_) => ApiError::internal_error("Internal server error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<shared::FilterError> for AppError {
    fn from(err: shared::FilterError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<shared::ParseEnumError> for AppError {
    fn from(err: shared::ParseEnumError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<shared::permissions::PermissionDenied> for AppError {
    fn from(err: shared::permissions::PermissionDenied) -> Self {
        AppError::Forbidden(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Permission;

    #[test]
    fn diesel_not_found_is_404() {
        let err = AppError::from(diesel::result::Error::NotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rollback_is_server_error() {
        let err = AppError::from(diesel::result::Error::RollbackTransaction);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn permission_denied_is_forbidden() {
        let err = AppError::from(shared::permissions::PermissionDenied(Permission::IssueDelete));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.body().error.code, "FORBIDDEN");
    }

    #[test]
    fn filter_errors_are_validation() {
        let err = AppError::from(shared::FilterError::SearchTooLong);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_is_bad_gateway() {
        assert_eq!(
            AppError::Upstream("pinballmap down".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
