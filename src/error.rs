use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::response::ApiResponse;

const INTERNAL_MESSAGE: &str = "internal server error";

/// Every failure a service or extractor can report.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("user not found")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("missing bearer token")]
    MissingToken,

    #[error("email already registered")]
    DuplicateEmail,

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidCredentials
            | AppError::InvalidToken
            | AppError::ExpiredToken
            | AppError::MissingToken => StatusCode::UNAUTHORIZED,
            AppError::DuplicateEmail => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a client. Storage and internal failures are
    /// collapsed into a generic string.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return AppError::DuplicateEmail;
            }
        }
        AppError::Database(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::Database(detail) => tracing::error!(error = %detail, "database failure"),
            AppError::Internal(err) => tracing::error!(error = ?err, "internal failure"),
            other => tracing::debug!(error = %other, %status, "request rejected"),
        }
        (status, ApiResponse::<()>::error(self.public_message())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_each_kind_to_its_status() {
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::ExpiredToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::DuplicateEmail.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Database("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = AppError::Database("connection refused at 10.0.0.3:5432".into());
        assert_eq!(err.public_message(), "internal server error");

        let err = AppError::Internal(anyhow::anyhow!("argon2 exploded"));
        assert_eq!(err.public_message(), "internal server error");
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = AppError::validation("name must not be empty");
        assert_eq!(err.public_message(), "name must not be empty");
    }
}
