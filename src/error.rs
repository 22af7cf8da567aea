use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Client-facing reasons for a 401.
///
/// Every rejected refresh token maps to `RefreshTokenInvalid`, whatever the underlying cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    RefreshTokenRequired,
    RefreshTokenInvalid,
    MissingAuthorization,
    MalformedAuthorization,
    TokenExpired,
    TokenInvalid,
    UserNotFound,
}

impl AuthFailure {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid email or password",
            Self::RefreshTokenRequired => "Refresh token is required",
            Self::RefreshTokenInvalid => "Refresh token is invalid",
            Self::MissingAuthorization => "Authorization header is required",
            Self::MalformedAuthorization => "Invalid authorization header format",
            Self::TokenExpired => "Token has expired",
            Self::TokenInvalid => "Invalid token",
            Self::UserNotFound => "User not found",
        }
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Authentication failed: {0}")]
    Unauthorized(AuthFailure),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<AuthFailure> for AppError {
    fn from(failure: AuthFailure) -> Self {
        Self::Unauthorized(failure)
    }
}

/// Joins the field messages in field order so the response is stable.
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = err.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let messages: Vec<String> = fields
            .into_iter()
            .flat_map(|(_, errors)| errors.iter())
            .map(|e| e.message.as_ref().map_or_else(|| "Invalid value".to_string(), ToString::to_string))
            .collect();

        if messages.is_empty() {
            Self::BadRequest("Validation failed".into())
        } else {
            Self::BadRequest(messages.join(", "))
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::Storage(e) => {
                tracing::error!(error = %e, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::Unauthorized(failure) => {
                tracing::debug!(reason = %failure, "Authentication failed");
                (StatusCode::UNAUTHORIZED, failure.message().to_string())
            }
            Self::BadRequest(msg) => {
                tracing::debug!(message = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_maps_to_401_with_fixed_message() {
        let response = AppError::from(AuthFailure::TokenExpired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_storage_errors_map_to_500() {
        let response = AppError::Storage("disk full".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::Database(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_bad_request_keeps_message() {
        let response = AppError::BadRequest("Email is already registered".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[derive(validator::Validate)]
    struct Credentials {
        #[validate(email(message = "Email must be a valid email address"))]
        email: String,
        #[validate(length(min = 6, message = "Password is too short"))]
        password: String,
    }

    #[test]
    fn test_validation_errors_become_bad_request() {
        use validator::Validate;

        let errors = Credentials { email: "nope".into(), password: "abc".into() }.validate().unwrap_err();
        match AppError::from(errors) {
            AppError::BadRequest(msg) => {
                assert_eq!(msg, "Email must be a valid email address, Password is too short");
            }
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_refresh_failures_share_one_message() {
        assert_eq!(AuthFailure::RefreshTokenInvalid.to_string(), "Refresh token is invalid");
        assert_eq!(AuthFailure::InvalidCredentials.message(), "Invalid email or password");
    }
}
