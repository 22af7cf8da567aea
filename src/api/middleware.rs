use crate::api::AppState;
use crate::domain::user::AuthUser;
use crate::error::{AppError, AuthFailure};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

/// Guards a handler behind a valid `Authorization: Bearer <access token>` header.
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<Self>() {
            return Ok(user.clone());
        }

        let auth_header = parts.headers.get(header::AUTHORIZATION).ok_or(AuthFailure::MissingAuthorization)?;
        let auth_str = auth_header.to_str().map_err(|_| AuthFailure::MalformedAuthorization)?;
        let token = bearer_token(auth_str).ok_or(AuthFailure::MalformedAuthorization)?;

        let user = state.auth_service.authenticate(token).await?;
        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim).filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("bearer abc"), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
