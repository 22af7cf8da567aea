use crate::error::{AppError, Result};
use axum::http::{HeaderMap, HeaderValue, header};

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// `Set-Cookie` value carrying a refresh token.
///
/// # Errors
/// Returns `AppError::Internal` if the token contains bytes not allowed in a header.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue> {
    build(token, max_age_secs, secure)
}

/// `Set-Cookie` value that makes the browser drop the refresh cookie.
#[must_use]
pub fn clear_refresh_cookie(secure: bool) -> HeaderValue {
    build("", 0, secure).unwrap_or_else(|_| HeaderValue::from_static("refreshToken=; Path=/; Max-Age=0"))
}

fn build(value: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue> {
    let mut cookie = format!("{REFRESH_COOKIE_NAME}={value}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|_| AppError::Internal)
}

/// Reads a cookie value from every `Cookie` header on the request.
#[must_use]
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}
