use crate::api::AppState;
use crate::api::cookies::{REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, refresh_cookie};
use crate::api::schemas::auth::{
    Login, Logout, Me, Message, Registered, RegisteredUser, Registration, Revoked, Session, TokenPair,
};
use crate::config::Environment;
use crate::domain::auth_session::AuthSession;
use crate::domain::device::{DeviceId, derive_device_id, resolve_fingerprint};
use crate::domain::user::AuthUser;
use crate::error::{AppError, Result};
use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use validator::Validate;

const DEVICE_ID_HEADER: &str = "x-device-id";

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Registration>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(payload) = payload?;
    payload.validate()?;

    let device_id = request_device(payload.device_id.as_deref(), &headers);
    let (user, session) =
        state.auth_service.register(&payload.email, &payload.password, payload.name, &device_id).await?;

    let cookie = session_cookie(&state, &session)?;
    let body = Registered {
        user: RegisteredUser { id: user.id, email: user.email },
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_in: session.expires_in,
    };

    Ok((StatusCode::CREATED, [(header::SET_COOKIE, cookie)], Json(body)))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Login>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(payload) = payload?;
    payload.validate()?;

    let device_id = request_device(payload.device_id.as_deref(), &headers);
    let session = state.auth_service.login(&payload.email, &payload.password, &device_id).await?;

    let cookie = session_cookie(&state, &session)?;
    Ok(([(header::SET_COOKIE, cookie)], Json(token_pair(session))))
}

/// The refresh token is only accepted from the cookie.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    let session = state.auth_service.refresh(get_cookie(&headers, REFRESH_COOKIE_NAME)).await?;

    let cookie = session_cookie(&state, &session)?;
    Ok(([(header::SET_COOKIE, cookie)], Json(token_pair(session))))
}

/// Accepts the refresh token from a JSON body or the cookie. An empty or unreadable body falls back to the cookie.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<impl IntoResponse> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Logout::default()
    } else {
        serde_json::from_slice::<Logout>(&body).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Ignoring unreadable logout body");
            Logout::default()
        })
    };

    let token = payload
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| get_cookie(&headers, REFRESH_COOKIE_NAME))
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".into()))?;

    state.auth_service.logout(token).await?;

    Ok((
        [(header::SET_COOKIE, clear_refresh_cookie(secure_cookies(&state)))],
        Json(Message { message: "Logged out successfully" }),
    ))
}

pub async fn logout_all(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let revoked = state.auth_service.logout_all(auth_user.id).await?;

    Ok(([(header::SET_COOKIE, clear_refresh_cookie(secure_cookies(&state)))], Json(Revoked { revoked })))
}

/// Lists the devices currently holding a refresh grant for the caller.
pub async fn sessions(auth_user: AuthUser, State(state): State<AppState>) -> Result<Json<Vec<Session>>> {
    let grants = state.auth_service.sessions(auth_user.id).await?;
    Ok(Json(grants.into_iter().map(Session::from).collect()))
}

pub async fn me(auth_user: AuthUser) -> Json<Me> {
    Json(auth_user.into())
}

fn request_device(declared: Option<&str>, headers: &HeaderMap) -> DeviceId {
    let device_header = headers.get(DEVICE_ID_HEADER).and_then(|v| v.to_str().ok());
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok());
    derive_device_id(Some(resolve_fingerprint(declared, device_header, user_agent)))
}

fn secure_cookies(state: &AppState) -> bool {
    state.config.server.environment == Environment::Production
}

fn session_cookie(state: &AppState, session: &AuthSession) -> Result<HeaderValue> {
    refresh_cookie(&session.refresh_token, state.auth_service.tokens().refresh_token_ttl_secs(), secure_cookies(state))
}

fn token_pair(session: AuthSession) -> TokenPair {
    TokenPair {
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_in: session.expires_in,
    }
}
