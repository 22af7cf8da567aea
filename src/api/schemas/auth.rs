use crate::domain::auth::RefreshToken;
use crate::domain::user::{AuthUser, Role};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Registration {
    #[validate(
        email(message = "Email must be a valid email address"),
        length(max = 254, message = "Email is too long")
    )]
    pub email: String,

    #[validate(length(min = 6, max = 128, message = "Password must be between 6 and 128 characters"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    pub device_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Login {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    pub device_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Logout {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisteredUser {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub user: RegisteredUser,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Revoked {
    pub revoked: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl From<RefreshToken> for Session {
    fn from(grant: RefreshToken) -> Self {
        Self { device_id: grant.device_id.to_string(), created_at: grant.created_at, expires_at: grant.expires_at }
    }
}

#[derive(Debug, Serialize)]
pub struct Me {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
    pub jti: Uuid,
}

impl From<AuthUser> for Me {
    fn from(user: AuthUser) -> Self {
        Self { id: user.id, name: user.name, email: user.email, role: user.role, jti: user.jti }
    }
}
