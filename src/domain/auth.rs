use crate::domain::device::DeviceId;
use crate::domain::user::Role;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// An active refresh grant. Only the SHA-256 of the raw token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_id: DeviceId,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl RefreshToken {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    /// The ledger entry recording that this grant has been spent.
    #[must_use]
    pub fn consumed(&self) -> UsedRefreshToken {
        UsedRefreshToken {
            user_id: self.user_id,
            token_hash: self.token_hash.clone(),
            device_id: self.device_id.clone(),
            used_at: OffsetDateTime::now_utc(),
            expires_at: self.expires_at,
        }
    }
}

/// A refresh token that has already been exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_id: DeviceId,
    pub used_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl UsedRefreshToken {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: Uuid, role: Role, ttl_secs: u64) -> Self {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Self { sub: user_id, jti: Uuid::new_v4(), role, iat, exp: iat.saturating_add(ttl) }
    }
}

/// Hashes a raw refresh token for storage and lookup.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
