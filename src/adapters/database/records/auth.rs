use crate::domain::auth::{RefreshToken, UsedRefreshToken};
use crate::domain::device::DeviceId;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_id: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl From<RefreshTokenRecord> for RefreshToken {
    fn from(record: RefreshTokenRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            token_hash: record.token_hash,
            device_id: DeviceId::from_stored(record.device_id),
            expires_at: record.expires_at,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct UsedRefreshTokenRecord {
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_id: String,
    pub used_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl From<UsedRefreshTokenRecord> for UsedRefreshToken {
    fn from(record: UsedRefreshTokenRecord) -> Self {
        Self {
            user_id: record.user_id,
            token_hash: record.token_hash,
            device_id: DeviceId::from_stored(record.device_id),
            used_at: record.used_at,
            expires_at: record.expires_at,
        }
    }
}
