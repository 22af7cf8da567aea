use crate::domain::user::User;
use crate::error::AppError;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRecord> for User {
    type Error = AppError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            email: record.email,
            name: record.name,
            password_hash: record.password_hash,
            role: record.role.parse().map_err(AppError::Storage)?,
            created_at: record.created_at,
        })
    }
}
