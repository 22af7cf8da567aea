use crate::adapters::database::DbPool;
use crate::adapters::database::records::UserRecord;
use crate::domain::user::{NewUser, User, normalize_email};
use crate::error::{AppError, Result};
use crate::repository::UserRepository;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[tracing::instrument(level = "debug", skip(self, user), err)]
    async fn create(&self, user: NewUser) -> Result<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, email, name, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, name, password_hash, role, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(normalize_email(&user.email))
        .bind(user.name)
        .bind(user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::BadRequest("Email is already registered".into())
            }
            other => AppError::Database(other),
        })?;

        record.try_into()
    }

    #[tracing::instrument(level = "debug", skip(self, email), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, name, password_hash, role, created_at
            FROM users
            WHERE LOWER(email) = $1
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        record.map(User::try_from).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, name, password_hash, role, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(User::try_from).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
