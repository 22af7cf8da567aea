use crate::adapters::database::DbPool;
use crate::adapters::database::records::RefreshTokenRecord;
use crate::domain::auth::RefreshToken;
use crate::error::Result;
use crate::repository::RefreshTokenRepository;
use async_trait::async_trait;
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgRefreshTokenRepository {
    pool: DbPool,
}

impl PgRefreshTokenRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Relies on the `(user_id, device_id)` unique index to replace the device's previous grant.
    async fn upsert(conn: &mut PgConnection, token: &RefreshToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, device_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, device_id) DO UPDATE
            SET id = EXCLUDED.id,
                token_hash = EXCLUDED.token_hash,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.device_id.as_str())
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    #[tracing::instrument(level = "debug", skip(self, token_hash), err)]
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token_hash, device_id, expires_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self, token), fields(user_id = %token.user_id), err)]
    async fn upsert_for_device(&self, token: &RefreshToken) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert(&mut conn, token).await
    }

    #[tracing::instrument(level = "debug", skip(self, old_hash, replacement), fields(user_id = %replacement.user_id), err)]
    async fn rotate(&self, old_hash: &str, replacement: &RefreshToken) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(old_hash)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::upsert(&mut tx, replacement).await?;
        tx.commit().await?;

        Ok(true)
    }

    #[tracing::instrument(level = "debug", skip(self, token_hash), err)]
    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1").bind(user_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let records = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token_hash, device_id, expires_at, created_at
            FROM refresh_tokens
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    /// Deletes all expired refresh tokens.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the deletion fails.
    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
