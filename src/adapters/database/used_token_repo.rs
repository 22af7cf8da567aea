use crate::adapters::database::DbPool;
use crate::adapters::database::records::UsedRefreshTokenRecord;
use crate::domain::auth::UsedRefreshToken;
use crate::error::Result;
use crate::repository::UsedTokenRepository;
use async_trait::async_trait;

#[derive(Clone, Debug)]
pub struct PgUsedTokenRepository {
    pool: DbPool,
}

impl PgUsedTokenRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsedTokenRepository for PgUsedTokenRepository {
    #[tracing::instrument(level = "debug", skip(self, used), fields(user_id = %used.user_id), err)]
    async fn record(&self, used: &UsedRefreshToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO used_refresh_tokens (token_hash, user_id, device_id, used_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(&used.token_hash)
        .bind(used.user_id)
        .bind(used.device_id.as_str())
        .bind(used.used_at)
        .bind(used.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, token_hash), err)]
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<UsedRefreshToken>> {
        let record = sqlx::query_as::<_, UsedRefreshTokenRecord>(
            r#"
            SELECT user_id, token_hash, device_id, used_at, expires_at
            FROM used_refresh_tokens
            WHERE token_hash = $1 AND expires_at > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn purge_expired(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM used_refresh_tokens WHERE expires_at <= NOW()").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
