//! Storage seams used by the auth services.
//!
//! Concrete backends live under [`crate::adapters`]; the services only ever see these traits,
//! handed to them at startup through [`Repositories`].

use crate::domain::auth::{RefreshToken, UsedRefreshToken};
use crate::domain::user::{NewUser, User};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync + std::fmt::Debug {
    /// Persists a user.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if the email is already registered.
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Looks a user up by email, ignoring case.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Active refresh grants. Holds at most one grant per `(user_id, device_id)`.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync + std::fmt::Debug {
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Stores `token`, atomically replacing any grant for the same user and device.
    async fn upsert_for_device(&self, token: &RefreshToken) -> Result<()>;

    /// Deletes the grant identified by `old_hash` and stores `replacement` as one unit.
    ///
    /// Returns `false`, leaving storage untouched, when `old_hash` no longer exists.
    async fn rotate(&self, old_hash: &str, replacement: &RefreshToken) -> Result<bool>;

    /// Returns whether a grant was deleted.
    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool>;

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<RefreshToken>>;

    async fn delete_expired(&self) -> Result<u64>;
}

/// Append-only ledger of refresh tokens that have been exchanged.
#[async_trait]
pub trait UsedTokenRepository: Send + Sync + std::fmt::Debug {
    /// Records a consumed token. Recording the same token twice is a no-op.
    async fn record(&self, used: &UsedRefreshToken) -> Result<()>;

    /// Finds an unexpired ledger entry.
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<UsedRefreshToken>>;

    /// Drops entries whose copied grant expiry has passed.
    async fn purge_expired(&self) -> Result<u64>;
}

#[derive(Clone, Debug)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub used_tokens: Arc<dyn UsedTokenRepository>,
}

impl Repositories {
    #[must_use]
    pub fn memory() -> Self {
        use crate::adapters::memory::{MemoryRefreshTokenRepository, MemoryUsedTokenRepository, MemoryUserRepository};

        Self {
            users: Arc::new(MemoryUserRepository::new()),
            refresh_tokens: Arc::new(MemoryRefreshTokenRepository::new()),
            used_tokens: Arc::new(MemoryUsedTokenRepository::new()),
        }
    }

    #[must_use]
    pub fn postgres(pool: crate::adapters::database::DbPool) -> Self {
        use crate::adapters::database::{PgRefreshTokenRepository, PgUsedTokenRepository, PgUserRepository};

        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            refresh_tokens: Arc::new(PgRefreshTokenRepository::new(pool.clone())),
            used_tokens: Arc::new(PgUsedTokenRepository::new(pool)),
        }
    }
}
