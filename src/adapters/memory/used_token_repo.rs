use crate::domain::auth::UsedRefreshToken;
use crate::error::Result;
use crate::repository::UsedTokenRepository;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryUsedTokenRepository {
    entries: DashMap<String, UsedRefreshToken>,
}

impl MemoryUsedTokenRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsedTokenRepository for MemoryUsedTokenRepository {
    async fn record(&self, used: &UsedRefreshToken) -> Result<()> {
        self.entries.entry(used.token_hash.clone()).or_insert_with(|| used.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<UsedRefreshToken>> {
        Ok(self.entries.get(token_hash).map(|entry| entry.value().clone()).filter(|used| !used.is_expired()))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|_, used| !used.is_expired());
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::hash_token;
    use crate::domain::device::derive_device_id;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn used(raw: &str, ttl: Duration) -> UsedRefreshToken {
        let now = OffsetDateTime::now_utc();
        UsedRefreshToken {
            user_id: Uuid::new_v4(),
            token_hash: hash_token(raw),
            device_id: derive_device_id(Some("ua")),
            used_at: now,
            expires_at: now + ttl,
        }
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let repo = MemoryUsedTokenRepository::new();
        let first = used("t", Duration::days(1));
        let mut second = first.clone();
        second.user_id = Uuid::new_v4();

        repo.record(&first).await.unwrap();
        repo.record(&second).await.unwrap();

        let found = repo.find_by_hash(&first.token_hash).await.unwrap().unwrap();
        assert_eq!(found.user_id, first.user_id);
    }

    #[tokio::test]
    async fn test_expired_entries_are_hidden_and_purged() {
        let repo = MemoryUsedTokenRepository::new();
        repo.record(&used("old", -Duration::minutes(1))).await.unwrap();
        repo.record(&used("live", Duration::days(1))).await.unwrap();

        assert!(repo.find_by_hash(&hash_token("old")).await.unwrap().is_none());
        assert_eq!(repo.purge_expired().await.unwrap(), 1);
        assert!(repo.find_by_hash(&hash_token("live")).await.unwrap().is_some());
    }
}
