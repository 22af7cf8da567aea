use crate::domain::auth::RefreshToken;
use crate::domain::device::DeviceId;
use crate::error::{AppError, Result};
use crate::repository::RefreshTokenRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Grants {
    by_device: HashMap<(Uuid, DeviceId), RefreshToken>,
    by_hash: HashMap<String, (Uuid, DeviceId)>,
}

impl Grants {
    fn upsert(&mut self, token: &RefreshToken) {
        let key = (token.user_id, token.device_id.clone());
        if let Some(previous) = self.by_device.insert(key.clone(), token.clone()) {
            self.by_hash.remove(&previous.token_hash);
        }
        self.by_hash.insert(token.token_hash.clone(), key);
    }

    fn remove_hash(&mut self, token_hash: &str) -> bool {
        match self.by_hash.remove(token_hash) {
            Some(key) => self.by_device.remove(&key).is_some(),
            None => false,
        }
    }
}

/// Both indexes sit behind one lock so every operation is atomic.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenRepository {
    grants: Mutex<Grants>,
}

impl MemoryRefreshTokenRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Grants>> {
        self.grants.lock().map_err(|_| AppError::Storage("refresh token store lock poisoned".into()))
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshTokenRepository {
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let grants = self.lock()?;
        Ok(grants.by_hash.get(token_hash).and_then(|key| grants.by_device.get(key)).cloned())
    }

    async fn upsert_for_device(&self, token: &RefreshToken) -> Result<()> {
        self.lock()?.upsert(token);
        Ok(())
    }

    async fn rotate(&self, old_hash: &str, replacement: &RefreshToken) -> Result<bool> {
        let mut grants = self.lock()?;
        if !grants.remove_hash(old_hash) {
            return Ok(false);
        }
        grants.upsert(replacement);
        Ok(true)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool> {
        Ok(self.lock()?.remove_hash(token_hash))
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut grants = self.lock()?;
        let doomed: Vec<String> = grants
            .by_device
            .values()
            .filter(|token| token.user_id == user_id)
            .map(|token| token.token_hash.clone())
            .collect();

        for hash in &doomed {
            grants.remove_hash(hash);
        }
        Ok(doomed.len() as u64)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let grants = self.lock()?;
        let mut tokens: Vec<RefreshToken> =
            grants.by_device.values().filter(|token| token.user_id == user_id).cloned().collect();
        tokens.sort_by_key(|token| token.created_at);
        Ok(tokens)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let mut grants = self.lock()?;
        let expired: Vec<String> =
            grants.by_device.values().filter(|token| token.is_expired()).map(|token| token.token_hash.clone()).collect();

        for hash in &expired {
            grants.remove_hash(hash);
        }
        Ok(expired.len() as u64)
    }
}
