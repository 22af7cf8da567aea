use crate::domain::user::{NewUser, User, normalize_email};
use crate::error::{AppError, Result};
use crate::repository::UserRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: DashMap<Uuid, User>,
    emails: DashMap<String, Uuid>,
}

impl MemoryUserRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a user, leaving any grants they hold dangling.
    #[cfg(test)]
    pub(crate) fn remove(&self, id: Uuid) -> Option<User> {
        let (_, user) = self.users.remove(&id)?;
        self.emails.remove(&user.email);
        Some(user)
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, new_user: NewUser) -> Result<User> {
        let email = normalize_email(&new_user.email);

        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => Err(AppError::BadRequest("Email is already registered".into())),
            Entry::Vacant(slot) => {
                let user = User {
                    id: Uuid::new_v4(),
                    email,
                    name: new_user.name,
                    password_hash: new_user.password_hash,
                    role: new_user.role,
                    created_at: OffsetDateTime::now_utc(),
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let Some(id) = self.emails.get(&normalize_email(email)).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }
}
