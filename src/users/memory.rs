use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::users::{
    repo::UserStore,
    repo_types::{NewUser, User, UserPatch},
};

/// In-memory [`UserStore`] for tests and local runs without Postgres.
#[derive(Debug, Default, Clone)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, new: NewUser) -> AppResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new.email) {
            return Err(AppError::DuplicateEmail);
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            reset_token_hash: None,
            reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn search(&self, query: &str, limit: i64, offset: i64) -> AppResult<Vec<User>> {
        let needle = query.to_lowercase();
        let users = self.users.read().await;
        let mut found: Vec<User> = users
            .values()
            .filter(|u| {
                u.name.to_lowercase().contains(&needle) || u.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> AppResult<Option<User>> {
        let mut users = self.users.write().await;
        if !users.contains_key(&id) {
            return Ok(None);
        }
        if let Some(email) = patch.email.as_deref() {
            if users.values().any(|u| u.id != id && u.email == email) {
                return Err(AppError::DuplicateEmail);
            }
        }
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.users.write().await.remove(&id).is_some())
    }

    async fn set_reset_token(
        &self,
        email: &str,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<bool> {
        let mut users = self.users.write().await;
        match users.values_mut().find(|u| u.email == email) {
            Some(user) => {
                user.reset_token_hash = Some(token_hash.to_string());
                user.reset_token_expires_at = Some(expires_at);
                user.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> AppResult<bool> {
        let mut users = self.users.write().await;
        let user = users.values_mut().find(|u| {
            u.reset_token_hash.as_deref() == Some(token_hash)
                && u.reset_token_expires_at.is_some_and(|exp| exp > now)
        });
        match user {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.reset_token_hash = None;
                user.reset_token_expires_at = None;
                user.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
