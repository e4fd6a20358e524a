use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::auth::password::HashedPassword;
use crate::users::repo::UserStore;
use crate::users::repo_types::{StoreError, User};

/// Process-local store, selected with `DATABASE_URL=memory://`.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    last_id: i64,
    rows: BTreeMap<i64, User>,
}

impl Inner {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.rows
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn list(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &HashedPassword,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.email_taken(email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.last_id += 1;
        let user = User {
            id: inner.last_id,
            name: name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.as_str().to_string(),
        };
        inner.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: i64) -> Result<User, StoreError> {
        self.inner
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        id: i64,
        name: &str,
        email: &str,
        password_hash: &HashedPassword,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.rows.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        if inner.email_taken(email, Some(id)) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = inner.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        user.name = name.to_string();
        user.email = email.to_string();
        user.password_hash = password_hash.as_str().to_string();
        Ok(user.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
