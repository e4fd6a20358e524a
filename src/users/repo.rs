use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::password::HashedPassword;
use crate::users::repo_types::{StoreError, User};

/// Persistence for user records.
///
/// Every mutation is atomic: it either fully applies or leaves the store
/// untouched.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users in creation order.
    async fn list(&self) -> Result<Vec<User>, StoreError>;

    async fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &HashedPassword,
    ) -> Result<User, StoreError>;

    async fn get(&self, id: i64) -> Result<User, StoreError>;

    async fn update(
        &self,
        id: i64,
        name: &str,
        email: &str,
        password_hash: &HashedPassword,
    ) -> Result<User, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Releases connections at shutdown.
    async fn close(&self) {}
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash
            FROM users
            ORDER BY id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &HashedPassword,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(password_hash.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(StoreError::from_write)
    }

    async fn get(&self, id: i64) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        id: i64,
        name: &str,
        email: &str,
        password_hash: &HashedPassword,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET name = $2, email = $3, password_hash = $4
             WHERE id = $1
            RETURNING id, name, email, password_hash
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(password_hash.as_str())
        .fetch_optional(&self.db)
        .await
        .map_err(StoreError::from_write)?
        .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
