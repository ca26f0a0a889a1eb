//! Token to user resolution against the account service's tables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::user::User;

/// Resolves a presented credential to a user.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// `None` when the token is unknown or expired.
    async fn resolve(&self, token: &str) -> Result<Option<User>>;
}

/// Tokens stored in the `auth_tokens` table.
#[derive(Debug, Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Issue a random token for `user_id`, optionally expiring after `ttl`.
    ///
    /// Tokens normally come from the account service; this is for seeding.
    pub async fn issue(&self, user_id: &str, ttl: Option<Duration>) -> Result<String> {
        let bytes: [u8; 32] = rand::random();
        let token = hex::encode(bytes);
        let expires_at = ttl
            .map(|ttl| {
                Utc::now()
                    .checked_add_signed(ttl)
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .context("token expiry out of range")
            })
            .transpose()?;

        sqlx::query("INSERT INTO auth_tokens (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user_id)
            .bind(&expires_at)
            .execute(&self.pool)
            .await
            .context("inserting auth token")?;

        Ok(token)
    }
}

#[async_trait]
impl CredentialResolver for TokenStore {
    async fn resolve(&self, token: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.is_admin, u.container, u.created_at
            FROM auth_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token = ?
              AND (t.expires_at IS NULL OR datetime(t.expires_at) > datetime('now'))
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("resolving auth token")?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::user::{NewUser, UserRepository};

    #[tokio::test]
    async fn resolves_live_tokens_only() {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.pool().clone());
        let store = TokenStore::new(db.pool().clone());
        let alice = users.create(NewUser::new("alice")).await.unwrap();

        let forever = store.issue(&alice.id, None).await.unwrap();
        let hour = store.issue(&alice.id, Some(Duration::hours(1))).await.unwrap();
        let expired = store
            .issue(&alice.id, Some(Duration::hours(-1)))
            .await
            .unwrap();

        assert_eq!(
            store.resolve(&forever).await.unwrap().map(|u| u.id),
            Some(alice.id.clone())
        );
        assert!(store.resolve(&hour).await.unwrap().is_some());
        assert!(store.resolve(&expired).await.unwrap().is_none());
        assert!(store.resolve("bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrepresentable_expiry_is_an_error() {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.pool().clone());
        let store = TokenStore::new(db.pool().clone());
        let alice = users.create(NewUser::new("alice")).await.unwrap();

        let err = store
            .issue(&alice.id, Some(Duration::days(365 * 1_000_000)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn accepts_sqlite_style_expiry() {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.pool().clone());
        let store = TokenStore::new(db.pool().clone());
        let bob = users.create(NewUser::new("bob")).await.unwrap();

        sqlx::query(
            "INSERT INTO auth_tokens (token, user_id, expires_at) VALUES ('t1', ?, datetime('now', '+1 day'))",
        )
        .bind(&bob.id)
        .execute(db.pool())
        .await
        .unwrap();

        assert!(store.resolve("t1").await.unwrap().is_some());
    }
}
