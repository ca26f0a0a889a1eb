//! Session database repository.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::Session;

/// Repository for session persistence.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a session row.
    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, name, backing_session, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.name)
        .bind(&session.backing_session)
        .bind(&session.created_at)
        .execute(&self.pool)
        .await
        .context("creating session")?;

        Ok(())
    }

    /// Get a session by ID regardless of owner.
    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, name, backing_session, created_at
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching session")?;

        Ok(session)
    }

    /// Get a session by ID only if `user_id` owns it.
    pub async fn get_for_user(&self, id: &str, user_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, name, backing_session, created_at
            FROM sessions
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching session for user")?;

        Ok(session)
    }

    /// All sessions of a user, oldest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, name, backing_session, created_at
            FROM sessions
            WHERE user_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("listing sessions")?;

        Ok(sessions)
    }

    pub async fn count_for_user(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("counting sessions")?;

        Ok(count)
    }

    /// Rename a session owned by `user_id`. Returns false when no row matched.
    pub async fn rename(&self, id: &str, user_id: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET name = ? WHERE id = ? AND user_id = ?")
            .bind(name)
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("renaming session")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a session row. Returns false when it was already gone.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every session row of a user.
    pub async fn delete_for_user(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("deleting sessions for user")?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::user::{NewUser, UserRepository};

    async fn setup() -> (SessionRepository, String, String) {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.pool().clone());
        let alice = users.create(NewUser::new("alice")).await.unwrap();
        let bob = users.create(NewUser::new("bob")).await.unwrap();
        (SessionRepository::new(db.pool().clone()), alice.id, bob.id)
    }

    fn session(id: &str, user_id: &str, created_at: &str) -> Session {
        Session {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name: format!("name-{}", id),
            backing_session: format!("sess{}", id),
            created_at: created_at.to_string(),
        }
    }

    #[tokio::test]
    async fn lists_only_own_sessions_in_creation_order() {
        let (repo, alice, bob) = setup().await;
        repo.create(&session("s2", &alice, "2026-01-02T00:00:00Z"))
            .await
            .unwrap();
        repo.create(&session("s1", &alice, "2026-01-01T00:00:00Z"))
            .await
            .unwrap();
        repo.create(&session("s3", &bob, "2026-01-01T00:00:00Z"))
            .await
            .unwrap();

        let ids: Vec<String> = repo
            .list_for_user(&alice)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();

        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(repo.count_for_user(&bob).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rename_is_scoped_to_owner() {
        let (repo, alice, bob) = setup().await;
        repo.create(&session("s1", &alice, "2026-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(!repo.rename("s1", &bob, "mine").await.unwrap());
        assert!(repo.rename("s1", &alice, "build").await.unwrap());
        assert_eq!(repo.get("s1").await.unwrap().unwrap().name, "build");
        assert!(repo.get_for_user("s1", &bob).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (repo, alice, _) = setup().await;
        repo.create(&session("s1", &alice, "2026-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(
            repo.create(&session("s1", &alice, "2026-01-01T00:00:00Z"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn sessions_cascade_with_user() {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.pool().clone());
        let repo = SessionRepository::new(db.pool().clone());
        let alice = users.create(NewUser::new("alice")).await.unwrap();
        repo.create(&session("s1", &alice.id, "2026-01-01T00:00:00Z"))
            .await
            .unwrap();

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&alice.id)
            .execute(db.pool())
            .await
            .unwrap();

        assert!(repo.get("s1").await.unwrap().is_none());
    }
}
