//! User repository for database operations.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::models::{NewUser, User};

/// Repository for user database operations.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new user repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user row.
    ///
    /// Accounts belong to the account service; this exists for seeding.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn create(&self, request: NewUser) -> Result<User> {
        let id = uuid::Uuid::new_v4().to_string();

        debug!("Creating user: {} ({})", request.username, id);

        sqlx::query(
            r#"
            INSERT INTO users (id, username, is_admin, container)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&request.username)
        .bind(request.is_admin)
        .bind(&request.container)
        .execute(&self.pool)
        .await
        .context("Failed to insert user")?;

        self.get(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found after creation"))
    }

    /// Get a user by ID.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, is_admin, container, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        Ok(user)
    }

    /// Get a user by username, ignoring case.
    #[instrument(skip(self))]
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, is_admin, container, created_at
            FROM users
            WHERE LOWER(username) = LOWER(?)
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by username")?;

        Ok(user)
    }

    /// Container owned by the user with this username, ignoring case.
    pub async fn find_container_by_username(&self, username: &str) -> Result<Option<String>> {
        let container: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT container
            FROM users
            WHERE LOWER(username) = LOWER(?)
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up container by username")?;

        Ok(container.and_then(|(c,)| c))
    }

    /// The user owning `container`.
    #[instrument(skip(self))]
    pub async fn get_by_container(&self, container: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, is_admin, container, created_at
            FROM users
            WHERE container = ?
            "#,
        )
        .bind(container)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by container")?;

        Ok(user)
    }

    /// Set or clear the user's container reference.
    #[instrument(skip(self))]
    pub async fn set_container(&self, id: &str, container: Option<&str>) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET container = ? WHERE id = ?")
            .bind(container)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update container reference")?;

        Ok(result.rows_affected() > 0)
    }
}
