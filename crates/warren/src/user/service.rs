//! Tenant container lifecycle.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use super::UserRepository;
use crate::container::{
    ContainerEngine, ContainerError, ContainerIdentity, IpCache, RuntimeState, validate_name,
};
use crate::session::{SessionError, SessionRegistry};

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already owns container {0}")]
    AlreadyProvisioned(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// How tenant containers are named and what they are built from.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    /// Template container or image reference.
    pub template: String,
    /// Prefix joined with the username to form the container name.
    pub name_prefix: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            template: "warren-template".to_string(),
            name_prefix: "warren-".to_string(),
        }
    }
}

/// Provisions and releases the container owned by a user.
pub struct TenantService {
    engine: Arc<dyn ContainerEngine>,
    users: UserRepository,
    registry: Arc<SessionRegistry>,
    ip_cache: Arc<IpCache>,
    config: TenantConfig,
}

impl TenantService {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        users: UserRepository,
        registry: Arc<SessionRegistry>,
        ip_cache: Arc<IpCache>,
        config: TenantConfig,
    ) -> Self {
        Self {
            engine,
            users,
            registry,
            ip_cache,
            config,
        }
    }

    /// Container name for a username: prefix plus the lowercased username,
    /// with anything outside `[a-z0-9-]` replaced by `-`.
    pub fn container_name(&self, username: &str) -> String {
        let slug: String = username
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '-' => c,
                _ => '-',
            })
            .collect();
        format!("{}{}", self.config.name_prefix, slug.trim_matches('-'))
    }

    /// Create the user's container from the template and record it.
    #[instrument(skip(self))]
    pub async fn provision(&self, user_id: &str) -> Result<ContainerIdentity, TenantError> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| TenantError::UserNotFound(user_id.to_string()))?;

        if let Some(existing) = user.container() {
            let status = self.engine.status(existing).await?;
            if status.state != RuntimeState::Absent {
                return Err(TenantError::AlreadyProvisioned(existing.to_string()));
            }
            warn!(
                "Container {} recorded for {} no longer exists; provisioning a new one",
                existing, user.username
            );
        }

        let name = self.container_name(&user.username);
        validate_name(&name)?;

        let identity = self.engine.create(&name, &self.config.template).await?;

        if let Err(e) = self.users.set_container(&user.id, Some(&name)).await {
            warn!("Failed to record container {} for {}: {:#}", name, user.id, e);
            self.engine.delete(&name).await;
            return Err(TenantError::Storage(e));
        }

        info!("Provisioned container {} for {}", name, user.username);
        Ok(identity)
    }

    /// Kill the user's sessions, delete the container and clear the reference.
    ///
    /// Returns the released container name, if the user had one.
    #[instrument(skip(self))]
    pub async fn release(&self, user_id: &str) -> Result<Option<String>, TenantError> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| TenantError::UserNotFound(user_id.to_string()))?;
        let container = user.container.clone();

        let removed = self
            .registry
            .purge_user(&user.id, container.as_deref())
            .await?;

        if let Some(name) = container.as_deref() {
            self.engine.delete(name).await;
            self.ip_cache.invalidate(name);
            self.users.set_container(&user.id, None).await?;
            info!(
                "Released container {} of {} ({} sessions removed)",
                name, user.username, removed
            );
        }

        Ok(container)
    }
}

impl std::fmt::Debug for TenantService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantService")
            .field("config", &self.config)
            .finish()
    }
}
