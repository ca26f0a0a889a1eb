//! Container runtime management module.
//!
//! Provides an async capability interface over the container engine. The
//! production implementation drives LXD through the `lxc` CLI; an in-memory
//! fake with scripted state backs the orchestration tests.

mod error;
pub mod fake;
pub mod ip_cache;
mod lxc;
mod models;

pub use error::{ContainerError, ContainerResult};
pub use fake::FakeEngine;
pub use ip_cache::IpCache;
pub use lxc::{LxcConfig, LxcEngine, TemplateKind};
pub use models::{
    ContainerIdentity, ContainerStatus, ExecOutput, Readiness, RuntimeState, is_template_name,
};

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

/// Maximum length of a container or in-container session name.
const MAX_NAME_LEN: usize = 63;

/// Validate a container or in-container session name before it reaches the CLI.
pub fn validate_name(name: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidInput(
            "name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ContainerError::InvalidInput(format!(
            "name '{}' exceeds maximum length",
            name
        )));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Container engine abstraction.
///
/// Every method is safe to call concurrently. Implementations must never let
/// `delete` fail: cleanup is best-effort and must not block tenant removal.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Provision `name` from `template`, start it and wait until it has an address.
    async fn create(&self, name: &str, template: &str) -> ContainerResult<ContainerIdentity>;

    /// Start a stopped container.
    async fn start(&self, name: &str) -> ContainerResult<()>;

    /// Stop and delete a container. Absent containers count as success.
    async fn delete(&self, name: &str);

    /// Run a command inside the container and wait for it.
    async fn exec(
        &self,
        name: &str,
        command: &[&str],
        timeout: Duration,
    ) -> ContainerResult<ExecOutput>;

    /// Current state and address of a container.
    async fn status(&self, name: &str) -> ContainerResult<ContainerStatus>;

    /// All managed containers except those matching `exclude`.
    async fn list(
        &self,
        exclude: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> ContainerResult<Vec<ContainerIdentity>>;

    /// Polling policy used while waiting for containers to come up.
    fn readiness(&self) -> Readiness;

    /// Make sure a container is running, starting it when stopped.
    ///
    /// A container started here is waited on until it has an address, the
    /// same readiness `create` requires.
    async fn ensure_running(&self, name: &str) -> ContainerResult<ContainerStatus> {
        let status = self.status(name).await?;
        match status.state {
            RuntimeState::Running => Ok(status),
            RuntimeState::Absent => Err(ContainerError::NotFound(name.to_string())),
            RuntimeState::Stopped => {
                info!("Starting container {}", name);
                self.start(name).await?;
                wait_for_network(self, name).await
            }
        }
    }
}

/// Poll until the container is running with an IPv4 address on its primary interface.
pub async fn wait_for_network<E>(engine: &E, name: &str) -> ContainerResult<ContainerStatus>
where
    E: ContainerEngine + ?Sized,
{
    wait_until(engine, name, |status| {
        status.is_running() && status.address.is_some()
    })
    .await
    .map_err(|message| ContainerError::ProvisionFailed {
        name: name.to_string(),
        message,
    })
}

/// Like [`wait_for_network`], returning just the address.
pub async fn wait_for_address<E>(engine: &E, name: &str) -> ContainerResult<Ipv4Addr>
where
    E: ContainerEngine + ?Sized,
{
    wait_for_network(engine, name)
        .await?
        .address
        .ok_or_else(|| ContainerError::ProvisionFailed {
            name: name.to_string(),
            message: "no address after readiness check".to_string(),
        })
}

async fn wait_until<E, F>(engine: &E, name: &str, ready: F) -> Result<ContainerStatus, String>
where
    E: ContainerEngine + ?Sized,
    F: Fn(&ContainerStatus) -> bool,
{
    let policy = engine.readiness();
    let start = tokio::time::Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let last = match engine.status(name).await {
            Ok(status) if ready(&status) => return Ok(status),
            Ok(status) => format!("state {}", status.state),
            Err(err) => err.to_string(),
        };

        if start.elapsed() >= policy.timeout {
            return Err(format!(
                "not ready after {} attempts over {:?} ({})",
                attempts, policy.timeout, last
            ));
        }

        debug!(
            "Container {} not ready yet (attempt {}): {}; retrying in {:?}",
            name, attempts, last, policy.interval
        );
        tokio::time::sleep(policy.interval).await;
    }
}
