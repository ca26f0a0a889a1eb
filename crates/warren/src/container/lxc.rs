//! LXD engine driven through the `lxc` command line client.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Semaphore;

use super::{
    ContainerEngine, ContainerError, ContainerIdentity, ContainerResult, ContainerStatus,
    ExecOutput, Readiness, RuntimeState, validate_name, wait_for_address,
};

/// What a tenant container is provisioned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// An existing stopped container, cloned with `lxc copy` and then started.
    #[default]
    Container,
    /// An image alias or fingerprint, instantiated with `lxc launch`.
    Image,
}

/// Settings for [`LxcEngine`].
#[derive(Debug, Clone)]
pub struct LxcConfig {
    /// Path to the `lxc` binary.
    pub binary: String,
    /// Interface whose first IPv4 address is the container address.
    pub primary_interface: String,
    pub template_kind: TemplateKind,
    pub readiness: Readiness,
    /// Deadline for engine commands other than `exec`.
    pub command_timeout: Duration,
    pub max_concurrent_commands: usize,
}

impl Default for LxcConfig {
    fn default() -> Self {
        Self {
            binary: "lxc".to_string(),
            primary_interface: "eth0".to_string(),
            template_kind: TemplateKind::default(),
            readiness: Readiness::default(),
            command_timeout: Duration::from_secs(120),
            max_concurrent_commands: 8,
        }
    }
}

/// Why an `lxc` invocation produced no output.
#[derive(Debug)]
enum CommandError {
    Spawn(std::io::Error),
    TimedOut,
}

/// Container engine backed by LXD.
#[derive(Debug, Clone)]
pub struct LxcEngine {
    config: LxcConfig,
    permits: Arc<Semaphore>,
}

impl LxcEngine {
    pub fn new(config: LxcConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_commands.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &LxcConfig {
        &self.config
    }

    /// Run one `lxc` command, bounded by the command semaphore and `timeout`.
    ///
    /// The child is killed when the deadline elapses or the caller is dropped.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, CommandError> {
        let _permit = self.permits.acquire().await.ok();

        let child = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(CommandError::Spawn(e)),
            Err(_) => Err(CommandError::TimedOut),
        }
    }

    /// Run a management command and require it to succeed.
    async fn run_checked(&self, command: &str, args: &[&str]) -> ContainerResult<Output> {
        let output = self
            .run(args, self.config.command_timeout)
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: match e {
                    CommandError::Spawn(e) => e.to_string(),
                    CommandError::TimedOut => {
                        format!("timed out after {:?}", self.config.command_timeout)
                    }
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(output)
    }

    async fn list_instances(&self, filter: Option<&str>) -> ContainerResult<Vec<LxcInstance>> {
        let mut args = vec!["list"];
        if let Some(filter) = filter {
            args.push(filter);
        }
        args.extend(["--format", "json"]);

        let output = self.run_checked("list", &args).await?;
        parse_instances(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ContainerEngine for LxcEngine {
    async fn create(&self, name: &str, template: &str) -> ContainerResult<ContainerIdentity> {
        validate_name(name)?;
        validate_template(template)?;

        info!(
            "Provisioning container {} from {} ({:?})",
            name, template, self.config.template_kind
        );

        let provision = match self.config.template_kind {
            TemplateKind::Container => self
                .run_checked("copy", &["copy", template, name])
                .await
                .map(|_| true),
            TemplateKind::Image => self
                .run_checked("launch", &["launch", template, name])
                .await
                .map(|_| false),
        };

        let needs_start = provision.map_err(|e| ContainerError::ProvisionFailed {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        if needs_start {
            self.start(name)
                .await
                .map_err(|e| ContainerError::ProvisionFailed {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
        }

        let address = wait_for_address(self, name).await?;
        info!("Container {} is up at {}", name, address);

        Ok(ContainerIdentity {
            name: name.to_string(),
            state: RuntimeState::Running,
            address: Some(address),
        })
    }

    async fn start(&self, name: &str) -> ContainerResult<()> {
        validate_name(name)?;
        self.run_checked("start", &["start", name]).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) {
        if let Err(e) = validate_name(name) {
            warn!("Refusing to delete container {:?}: {}", name, e);
            return;
        }

        if let Err(e) = self.run_checked("stop", &["stop", name, "--force"]).await {
            debug!("Stopping container {} before delete: {}", name, e);
        }

        match self.run_checked("delete", &["delete", name]).await {
            Ok(_) => info!("Deleted container {}", name),
            Err(e) => match self.status(name).await {
                Ok(status) if status.state == RuntimeState::Absent => {
                    debug!("Container {} already absent", name);
                }
                _ => warn!("Failed to delete container {}: {}", name, e),
            },
        }
    }

    async fn exec(
        &self,
        name: &str,
        command: &[&str],
        timeout: Duration,
    ) -> ContainerResult<ExecOutput> {
        validate_name(name)?;

        let mut args = vec!["exec", name, "--"];
        args.extend(command);

        let output = match self.run(&args, timeout).await {
            Ok(output) => output,
            Err(CommandError::TimedOut) => {
                return Err(ContainerError::ExecTimeout {
                    container: name.to_string(),
                    timeout,
                });
            }
            Err(CommandError::Spawn(e)) => return Err(ContainerError::Io(e)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ContainerError::ExecFailed {
                container: name.to_string(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ExecOutput { stdout, stderr })
    }

    async fn status(&self, name: &str) -> ContainerResult<ContainerStatus> {
        validate_name(name)?;

        // The CLI filter is a prefix match, so pick the exact entry.
        let instances = self.list_instances(Some(name)).await?;
        Ok(instances
            .iter()
            .find(|instance| instance.name == name)
            .map(|instance| instance.status(&self.config.primary_interface))
            .unwrap_or_else(ContainerStatus::absent))
    }

    async fn list(
        &self,
        exclude: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> ContainerResult<Vec<ContainerIdentity>> {
        let instances = self.list_instances(None).await?;
        Ok(instances
            .iter()
            .filter(|instance| !exclude(instance.name.as_str()))
            .map(|instance| {
                let status = instance.status(&self.config.primary_interface);
                ContainerIdentity {
                    name: instance.name.clone(),
                    state: status.state,
                    address: status.address,
                }
            })
            .collect())
    }

    fn readiness(&self) -> Readiness {
        self.config.readiness
    }
}

/// Template references may name remote images (`images:debian/12`).
fn validate_template(template: &str) -> ContainerResult<()> {
    let valid_chars =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/');
    if template.is_empty() || template.len() > 255 || !template.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "invalid template reference '{}'",
            template
        )));
    }
    Ok(())
}

/// One entry of `lxc list --format json`.
#[derive(Debug, Deserialize)]
struct LxcInstance {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    state: Option<LxcInstanceState>,
}

#[derive(Debug, Deserialize)]
struct LxcInstanceState {
    #[serde(default)]
    network: Option<HashMap<String, LxcNetwork>>,
}

#[derive(Debug, Deserialize)]
struct LxcNetwork {
    #[serde(default)]
    addresses: Vec<LxcAddress>,
}

#[derive(Debug, Deserialize)]
struct LxcAddress {
    family: String,
    address: String,
}

impl LxcInstance {
    fn status(&self, interface: &str) -> ContainerStatus {
        let state = RuntimeState::from_engine_status(&self.status);
        let address = self
            .state
            .as_ref()
            .and_then(|s| s.network.as_ref())
            .and_then(|network| network.get(interface))
            .and_then(|nic| {
                nic.addresses
                    .iter()
                    .filter(|a| a.family == "inet")
                    .find_map(|a| a.address.parse::<Ipv4Addr>().ok())
            });

        ContainerStatus { state, address }
    }
}

fn parse_instances(stdout: &str) -> ContainerResult<Vec<LxcInstance>> {
    if stdout.trim().is_empty() {
        return Ok(vec![]);
    }
    serde_json::from_str(stdout).map_err(|e| ContainerError::ParseError(e.to_string()))
}
