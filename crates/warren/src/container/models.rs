//! Container data models.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime state of a container as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    /// Container is running.
    Running,
    /// Container exists but is not running.
    Stopped,
    /// Engine has no container by that name.
    Absent,
}

impl RuntimeState {
    /// Map an engine status string ("Running", "Stopped", "Frozen", ...) to a state.
    pub fn from_engine_status(status: &str) -> Self {
        if status.eq_ignore_ascii_case("running") {
            RuntimeState::Running
        } else {
            RuntimeState::Stopped
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeState::Running => write!(f, "running"),
            RuntimeState::Stopped => write!(f, "stopped"),
            RuntimeState::Absent => write!(f, "absent"),
        }
    }
}

/// Point-in-time status of a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    pub state: RuntimeState,
    /// First IPv4 address on the primary interface.
    pub address: Option<Ipv4Addr>,
}

impl ContainerStatus {
    pub fn absent() -> Self {
        Self {
            state: RuntimeState::Absent,
            address: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == RuntimeState::Running
    }
}

/// A managed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerIdentity {
    pub name: String,
    pub state: RuntimeState,
    pub address: Option<Ipv4Addr>,
}

impl ContainerIdentity {
    pub fn status(&self) -> ContainerStatus {
        ContainerStatus {
            state: self.state,
            address: self.address,
        }
    }
}

/// Output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// How long to wait for a container to become ready, and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
        }
    }
}

/// Default exclusion predicate for container listings: template and base images.
pub fn is_template_name(name: &str) -> bool {
    name.contains("template") || name.contains("base")
}
