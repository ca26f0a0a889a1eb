//! In-memory container engine with scripted state.
//!
//! Understands the tmux commands the session registry issues, so registry and
//! reconciliation behaviour can be exercised without LXD.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ContainerEngine, ContainerError, ContainerIdentity, ContainerResult, ContainerStatus,
    ExecOutput, Readiness, RuntimeState, validate_name,
};

#[derive(Debug, Clone, Default)]
struct FakeContainer {
    running: bool,
    address: Option<Ipv4Addr>,
    /// tmux session name -> creation time (unix seconds)
    sessions: BTreeMap<String, i64>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    exec_log: Vec<(String, Vec<String>)>,
    failing_exec: Vec<String>,
    fail_provision: bool,
    withheld_addresses: Vec<String>,
    deleted: Vec<String>,
    next_host: u8,
}

/// Scripted [`ContainerEngine`] used by tests and local development.
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
    status_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: &str, running: bool, address: Option<Ipv4Addr>) -> Self {
        self.insert_container(name, running, address);
        self
    }

    pub fn insert_container(&self, name: &str, running: bool, address: Option<Ipv4Addr>) {
        self.state.lock().containers.insert(
            name.to_string(),
            FakeContainer {
                running,
                address,
                sessions: BTreeMap::new(),
            },
        );
    }

    pub fn set_address(&self, name: &str, address: Option<Ipv4Addr>) {
        if let Some(container) = self.state.lock().containers.get_mut(name) {
            container.address = address;
        }
    }

    /// Starting `name` no longer hands it an address; `set_address` supplies one.
    pub fn withhold_address(&self, name: &str) {
        self.state.lock().withheld_addresses.push(name.to_string());
    }

    /// Stopping a container also ends every tmux session inside it.
    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(container) = self.state.lock().containers.get_mut(name) {
            container.running = running;
            if !running {
                container.sessions.clear();
            }
        }
    }

    pub fn remove_container(&self, name: &str) {
        self.state.lock().containers.remove(name);
    }

    pub fn container_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(name)
            .is_some_and(|c| c.running)
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.state.lock().containers.contains_key(name)
    }

    /// Create a tmux session that no registry row refers to.
    pub fn spawn_orphan(&self, container: &str, session: &str, created: i64) {
        if let Some(c) = self.state.lock().containers.get_mut(container) {
            c.sessions.insert(session.to_string(), created);
        }
    }

    /// End a tmux session behind the registry's back.
    pub fn kill_backing(&self, container: &str, session: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(container) {
            c.sessions.remove(session);
        }
    }

    pub fn sessions_in(&self, container: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(container)
            .map(|c| c.sessions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().exec_log.clone()
    }

    /// Make every exec whose command line contains `pattern` fail.
    pub fn fail_exec_matching(&self, pattern: &str) {
        self.state.lock().failing_exec.push(pattern.to_string());
    }

    pub fn fail_provisioning(&self, fail: bool) {
        self.state.lock().fail_provision = fail;
    }

    fn exec_failed(container: &str, stderr: impl Into<String>) -> ContainerError {
        ContainerError::ExecFailed {
            container: container.to_string(),
            code: Some(1),
            stderr: stderr.into(),
        }
    }
}

fn flag_value<'a>(command: &[&'a str], flag: &str) -> Option<&'a str> {
    command
        .iter()
        .position(|arg| *arg == flag)
        .and_then(|i| command.get(i + 1))
        .copied()
}

fn run_tmux(
    container: &str,
    sessions: &mut BTreeMap<String, i64>,
    command: &[&str],
) -> ContainerResult<ExecOutput> {
    match command.get(1).copied() {
        Some("new-session") => {
            let name = flag_value(command, "-s").unwrap_or("0");
            if sessions.contains_key(name) {
                return Err(FakeEngine::exec_failed(
                    container,
                    format!("duplicate session: {}", name),
                ));
            }
            sessions.insert(name.to_string(), chrono::Utc::now().timestamp());
            Ok(ExecOutput::default())
        }
        Some("kill-session") => {
            let name = flag_value(command, "-t").unwrap_or_default();
            if sessions.remove(name).is_none() {
                return Err(FakeEngine::exec_failed(
                    container,
                    format!("can't find session: {}", name),
                ));
            }
            Ok(ExecOutput::default())
        }
        Some("list-sessions") => {
            if sessions.is_empty() {
                return Err(FakeEngine::exec_failed(
                    container,
                    "no server running on /tmp/tmux-0/default",
                ));
            }
            let stdout = sessions
                .iter()
                .map(|(name, created)| format!("{}|{}\n", name, created))
                .collect();
            Ok(ExecOutput {
                stdout,
                stderr: String::new(),
            })
        }
        _ => Ok(ExecOutput::default()),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn create(&self, name: &str, template: &str) -> ContainerResult<ContainerIdentity> {
        validate_name(name)?;
        let mut state = self.state.lock();

        if state.fail_provision {
            return Err(ContainerError::ProvisionFailed {
                name: name.to_string(),
                message: format!("template {} unavailable", template),
            });
        }
        if state.containers.contains_key(name) {
            return Err(ContainerError::ProvisionFailed {
                name: name.to_string(),
                message: "container already exists".to_string(),
            });
        }

        state.next_host = state.next_host.wrapping_add(1).max(2);
        let address = Ipv4Addr::new(10, 0, 3, state.next_host);
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                running: true,
                address: Some(address),
                sessions: BTreeMap::new(),
            },
        );

        Ok(ContainerIdentity {
            name: name.to_string(),
            state: RuntimeState::Running,
            address: Some(address),
        })
    }

    async fn start(&self, name: &str) -> ContainerResult<()> {
        let mut state = self.state.lock();
        state.next_host = state.next_host.wrapping_add(1).max(2);
        let host = state.next_host;
        let withheld = state.withheld_addresses.iter().any(|n| n == name);

        let container =
            state
                .containers
                .get_mut(name)
                .ok_or_else(|| ContainerError::CommandFailed {
                    command: "start".to_string(),
                    message: format!("Error: Instance not found: {}", name),
                })?;
        container.running = true;
        if !withheld {
            container
                .address
                .get_or_insert(Ipv4Addr::new(10, 0, 3, host));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) {
        let mut state = self.state.lock();
        state.containers.remove(name);
        state.deleted.push(name.to_string());
    }

    async fn exec(
        &self,
        name: &str,
        command: &[&str],
        _timeout: Duration,
    ) -> ContainerResult<ExecOutput> {
        let mut state = self.state.lock();
        state.exec_log.push((
            name.to_string(),
            command.iter().map(|s| s.to_string()).collect(),
        ));

        let line = command.join(" ");
        if state.failing_exec.iter().any(|p| line.contains(p.as_str())) {
            return Err(Self::exec_failed(name, format!("scripted failure: {}", line)));
        }

        let container = match state.containers.get_mut(name) {
            Some(c) if c.running => c,
            Some(_) => return Err(Self::exec_failed(name, "Error: Instance is not running")),
            None => return Err(Self::exec_failed(name, "Error: Instance not found")),
        };

        if command.first() == Some(&"tmux") {
            run_tmux(name, &mut container.sessions, command)
        } else {
            Ok(ExecOutput::default())
        }
    }

    async fn status(&self, name: &str) -> ContainerResult<ContainerStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Ok(state
            .containers
            .get(name)
            .map(|c| ContainerStatus {
                state: if c.running {
                    RuntimeState::Running
                } else {
                    RuntimeState::Stopped
                },
                address: if c.running { c.address } else { None },
            })
            .unwrap_or_else(ContainerStatus::absent))
    }

    async fn list(
        &self,
        exclude: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> ContainerResult<Vec<ContainerIdentity>> {
        let state = self.state.lock();
        let mut containers: Vec<ContainerIdentity> = state
            .containers
            .iter()
            .filter(|(name, _)| !exclude(name.as_str()))
            .map(|(name, c)| ContainerIdentity {
                name: name.clone(),
                state: if c.running {
                    RuntimeState::Running
                } else {
                    RuntimeState::Stopped
                },
                address: if c.running { c.address } else { None },
            })
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    fn readiness(&self) -> Readiness {
        Readiness {
            timeout: Duration::from_secs(1),
            interval: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::is_template_name;
    use std::sync::Arc;

    #[tokio::test]
    async fn tmux_commands_track_sessions() {
        let engine = FakeEngine::new().with_container("c1", true, None);
        let timeout = Duration::from_secs(5);

        let err = engine
            .exec("c1", &["tmux", "list-sessions"], timeout)
            .await
            .unwrap_err();
        assert!(err.exec_stderr().unwrap().contains("no server running"));

        engine
            .exec("c1", &["tmux", "new-session", "-d", "-s", "one"], timeout)
            .await
            .unwrap();
        let out = engine
            .exec("c1", &["tmux", "list-sessions", "-F", "x"], timeout)
            .await
            .unwrap();
        assert!(out.stdout.starts_with("one|"));

        engine
            .exec("c1", &["tmux", "kill-session", "-t", "one"], timeout)
            .await
            .unwrap();
        assert!(engine.sessions_in("c1").is_empty());
    }

    #[tokio::test]
    async fn exec_in_stopped_container_fails() {
        let engine = FakeEngine::new().with_container("c1", false, None);

        let err = engine
            .exec("c1", &["true"], Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ContainerError::ExecFailed { .. }));
    }

    #[tokio::test]
    async fn list_applies_exclusion() {
        let engine = FakeEngine::new()
            .with_container("warren-template", false, None)
            .with_container("warren-bob", true, Some(Ipv4Addr::new(10, 0, 3, 9)))
            .with_container("warren-alice", false, None);

        let names: Vec<String> = engine
            .list(&is_template_name)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();

        assert_eq!(names, vec!["warren-alice", "warren-bob"]);
    }

    #[tokio::test]
    async fn list_accepts_a_borrowing_filter_from_a_shared_engine() {
        let engine: Arc<dyn ContainerEngine> = Arc::new(
            FakeEngine::new()
                .with_container("warren-alice", true, None)
                .with_container("warren-bob", true, None),
        );
        let hidden = vec!["warren-bob".to_string()];
        let exclude = |name: &str| hidden.iter().any(|h| h == name);

        let listed = tokio::spawn({
            let engine = engine.clone();
            async move {
                let hidden = ["warren-alice".to_string()];
                engine
                    .list(&|name: &str| hidden.iter().any(|h| h == name))
                    .await
                    .unwrap()
            }
        })
        .await
        .unwrap();
        assert_eq!(listed[0].name, "warren-bob");

        let names: Vec<String> = engine
            .list(&exclude)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["warren-alice"]);
    }
}
