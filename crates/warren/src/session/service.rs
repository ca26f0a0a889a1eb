//! Session registry: registry rows plus the tmux sessions they refer to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, info, instrument, warn};

use super::error::{SessionError, SessionResult};
use super::models::{Session, SessionState, SessionStateReport, SessionView};
use super::multiplexer::{self, LiveSession};
use super::naming::{backing_name, default_display_name, generate_session_id};
use super::repository::SessionRepository;
use super::tracker::{ChannelGuard, ChannelTracker};
use crate::container::{ContainerEngine, ContainerError, validate_name};
use crate::user::{User, UserRepository};

/// Longest accepted display name, in characters.
pub const MAX_NAME_CHARS: usize = 100;

/// Registry settings.
#[derive(Debug, Clone)]
pub struct SessionRegistryConfig {
    /// Program started in new tmux sessions; the user's shell when `None`.
    pub startup_command: Option<String>,
    /// Deadline for `tmux kill-session`.
    pub kill_timeout: Duration,
    /// Deadline for other tmux commands.
    pub command_timeout: Duration,
}

impl Default for SessionRegistryConfig {
    fn default() -> Self {
        Self {
            startup_command: None,
            kill_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(15),
        }
    }
}

/// Owns the session lifecycle across the registry table and the container engine.
pub struct SessionRegistry {
    engine: Arc<dyn ContainerEngine>,
    sessions: SessionRepository,
    users: UserRepository,
    channels: ChannelTracker,
    terminating: DashSet<String>,
    config: SessionRegistryConfig,
}

/// Removes a session from the in-flight delete set when dropped.
struct TerminatingGuard<'a> {
    set: &'a DashSet<String>,
    id: String,
}

impl Drop for TerminatingGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// Trim and bound a display name.
pub fn normalize_name(name: &str) -> SessionResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::Validation(
            "name must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(SessionError::Validation(format!(
            "name must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

impl SessionRegistry {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        sessions: SessionRepository,
        users: UserRepository,
        config: SessionRegistryConfig,
    ) -> Self {
        Self {
            engine,
            sessions,
            users,
            channels: ChannelTracker::new(),
            terminating: DashSet::new(),
            config,
        }
    }

    pub fn channels(&self) -> &ChannelTracker {
        &self.channels
    }

    /// Register a relay channel on a session for as long as the guard lives.
    pub fn track_channel(&self, session_id: &str) -> ChannelGuard {
        self.channels.register(session_id)
    }

    /// Create a session in the user's container.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn create(&self, user: &User, display_name: Option<&str>) -> SessionResult<Session> {
        let container = user.container().ok_or(SessionError::NoContainer)?;

        let requested = match display_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => Some(normalize_name(name)?),
            None => None,
        };

        self.engine.ensure_running(container).await?;

        let id = generate_session_id();
        let backing = backing_name(&id);
        validate_name(&backing)?;

        let command = multiplexer::new_session(&backing, self.config.startup_command.as_deref());
        self.engine
            .exec(
                container,
                &multiplexer::as_args(&command),
                self.config.command_timeout,
            )
            .await?;

        let name = match requested {
            Some(name) => name,
            None => default_display_name(self.sessions.count_for_user(&user.id).await? + 1),
        };

        let session = Session {
            id,
            user_id: user.id.clone(),
            name,
            backing_session: backing,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        if let Err(e) = self.sessions.create(&session).await {
            warn!(
                "Failed to persist session {}, killing {}: {:#}",
                session.id, session.backing_session, e
            );
            self.kill_backing(container, &session.backing_session).await;
            return Err(SessionError::Storage(e));
        }

        info!(
            "Created session {} ({}) in {}",
            session.id, session.backing_session, container
        );
        Ok(session)
    }

    /// Sessions of a user, oldest first.
    pub async fn list(&self, user_id: &str) -> SessionResult<Vec<Session>> {
        Ok(self.sessions.list_for_user(user_id).await?)
    }

    /// Look up a session regardless of owner.
    pub async fn get(&self, session_id: &str) -> SessionResult<Option<Session>> {
        Ok(self.sessions.get(session_id).await?)
    }

    #[instrument(skip(self, name))]
    pub async fn rename(
        &self,
        session_id: &str,
        user_id: &str,
        name: &str,
    ) -> SessionResult<Session> {
        let name = normalize_name(name)?;
        if !self.sessions.rename(session_id, user_id, &name).await? {
            return Err(SessionError::NotFound);
        }
        self.sessions
            .get_for_user(session_id, user_id)
            .await?
            .ok_or(SessionError::NotFound)
    }

    /// Kill the backing session and remove the row.
    ///
    /// Kill failures are logged and ignored; the row is removed regardless.
    #[instrument(skip(self))]
    pub async fn delete(&self, session_id: &str, user_id: &str) -> SessionResult<()> {
        let session = self
            .sessions
            .get_for_user(session_id, user_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        if !self.terminating.insert(session.id.clone()) {
            debug!("Session {} is already being deleted", session.id);
        }
        let _terminating = TerminatingGuard {
            set: &self.terminating,
            id: session.id.clone(),
        };

        match self.users.get(user_id).await? {
            Some(User {
                container: Some(container),
                ..
            }) => self.kill_backing(&container, &session.backing_session).await,
            _ => debug!(
                "User {} has no container; skipping kill of {}",
                user_id, session.backing_session
            ),
        }

        self.sessions.delete(&session.id).await?;
        info!("Deleted session {}", session.id);
        Ok(())
    }

    /// Kill every backing session of a user and drop their rows.
    pub async fn purge_user(&self, user_id: &str, container: Option<&str>) -> SessionResult<u64> {
        let sessions = self.sessions.list_for_user(user_id).await?;
        if let Some(container) = container {
            for session in &sessions {
                self.kill_backing(container, &session.backing_session).await;
            }
        }
        Ok(self.sessions.delete_for_user(user_id).await?)
    }

    /// Join the live tmux sessions of `container` against the owner's rows.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, container: &str) -> SessionResult<Vec<SessionView>> {
        let live = self.live_sessions(container).await?;

        let rows: HashMap<String, Session> = match self.users.get_by_container(container).await? {
            Some(owner) => self
                .sessions
                .list_for_user(&owner.id)
                .await?
                .into_iter()
                .map(|s| (s.backing_session.clone(), s))
                .collect(),
            None => HashMap::new(),
        };

        let mut views: Vec<SessionView> = live
            .into_iter()
            .map(|live| match rows.get(&live.name) {
                Some(row) => SessionView {
                    id: Some(row.id.clone()),
                    user_id: Some(row.user_id.clone()),
                    name: row.name.clone(),
                    backing_session: live.name,
                    created_at: Some(row.created_at.clone()),
                    orphan: false,
                    attached: self.channels.count(&row.id),
                },
                None => SessionView {
                    id: None,
                    user_id: None,
                    name: live.name.clone(),
                    backing_session: live.name,
                    created_at: live.created.map(|c| c.to_rfc3339()),
                    orphan: true,
                    attached: 0,
                },
            })
            .collect();

        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(views)
    }

    /// Derived lifecycle state of a session.
    pub async fn state(&self, session_id: &str) -> SessionResult<SessionStateReport> {
        let attached = self.channels.count(session_id);
        let state = if self.terminating.contains(session_id) {
            SessionState::Terminating
        } else if self.sessions.get(session_id).await?.is_none() {
            SessionState::Gone
        } else if attached > 0 {
            SessionState::Attached
        } else {
            SessionState::Created
        };

        Ok(SessionStateReport { state, attached })
    }

    async fn live_sessions(&self, container: &str) -> SessionResult<Vec<LiveSession>> {
        let command = multiplexer::list_sessions();
        match self
            .engine
            .exec(
                container,
                &multiplexer::as_args(&command),
                self.config.command_timeout,
            )
            .await
        {
            Ok(output) => Ok(multiplexer::parse_session_list(&output.stdout)),
            Err(ContainerError::ExecFailed { ref stderr, .. })
                if multiplexer::is_no_server(stderr) =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn kill_backing(&self, container: &str, backing: &str) {
        let command = multiplexer::kill_session(backing);
        if let Err(e) = self
            .engine
            .exec(
                container,
                &multiplexer::as_args(&command),
                self.config.kill_timeout,
            )
            .await
        {
            debug!("Failed to kill {} in {}: {}", backing, container, e);
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.config)
            .field("terminating", &self.terminating.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::FakeEngine;
    use crate::db::Database;
    use crate::user::NewUser;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    const CONTAINER: &str = "warren-alice";

    struct Fixture {
        engine: Arc<FakeEngine>,
        registry: Arc<SessionRegistry>,
        alice: User,
        bob: User,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.pool().clone());
        let alice = users
            .create(NewUser::new("alice").with_container(CONTAINER))
            .await
            .unwrap();
        let bob = users.create(NewUser::new("bob")).await.unwrap();

        let engine = Arc::new(FakeEngine::new().with_container(
            CONTAINER,
            true,
            Some(Ipv4Addr::new(10, 0, 3, 17)),
        ));
        let registry = Arc::new(SessionRegistry::new(
            engine.clone(),
            SessionRepository::new(db.pool().clone()),
            users,
            SessionRegistryConfig {
                startup_command: Some("pi".to_string()),
                ..SessionRegistryConfig::default()
            },
        ));

        Fixture {
            engine,
            registry,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn create_spawns_backing_session_with_default_names() {
        let f = fixture().await;

        let first = f.registry.create(&f.alice, None).await.unwrap();
        let second = f.registry.create(&f.alice, Some("  build  ")).await.unwrap();
        let third = f.registry.create(&f.alice, Some("")).await.unwrap();

        assert_eq!(first.name, "Agent 1");
        assert_eq!(second.name, "build");
        assert_eq!(third.name, "Agent 3");
        assert_eq!(first.backing_session, format!("sess{}", first.id));
        assert!(
            f.engine
                .sessions_in(CONTAINER)
                .contains(&first.backing_session)
        );
        assert!(f.engine.exec_log().iter().any(|(_, cmd)| {
            cmd.last().map(String::as_str) == Some("pi") && cmd.contains(&first.backing_session)
        }));
    }

    #[tokio::test]
    async fn create_requires_container() {
        let f = fixture().await;

        let err = f.registry.create(&f.bob, None).await.unwrap_err();

        assert!(matches!(err, SessionError::NoContainer));
    }

    #[tokio::test]
    async fn create_starts_stopped_container() {
        let f = fixture().await;
        f.engine.set_running(CONTAINER, false);

        f.registry.create(&f.alice, None).await.unwrap();

        assert!(f.engine.container_running(CONTAINER));
    }

    #[tokio::test]
    async fn failed_spawn_leaves_no_row() {
        let f = fixture().await;
        f.engine.fail_exec_matching("new-session");

        let err = f.registry.create(&f.alice, None).await.unwrap_err();

        assert!(matches!(err, SessionError::Container(_)));
        assert!(f.registry.list(&f.alice.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_yield_distinct_sessions() {
        let f = fixture().await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = f.registry.clone();
                let alice = f.alice.clone();
                tokio::spawn(async move { registry.create(&alice, None).await })
            })
            .collect();

        let mut ids = HashSet::new();
        let mut backing = HashSet::new();
        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            ids.insert(session.id);
            backing.insert(session.backing_session);
        }

        assert_eq!(ids.len(), 16);
        assert_eq!(backing.len(), 16);
        assert_eq!(f.registry.list(&f.alice.id).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn rename_validates_and_scopes_to_owner() {
        let f = fixture().await;
        let session = f.registry.create(&f.alice, None).await.unwrap();

        let renamed = f
            .registry
            .rename(&session.id, &f.alice.id, " deploy ")
            .await
            .unwrap();
        assert_eq!(renamed.name, "deploy");

        assert!(matches!(
            f.registry.rename(&session.id, &f.alice.id, "   ").await,
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            f.registry
                .rename(&session.id, &f.alice.id, &"x".repeat(101))
                .await,
            Err(SessionError::Validation(_))
        ));
        assert!(
            f.registry
                .rename(&session.id, &f.alice.id, &"é".repeat(100))
                .await
                .is_ok()
        );
        assert!(matches!(
            f.registry.rename(&session.id, &f.bob.id, "mine").await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_kills_backing_and_removes_row() {
        let f = fixture().await;
        let session = f.registry.create(&f.alice, None).await.unwrap();

        f.registry.delete(&session.id, &f.alice.id).await.unwrap();

        assert!(f.registry.get(&session.id).await.unwrap().is_none());
        assert!(f.engine.sessions_in(CONTAINER).is_empty());
    }

    #[tokio::test]
    async fn delete_succeeds_when_backing_is_already_gone() {
        let f = fixture().await;
        let session = f.registry.create(&f.alice, None).await.unwrap();
        f.engine.kill_backing(CONTAINER, &session.backing_session);

        f.registry.delete(&session.id, &f.alice.id).await.unwrap();

        assert!(f.registry.get(&session.id).await.unwrap().is_none());
        let state = f.registry.state(&session.id).await.unwrap();
        assert_eq!(state.state, SessionState::Gone);
    }

    #[tokio::test]
    async fn delete_by_other_user_is_not_found() {
        let f = fixture().await;
        let session = f.registry.create(&f.alice, None).await.unwrap();

        let err = f.registry.delete(&session.id, &f.bob.id).await.unwrap_err();

        assert!(matches!(err, SessionError::NotFound));
        assert!(f.registry.get(&session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reconcile_reports_orphans_and_prefers_registry_names() {
        let f = fixture().await;
        let session = f.registry.create(&f.alice, Some("build")).await.unwrap();
        f.engine.spawn_orphan(CONTAINER, "scratch", 1_600_000_000);
        let stale = f.registry.create(&f.alice, None).await.unwrap();
        f.engine.kill_backing(CONTAINER, &stale.backing_session);
        let _viewer = f.registry.track_channel(&session.id);

        let views = f.registry.reconcile(CONTAINER).await.unwrap();

        assert_eq!(views.len(), 2);
        let orphan = views.iter().find(|v| v.orphan).unwrap();
        assert_eq!(orphan.name, "scratch");
        assert_eq!(orphan.id, None);
        let known = views.iter().find(|v| !v.orphan).unwrap();
        assert_eq!(known.name, "build");
        assert_eq!(known.id.as_deref(), Some(session.id.as_str()));
        assert_eq!(known.attached, 1);
    }

    #[tokio::test]
    async fn reconcile_without_tmux_server_is_empty() {
        let f = fixture().await;

        assert!(f.registry.reconcile(CONTAINER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_follows_attachments() {
        let f = fixture().await;
        let session = f.registry.create(&f.alice, None).await.unwrap();

        assert_eq!(
            f.registry.state(&session.id).await.unwrap().state,
            SessionState::Created
        );

        let first = f.registry.track_channel(&session.id);
        let second = f.registry.track_channel(&session.id);
        let report = f.registry.state(&session.id).await.unwrap();
        assert_eq!(report.state, SessionState::Attached);
        assert_eq!(report.attached, 2);

        drop(first);
        drop(second);
        assert_eq!(
            f.registry.state(&session.id).await.unwrap().state,
            SessionState::Created
        );
    }

    #[tokio::test]
    async fn state_reports_in_flight_delete() {
        let f = fixture().await;
        let session = f.registry.create(&f.alice, None).await.unwrap();
        f.registry.terminating.insert(session.id.clone());

        assert_eq!(
            f.registry.state(&session.id).await.unwrap().state,
            SessionState::Terminating
        );
    }

    #[tokio::test]
    async fn purge_user_removes_all_sessions() {
        let f = fixture().await;
        f.registry.create(&f.alice, None).await.unwrap();
        f.registry.create(&f.alice, None).await.unwrap();

        let removed = f
            .registry
            .purge_user(&f.alice.id, Some(CONTAINER))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert!(f.engine.sessions_in(CONTAINER).is_empty());
    }
}
