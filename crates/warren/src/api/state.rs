//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthState, CredentialResolver, TokenStore};
use crate::container::{ContainerEngine, IpCache, ip_cache::DEFAULT_TTL};
use crate::db::Database;
use crate::files::{FileManager, FileManagerConfig};
use crate::proxy::ProxyState;
use crate::session::{SessionRegistry, SessionRegistryConfig, SessionRepository};
use crate::terminal::{TerminalAttacher, TerminalSize};
use crate::user::{TenantConfig, TenantService, UserRepository};

/// Tunables for the services held in [`AppState`].
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub registry: SessionRegistryConfig,
    pub tenants: TenantConfig,
    pub ip_cache_ttl: Duration,
    /// Path prefixes, besides the built-in ones, never treated as tenant paths.
    pub extra_reserved_prefixes: Vec<String>,
    pub terminal_size: TerminalSize,
    pub files: FileManagerConfig,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            registry: SessionRegistryConfig::default(),
            tenants: TenantConfig::default(),
            ip_cache_ttl: DEFAULT_TTL,
            extra_reserved_prefixes: Vec::new(),
            terminal_size: TerminalSize::default(),
            files: FileManagerConfig::default(),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub users: UserRepository,
    pub tenants: Arc<TenantService>,
    pub engine: Arc<dyn ContainerEngine>,
    pub ip_cache: Arc<IpCache>,
    pub attacher: Arc<dyn TerminalAttacher>,
    pub files: Arc<FileManager>,
    pub auth: AuthState,
    pub proxy: ProxyState,
    pub terminal_size: TerminalSize,
}

impl AppState {
    /// Wire every service on top of `db`, resolving credentials from its token table.
    pub fn new(
        db: &Database,
        engine: Arc<dyn ContainerEngine>,
        attacher: Arc<dyn TerminalAttacher>,
        options: StateOptions,
    ) -> Self {
        let tokens: Arc<dyn CredentialResolver> = Arc::new(TokenStore::new(db.pool().clone()));
        Self::with_resolver(db, engine, attacher, tokens, options)
    }

    pub fn with_resolver(
        db: &Database,
        engine: Arc<dyn ContainerEngine>,
        attacher: Arc<dyn TerminalAttacher>,
        credentials: Arc<dyn CredentialResolver>,
        options: StateOptions,
    ) -> Self {
        let users = UserRepository::new(db.pool().clone());
        let ip_cache = Arc::new(IpCache::new(engine.clone(), options.ip_cache_ttl));
        let registry = Arc::new(SessionRegistry::new(
            engine.clone(),
            SessionRepository::new(db.pool().clone()),
            users.clone(),
            options.registry,
        ));
        let tenants = Arc::new(TenantService::new(
            engine.clone(),
            users.clone(),
            registry.clone(),
            ip_cache.clone(),
            options.tenants,
        ));
        let proxy = ProxyState::new(
            Arc::new(users.clone()),
            ip_cache.clone(),
            credentials.clone(),
            options.extra_reserved_prefixes,
        );

        Self {
            registry,
            users,
            tenants,
            engine,
            ip_cache,
            attacher,
            files: Arc::new(FileManager::new(options.files)),
            auth: AuthState::new(credentials),
            proxy,
            terminal_size: options.terminal_size,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("ip_cache", &self.ip_cache)
            .field("terminal_size", &self.terminal_size)
            .finish_non_exhaustive()
    }
}
