//! Tenant path grammar: `/<identifier>[:<port>][/<rest>]`.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::user::UserRepository;

static TENANT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([a-zA-Z][a-zA-Z0-9_-]*)(?::(\d+))?(/.*)?$")
        .expect("Invalid regex pattern for tenant path")
});

/// Path prefixes served by warren itself, never proxied.
pub const BUILTIN_RESERVED: &[&str] = &["/api", "/ws", "/health"];

/// Port used when the path names none.
pub const DEFAULT_PORT: u16 = 80;

/// A request path addressed to a tenant's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPath {
    pub identifier: String,
    pub port: u16,
    /// Remainder of the path, always starting with `/`.
    pub rest: String,
}

impl TenantPath {
    /// Match `path` against the grammar, skipping reserved prefixes.
    ///
    /// A prefix covers whole path segments only: `/health` reserves
    /// `/health` and `/health/...` but not `/healthy-bob/`.
    ///
    /// Ports outside `1..=65535` make the path a non-match.
    pub fn parse(path: &str, extra_reserved: &[String]) -> Option<Self> {
        let reserved = BUILTIN_RESERVED
            .iter()
            .copied()
            .chain(extra_reserved.iter().map(String::as_str))
            .any(|prefix| is_under(path, prefix));
        if reserved {
            return None;
        }

        let caps = TENANT_PATH.captures(path)?;
        let port = match caps.get(2) {
            Some(port) => match port.as_str().parse::<u16>() {
                Ok(0) | Err(_) => return None,
                Ok(port) => port,
            },
            None => DEFAULT_PORT,
        };

        Some(Self {
            identifier: caps[1].to_string(),
            port,
            rest: caps
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        })
    }

    /// Upstream path and query for a request with `query`.
    pub fn upstream_path_and_query(&self, query: Option<&str>) -> String {
        match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{}?{}", self.rest, query),
            None => self.rest.clone(),
        }
    }
}

/// Whether `path` is `prefix` itself or lies below it.
fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Maps a path identifier to the container of the tenant it names.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn container_for(&self, identifier: &str) -> Result<Option<String>>;
}

#[async_trait]
impl TenantDirectory for UserRepository {
    async fn container_for(&self, identifier: &str) -> Result<Option<String>> {
        self.find_container_by_username(identifier).await
    }
}
