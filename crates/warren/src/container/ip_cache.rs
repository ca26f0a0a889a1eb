//! Short-lived cache of container addresses.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, warn};
use tokio::time::Instant;

use super::ContainerEngine;

/// How long a resolved address is trusted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct CachedAddress {
    address: Ipv4Addr,
    fetched_at: Instant,
}

/// Maps container names to their last known IPv4 address.
///
/// Only successful lookups are stored; a container without an address or a
/// failed status query evicts the entry so the next call asks the engine again.
pub struct IpCache {
    engine: Arc<dyn ContainerEngine>,
    ttl: Duration,
    entries: DashMap<String, CachedAddress>,
}

impl IpCache {
    pub fn new(engine: Arc<dyn ContainerEngine>, ttl: Duration) -> Self {
        Self {
            engine,
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Address of `container`, from cache when fetched less than one TTL ago.
    pub async fn get(&self, container: &str) -> Option<Ipv4Addr> {
        let fresh = self
            .entries
            .get(container)
            .map(|entry| *entry)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl);
        if let Some(entry) = fresh {
            return Some(entry.address);
        }

        match self.engine.status(container).await {
            Ok(status) => match status.address {
                Some(address) => {
                    debug!("Resolved container {} to {}", container, address);
                    self.entries.insert(
                        container.to_string(),
                        CachedAddress {
                            address,
                            fetched_at: Instant::now(),
                        },
                    );
                    Some(address)
                }
                None => {
                    self.entries.remove(container);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to resolve address of container {}: {}", container, e);
                self.entries.remove(container);
                None
            }
        }
    }

    pub fn invalidate(&self, container: &str) {
        self.entries.remove(container);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for IpCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}
