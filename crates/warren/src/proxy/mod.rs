//! Path-based reverse proxy into tenant containers.
//!
//! `/<identifier>[:<port>][/<rest>]` is forwarded to `<rest>` on the named
//! tenant's container, plain HTTP and WebSocket alike. warren's own
//! credentials are removed before a request leaves for a container.

mod forward;
mod middleware;
pub mod path;
mod scrub;
mod websocket;

pub use forward::{HttpClient, forward, http_client};
pub use middleware::{ProxyState, tenant_proxy};
pub use path::{BUILTIN_RESERVED, DEFAULT_PORT, TenantDirectory, TenantPath};
pub use scrub::{strip_session_cookie, strip_warren_bearer};
pub use websocket::{is_upgrade_request, proxy_websocket};
