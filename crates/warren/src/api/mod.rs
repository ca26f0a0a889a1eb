//! HTTP surface: session management, the file manager, administration, the
//! terminal relay endpoint and the tenant proxy.

pub mod error;
mod files;
mod handlers;
mod routes;
mod state;
mod terminal;

pub use error::{ApiError, ApiResult};
pub use handlers::HealthResponse;
pub use routes::create_router;
pub use state::{AppState, StateOptions};
