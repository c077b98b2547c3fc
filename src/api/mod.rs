//! HTTP surface: router, shared state, the JSON-RPC tool binding, and the
//! session web-UI routes.

mod error;
mod routes;
mod rpc;
mod session_ui;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
