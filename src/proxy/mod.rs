//! Authenticating reverse proxy.
//!
//! Sandboxes egress through this proxy with a short-lived proxy token; the
//! proxy verifies the token, rewrites the request to the real upstream,
//! injects the real credential, and forwards. Per-service policy controls
//! which paths and headers a credential can ever be attached to.

mod engine;
mod error;
mod forward;
mod path;
mod services;

pub use engine::{handle_proxy, ProxyState};
pub use error::{ProxyError, ProxyResult};
pub use forward::{forward_request, ForwardRequest, HOP_BY_HOP_HEADERS};
pub use path::{build_target_url, parse_proxy_path, ProxyRoute};
pub use services::{default_registry, rewrite_local_host, ProxyService, ServiceRegistry};
