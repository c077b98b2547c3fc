//! The proxy request pipeline.
//!
//! parse path -> resolve service -> extract token -> verify -> build
//! upstream URL -> copy request -> transform -> forward.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use log::{debug, warn};

use crate::token::TokenService;

use super::error::ProxyError;
use super::forward::{forward_request, ForwardRequest};
use super::path::{build_target_url, parse_proxy_path};
use super::services::ServiceRegistry;

/// Everything the proxy pipeline needs, independent of the HTTP router.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<ServiceRegistry>,
    pub tokens: TokenService,
    pub client: reqwest::Client,
    pub mount_path: String,
}

impl ProxyState {
    pub fn new(registry: ServiceRegistry, tokens: TokenService, mount_path: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(registry),
            tokens,
            client: reqwest::Client::new(),
            mount_path: mount_path.into(),
        }
    }

    fn available(&self) -> String {
        let mut names: Vec<&str> = self.registry.keys().copied().collect();
        names.sort_unstable();
        names.join(", ")
    }
}

/// Run the full proxy pipeline for one request.
pub async fn handle_proxy(state: &ProxyState, request: Request<Body>) -> Response {
    match proxy_inner(state, request).await {
        Ok(response) => response,
        Err(err) => {
            debug!("proxy rejected request: {err}");
            err.into_response()
        }
    }
}

async fn proxy_inner(
    state: &ProxyState,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let route = parse_proxy_path(&state.mount_path, request.uri().path())?;

    let service = state
        .registry
        .get(route.service.as_str())
        .cloned()
        .ok_or_else(|| ProxyError::ServiceNotFound {
            service: route.service.clone(),
            available: state.available(),
        })?;

    let token = service
        .extract_token(request.headers())
        .ok_or(ProxyError::TokenMissing)?;
    let claims = state.tokens.verify(&token)?;
    debug!(
        "proxying {} {} for sandbox {}",
        request.method(),
        route.path,
        claims.sandbox_id
    );

    let url = build_target_url(service.target(), &route.path, request.uri().query());

    let (parts, body) = request.into_parts();
    let mut forward = ForwardRequest::from_parts(parts.method, url, &parts.headers, body);
    service.transform(&route.path, &mut forward)?;

    forward_request(&state.client, forward).await.map_err(|err| {
        if let ProxyError::TargetError { target, message } = &err {
            warn!("upstream {target} unreachable: {message}");
        }
        err
    })
}
