//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::agent::AgentLauncher;
use crate::proxy::{default_registry, ProxyState};
use crate::run::RunStore;
use crate::sandbox::SandboxRuntime;
use crate::session::SessionStore;
use crate::settings::Settings;
use crate::storage::ObjectStore;
use crate::telemetry::Telemetry;
use crate::token::TokenService;
use crate::tools::ToolDispatcher;
use crate::workflow::{InProcessWorkflowEngine, TaskExecutor};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub runs: RunStore,
    pub dispatcher: Arc<ToolDispatcher>,
    pub proxy: ProxyState,
    pub runtime: Arc<dyn SandboxRuntime>,
    pub engine: Arc<InProcessWorkflowEngine>,
    /// Bearer expected on the tool RPC surface.
    pub auth_token: Option<String>,
    pub base_url: String,
    pub agent_port: u16,
    pub allowed_origins: Vec<String>,
    /// HTTP client for reverse-proxying into sandboxes.
    pub http_client: Client<HttpConnector, Body>,
}

impl AppState {
    /// Wire up stores, token service, workflow engine, dispatcher, and
    /// proxy from the injected backends.
    pub fn build(
        settings: &Settings,
        store: Arc<dyn ObjectStore>,
        runtime: Arc<dyn SandboxRuntime>,
        launcher: Arc<dyn AgentLauncher>,
    ) -> Result<Self> {
        let jwt_secret = settings
            .auth
            .jwt_secret
            .as_deref()
            .context("PROXY_JWT_SECRET is not configured")?;

        let sessions = SessionStore::new(store.clone());
        let runs = RunStore::new(store.clone());
        let tokens = TokenService::new(jwt_secret);
        let telemetry = Telemetry::new(settings.telemetry.enabled);
        let base_url = settings.server.effective_base_url();

        let executor = Arc::new(TaskExecutor::new(
            sessions.clone(),
            runs.clone(),
            store,
            runtime.clone(),
            launcher,
            settings.sandbox.git_user_name.clone(),
            settings.sandbox.git_user_email.clone(),
        ));
        let engine = Arc::new(InProcessWorkflowEngine::new(executor, telemetry.clone()));

        let dispatcher = Arc::new(ToolDispatcher::new(
            sessions.clone(),
            runs.clone(),
            tokens.clone(),
            engine.clone(),
            telemetry,
            base_url.clone(),
            settings.defaults.model.clone(),
        ));

        let proxy = ProxyState::new(
            default_registry(),
            tokens,
            settings.server.mount_path.clone(),
        );

        let http_client: Client<HttpConnector, Body> =
            Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            sessions,
            runs,
            dispatcher,
            proxy,
            runtime,
            engine,
            auth_token: settings.auth.auth_token.clone(),
            base_url,
            agent_port: settings.sandbox.agent_port,
            allowed_origins: settings.server.allowed_origins.clone(),
            http_client,
        })
    }
}
