//! Typed configuration.
//!
//! Layered: built-in defaults, then an optional config file, then
//! `SANDBOX_MCP_*` environment overrides. The two credentials the HTTP
//! surface depends on (`AUTH_TOKEN`, `PROXY_JWT_SECRET`) are also accepted
//! as bare environment variables and resolved at load time.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::storage::StorageBackend;

/// Full application settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub sandbox: SandboxSettings,
    pub defaults: DefaultsSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Public base URL; defaults to `http://{host}:{port}`.
    pub base_url: Option<String>,
    /// Mount path of the credential proxy.
    pub mount_path: String,
    /// CORS origins; empty means permissive (development).
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            base_url: None,
            mount_path: "/proxy".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerSettings {
    pub fn effective_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Bearer token for the tool RPC surface (`AUTH_TOKEN`).
    pub auth_token: Option<String>,
    /// HS256 signing secret for proxy tokens (`PROXY_JWT_SECRET`).
    pub jwt_secret: Option<String>,
    /// Proxy token lifetime.
    pub token_ttl: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            auth_token: None,
            jwt_secret: None,
            token_ttl: "2h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// `memory` or `local`.
    pub backend: String,
    /// Root directory for the local backend.
    pub root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            root: PathBuf::from("./data"),
        }
    }
}

impl StorageSettings {
    pub fn to_backend(&self) -> Result<StorageBackend> {
        match self.backend.as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "local" => Ok(StorageBackend::Local(self.root.clone())),
            other => anyhow::bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Base URL of the sandbox runtime service.
    pub runtime_url: String,
    /// Port the agent subprocess listens on inside sandboxes.
    pub agent_port: u16,
    pub git_user_name: String,
    pub git_user_email: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            runtime_url: "http://127.0.0.1:9100".to_string(),
            agent_port: 4096,
            git_user_name: "Sandbox Agent".to_string(),
            git_user_email: "agent@sandbox.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsSettings {
    /// Model used when neither the call nor the session names one.
    pub model: String,
}

impl Default for DefaultsSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Load settings from an optional file plus environment overrides.
pub fn load(config_path: Option<&Path>) -> Result<Settings> {
    let mut builder = Config::builder();
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path.to_path_buf()).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("SANDBOX_MCP")
            .separator("__")
            .try_parsing(true),
    );

    let mut settings: Settings = builder
        .build()
        .context("building configuration")?
        .try_deserialize()
        .context("deserializing configuration")?;

    if settings.auth.auth_token.is_none() {
        if let Ok(token) = std::env::var("AUTH_TOKEN") {
            if !token.is_empty() {
                settings.auth.auth_token = Some(token);
            }
        }
    }
    if settings.auth.jwt_secret.is_none() {
        if let Ok(secret) = std::env::var("PROXY_JWT_SECRET") {
            if !secret.is_empty() {
                settings.auth.jwt_secret = Some(secret);
            }
        }
    }

    Ok(settings)
}
