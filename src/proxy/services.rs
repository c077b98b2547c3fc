//! Per-service proxy policy.
//!
//! Each registered service names an upstream target, how to extract the
//! proxy token from a request, and how to inject the real credential.
//! Upstream secrets are read from the environment per request so an
//! operator swap takes effect without a restart.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::error::{ProxyError, ProxyResult};
use super::forward::ForwardRequest;

/// User agent forced onto forwarded git requests.
pub const GIT_PROXY_USER_AGENT: &str = "Sandbox-Git-Proxy";

/// A service entry in the proxy registry.
pub trait ProxyService: Send + Sync {
    /// Registered name, e.g. `anthropic`.
    fn name(&self) -> &'static str;

    /// Upstream base URL.
    fn target(&self) -> &'static str;

    /// Extract the proxy token from the request; the header varies per
    /// service.
    fn extract_token(&self, headers: &HeaderMap) -> Option<String>;

    /// Inject the real credential and apply service policy. `path` is the
    /// already-parsed target path.
    fn transform(&self, path: &str, request: &mut ForwardRequest) -> ProxyResult<()>;
}

/// Registry of proxy services keyed by name.
pub type ServiceRegistry = HashMap<&'static str, Arc<dyn ProxyService>>;

/// Build the default registry: `anthropic` and `github`.
pub fn default_registry() -> ServiceRegistry {
    let mut registry: ServiceRegistry = HashMap::new();
    registry.insert("anthropic", Arc::new(AnthropicService));
    registry.insert("github", Arc::new(GithubService));
    registry
}

fn env_credential(var: &'static str) -> ProxyResult<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ProxyError::CredentialMissing(var)),
    }
}

/// The external LLM API. The sandbox presents its proxy token as
/// `x-api-key`; the transform swaps in the real key.
pub struct AnthropicService;

impl ProxyService for AnthropicService {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn target(&self) -> &'static str {
        "https://api.anthropic.com"
    }

    fn extract_token(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn transform(&self, _path: &str, request: &mut ForwardRequest) -> ProxyResult<()> {
        let api_key = env_credential("ANTHROPIC_API_KEY")?;
        let value = HeaderValue::from_str(&api_key)
            .map_err(|_| ProxyError::CredentialMissing("ANTHROPIC_API_KEY"))?;
        request.headers.insert("x-api-key", value);
        Ok(())
    }
}

/// GitHub, restricted to git's smart-HTTP transport. The sandbox presents
/// its proxy token as a bearer; the transform swaps in basic auth with the
/// installation token.
pub struct GithubService;

impl ProxyService for GithubService {
    fn name(&self) -> &'static str {
        "github"
    }

    fn target(&self) -> &'static str {
        "https://github.com"
    }

    fn extract_token(&self, headers: &HeaderMap) -> Option<String> {
        bearer_token(headers)
    }

    fn transform(&self, path: &str, request: &mut ForwardRequest) -> ProxyResult<()> {
        if !is_git_smart_http_path(path) {
            return Err(ProxyError::PathInvalid("Invalid git path".to_string()));
        }

        let github_token = env_credential("GITHUB_TOKEN")?;
        let basic = BASE64.encode(format!("x-access-token:{github_token}"));
        let value = HeaderValue::from_str(&format!("Basic {basic}"))
            .map_err(|_| ProxyError::CredentialMissing("GITHUB_TOKEN"))?;
        request.headers.insert(axum::http::header::AUTHORIZATION, value);
        request.headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static(GIT_PROXY_USER_AGENT),
        );
        Ok(())
    }
}

/// Extract a bearer token from an `Authorization` header value.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let mut parts = value.split_whitespace();
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?;
    if token.is_empty() || parts.next().is_some() {
        return None;
    }
    Some(token.to_string())
}

/// Allow-list for git's smart-HTTP transport:
/// `/{owner}/{repo}[.git]/(info/refs|git-upload-pack|git-receive-pack)`.
fn is_git_smart_http_path(path: &str) -> bool {
    const SUFFIXES: [&str; 3] = ["/info/refs", "/git-upload-pack", "/git-receive-pack"];
    let Some(prefix) = SUFFIXES.iter().find_map(|s| path.strip_suffix(s)) else {
        return false;
    };
    let Some(rest) = prefix.strip_prefix('/') else {
        return false;
    };
    match rest.find('/') {
        Some(pos) => pos > 0 && rest.len() > pos + 1,
        None => false,
    }
}

/// Rewrite proxy URLs handed to sandboxes for local development: a sandbox
/// container cannot reach the host's loopback, so `localhost` becomes the
/// Docker host alias. No-op for public hostnames.
pub fn rewrite_local_host(url: &str) -> String {
    url.replace("//localhost", "//host.docker.internal")
        .replace("//127.0.0.1", "//host.docker.internal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Method;

    fn forward(url: &str) -> ForwardRequest {
        ForwardRequest::from_parts(
            Method::GET,
            url.to_string(),
            &HeaderMap::new(),
            Body::empty(),
        )
    }

    #[test]
    fn test_git_allow_list() {
        assert!(is_git_smart_http_path("/u/r.git/info/refs"));
        assert!(is_git_smart_http_path("/u/r/info/refs"));
        assert!(is_git_smart_http_path("/u/r.git/git-upload-pack"));
        assert!(is_git_smart_http_path("/u/r.git/git-receive-pack"));
        assert!(is_git_smart_http_path("/org/team/repo.git/info/refs"));

        assert!(!is_git_smart_http_path("/u/r.git"));
        assert!(!is_git_smart_http_path("/owner/repo/releases"));
        assert!(!is_git_smart_http_path("/info/refs"));
        assert!(!is_git_smart_http_path("/u/info/refs"));
        assert!(!is_git_smart_http_path("/"));
        assert!(!is_git_smart_http_path(""));
    }

    #[test]
    fn test_github_transform_rejects_non_git_path() {
        let mut request = forward("https://github.com/owner/repo/releases");
        let err = GithubService
            .transform("/owner/repo/releases", &mut request)
            .unwrap_err();
        assert_eq!(err.code(), "PROXY_PATH_INVALID");
        assert_eq!(err.to_string(), "Invalid git path");
    }

    #[test]
    fn test_github_transform_injects_basic_auth() {
        std::env::set_var("GITHUB_TOKEN", "ghs_test");
        let mut request = forward("https://github.com/u/r.git/info/refs");
        GithubService
            .transform("/u/r.git/info/refs", &mut request)
            .unwrap();

        let auth = request.headers.get("authorization").unwrap().to_str().unwrap();
        let expected = BASE64.encode("x-access-token:ghs_test");
        assert_eq!(auth, format!("Basic {expected}"));
        assert_eq!(
            request.headers.get("user-agent").unwrap(),
            GIT_PROXY_USER_AGENT
        );
    }

    #[test]
    fn test_anthropic_transform_replaces_key() {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-test");
        let mut request = forward("https://api.anthropic.com/v1/messages");
        request
            .headers
            .insert("x-api-key", HeaderValue::from_static("proxy-token"));
        AnthropicService
            .transform("/v1/messages", &mut request)
            .unwrap();
        assert_eq!(request.headers.get("x-api-key").unwrap(), "sk-ant-test");
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic abc"),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_rewrite_local_host() {
        assert_eq!(
            rewrite_local_host("http://localhost:8787/proxy"),
            "http://host.docker.internal:8787/proxy"
        );
        assert_eq!(
            rewrite_local_host("http://127.0.0.1:8787"),
            "http://host.docker.internal:8787"
        );
        assert_eq!(
            rewrite_local_host("https://control.example.com/proxy"),
            "https://control.example.com/proxy"
        );
    }
}
