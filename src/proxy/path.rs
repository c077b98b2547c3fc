//! Proxy path grammar and upstream URL construction.

use super::error::{ProxyError, ProxyResult};

/// A parsed `{mountPath}/{service}/{targetPath?}` request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub service: String,
    /// Always begins with `/`. `/` when the request named only the service.
    pub path: String,
}

/// Normalize a mount path to `/seg` form: leading slash, no trailing slash.
fn normalize_mount(mount: &str) -> String {
    let trimmed = mount.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Parse a request path against the configured mount path.
///
/// Total over all inputs: either returns a route whose service is non-empty
/// and whose path starts with `/`, or fails with `PROXY_PATH_INVALID`.
pub fn parse_proxy_path(mount: &str, request_path: &str) -> ProxyResult<ProxyRoute> {
    let mount = normalize_mount(mount);
    let Some(rest) = request_path.strip_prefix(mount.as_str()) else {
        return Err(ProxyError::PathInvalid(format!(
            "path {request_path:?} is not under {mount}"
        )));
    };

    let Some(rest) = rest.strip_prefix('/') else {
        return Err(ProxyError::PathInvalid(format!(
            "expected {mount}/{{service}}/..., got {request_path:?}"
        )));
    };

    let (service, target) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };

    if service.is_empty() {
        return Err(ProxyError::PathInvalid(format!(
            "missing service name in {request_path:?}"
        )));
    }

    Ok(ProxyRoute {
        service: service.to_string(),
        path: target.to_string(),
    })
}

/// Resolve the upstream URL: the target's base path survives, the proxied
/// path is appended, and the original query string is preserved verbatim.
pub fn build_target_url(target: &str, path: &str, query: Option<&str>) -> String {
    let base = target.trim_end_matches('/');
    let fragment = path.trim_start_matches('/');

    let mut url = if fragment.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{fragment}")
    };
    if let Some(query) = query {
        if !query.is_empty() {
            url.push('?');
            url.push_str(query.trim_start_matches('?'));
        }
    }
    url
}
