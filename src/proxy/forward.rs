//! Upstream request forwarding.
//!
//! Builds a forwardable copy of the incoming request (hop-by-hop headers
//! dropped, GET/HEAD bodies nulled, other bodies streamed) and relays the
//! upstream response unchanged.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::Response;

use super::error::{ProxyError, ProxyResult};

/// Headers that describe the connection rather than the message; never
/// forwarded in either direction.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A request ready to be sent upstream. Service transforms mutate the
/// header map to inject real credentials.
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<reqwest::Body>,
}

impl ForwardRequest {
    /// Copy an incoming request. GET/HEAD carry a null body; other methods
    /// stream the original body through.
    pub fn from_parts(method: Method, url: String, headers: &HeaderMap, body: Body) -> Self {
        let mut forward_headers = HeaderMap::new();
        for (name, value) in headers {
            if !is_hop_by_hop(name) {
                forward_headers.append(name.clone(), value.clone());
            }
        }

        let body = if method == Method::GET || method == Method::HEAD {
            None
        } else {
            Some(reqwest::Body::wrap_stream(body.into_data_stream()))
        };

        Self {
            method,
            url,
            headers: forward_headers,
            body,
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.as_str().eq_ignore_ascii_case(h))
}

/// Send a forward request and relay the upstream response. Non-2xx
/// responses pass through verbatim; only transport failures map to
/// `PROXY_TARGET_ERROR`.
pub async fn forward_request(
    client: &reqwest::Client,
    request: ForwardRequest,
) -> ProxyResult<Response> {
    let target = request.url.clone();
    let mut builder = client
        .request(request.method, &request.url)
        .headers(request.headers);
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let upstream = builder.send().await.map_err(|e| ProxyError::TargetError {
        target,
        message: e.to_string(),
    })?;

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ProxyError::TargetError {
            target: "response".to_string(),
            message: e.to_string(),
        })
}
