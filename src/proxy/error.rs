//! Proxy error taxonomy.
//!
//! Every proxy failure serializes as JSON `{error, code}` with a documented
//! HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors produced by the proxy pipeline.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Request path does not match `{mountPath}/{service}/{targetPath?}`.
    #[error("{0}")]
    PathInvalid(String),

    /// No service registered under the requested name.
    #[error("unknown proxy service {service:?}; available: {available}")]
    ServiceNotFound { service: String, available: String },

    /// The service's token header was absent.
    #[error("proxy token missing")]
    TokenMissing,

    /// The presented token's `exp` is in the past.
    #[error("proxy token expired")]
    TokenExpired,

    /// The presented token failed verification.
    #[error("proxy token invalid: {0}")]
    TokenInvalid(String),

    /// An upstream credential is not configured in the environment.
    #[error("credential not configured: {0} is not set")]
    CredentialMissing(&'static str),

    /// The upstream could not be reached.
    #[error("error contacting upstream {target}: {message}")]
    TargetError { target: String, message: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PathInvalid(_) => StatusCode::BAD_REQUEST,
            Self::ServiceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::TokenMissing | Self::TokenExpired | Self::TokenInvalid(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::CredentialMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TargetError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PathInvalid(_) => "PROXY_PATH_INVALID",
            Self::ServiceNotFound { .. } => "PROXY_SERVICE_NOT_FOUND",
            Self::TokenMissing => "PROXY_TOKEN_MISSING",
            Self::TokenExpired => "PROXY_TOKEN_EXPIRED",
            Self::TokenInvalid(_) => "PROXY_TOKEN_INVALID",
            Self::CredentialMissing(_) => "PROXY_CREDENTIAL_MISSING",
            Self::TargetError { .. } => "PROXY_TARGET_ERROR",
        }
    }
}

/// Wire shape of a proxy error.
#[derive(Debug, Serialize)]
struct ProxyErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ProxyErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::token::TokenError> for ProxyError {
    fn from(err: crate::token::TokenError) -> Self {
        match err {
            crate::token::TokenError::Expired => ProxyError::TokenExpired,
            crate::token::TokenError::Invalid(reason) => ProxyError::TokenInvalid(reason),
            crate::token::TokenError::InvalidRequest(reason) => ProxyError::TokenInvalid(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_mapping() {
        let cases: Vec<(ProxyError, StatusCode, &str)> = vec![
            (
                ProxyError::PathInvalid("x".into()),
                StatusCode::BAD_REQUEST,
                "PROXY_PATH_INVALID",
            ),
            (
                ProxyError::ServiceNotFound {
                    service: "x".into(),
                    available: "anthropic, github".into(),
                },
                StatusCode::NOT_FOUND,
                "PROXY_SERVICE_NOT_FOUND",
            ),
            (
                ProxyError::TokenMissing,
                StatusCode::UNAUTHORIZED,
                "PROXY_TOKEN_MISSING",
            ),
            (
                ProxyError::TokenExpired,
                StatusCode::UNAUTHORIZED,
                "PROXY_TOKEN_EXPIRED",
            ),
            (
                ProxyError::TokenInvalid("sig".into()),
                StatusCode::UNAUTHORIZED,
                "PROXY_TOKEN_INVALID",
            ),
            (
                ProxyError::CredentialMissing("GITHUB_TOKEN"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROXY_CREDENTIAL_MISSING",
            ),
            (
                ProxyError::TargetError {
                    target: "https://github.com".into(),
                    message: "refused".into(),
                },
                StatusCode::BAD_GATEWAY,
                "PROXY_TARGET_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }
}
