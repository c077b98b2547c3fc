//! Proxy token service.
//!
//! Issues and verifies the short-lived HS256 JWTs that sandboxes present to
//! the credential proxy. The sandbox never sees a real upstream secret; the
//! proxy token is the only credential it holds.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default token lifetime when the caller does not specify one.
pub const DEFAULT_TOKEN_TTL: &str = "2h";

/// Result type for token operations.
pub type TokenResult<T> = Result<T, TokenError>;

/// Errors from token creation and verification.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token's `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// Any other verification failure: bad signature, wrong algorithm,
    /// missing claims, malformed token.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Bad inputs to `create`.
    #[error("invalid token request: {0}")]
    InvalidRequest(String),
}

/// Claims embedded in a proxy token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyClaims {
    pub sandbox_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Inputs to `TokenService::create`.
#[derive(Debug, Clone)]
pub struct CreateToken {
    pub sandbox_id: String,
    pub session_id: Option<String>,
    /// `{n}m`, `{n}h`, `{n}d`, or bare seconds. Defaults to two hours.
    pub expires_in: Option<String>,
}

/// HS256 signer/verifier around a single shared secret. The secret is read
/// once at startup and never rotated by the control plane.
#[derive(Clone)]
pub struct TokenService {
    secret: String,
}

impl TokenService {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sign a proxy token.
    pub fn create(&self, request: CreateToken) -> TokenResult<String> {
        if self.secret.is_empty() {
            return Err(TokenError::InvalidRequest("secret must not be empty".into()));
        }
        if request.sandbox_id.is_empty() {
            return Err(TokenError::InvalidRequest(
                "sandboxId must not be empty".into(),
            ));
        }

        let ttl = parse_expires_in(request.expires_in.as_deref().unwrap_or(DEFAULT_TOKEN_TTL))?;
        let iat = Utc::now().timestamp();
        let claims = ProxyClaims {
            sandbox_id: request.sandbox_id,
            session_id: request.session_id,
            exp: iat + ttl,
            iat,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Verify a proxy token and return its claims. Expiry is classified
    /// separately from every other failure.
    pub fn verify(&self, token: &str) -> TokenResult<ProxyClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        let data = decode::<ProxyClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        })?;

        if data.claims.sandbox_id.is_empty() {
            return Err(TokenError::Invalid("sandboxId claim missing".into()));
        }
        Ok(data.claims)
    }
}

/// Parse a token lifetime into seconds. Accepts `{n}m`, `{n}h`, `{n}d`, or
/// a bare number of seconds.
pub fn parse_expires_in(value: &str) -> TokenResult<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TokenError::InvalidRequest("empty expiresIn".into()));
    }

    let (digits, multiplier) = match value.as_bytes()[value.len() - 1] {
        b'm' => (&value[..value.len() - 1], 60),
        b'h' => (&value[..value.len() - 1], 3_600),
        b'd' => (&value[..value.len() - 1], 86_400),
        _ => (value, 1),
    };

    let n: i64 = digits
        .parse()
        .map_err(|_| TokenError::InvalidRequest(format!("invalid expiresIn: {value:?}")))?;
    if n < 0 {
        return Err(TokenError::InvalidRequest(format!(
            "negative expiresIn: {value:?}"
        )));
    }
    Ok(n * multiplier)
}
