//! JWT Authentication
//!
//! Validates tokens issued by an external auth provider; this server never
//! issues tokens. A validated subject claim maps deterministically to a
//! [`UserId`], so the same login always lands on the same balances.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::bet::UserId;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim. `None` accepts any issuer.
    pub issuer: Option<String>,
    /// Expected audience claim. `None` accepts any audience.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (external providers).
    pub public_key_pem: Option<String>,
    /// HS256 shared secret (simple setups).
    pub secret: Option<String>,
}

impl AuthConfig {
    /// Build from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
        }
    }

    /// Whether any key material is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims we read from provider tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the provider's user id.
    pub sub: String,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
}

impl TokenClaims {
    /// Deterministic [`UserId`] from the subject claim.
    pub fn user_id(&self) -> UserId {
        let mut hasher = Sha256::new();
        hasher.update(b"crashpoint-user:");
        hasher.update(self.sub.as_bytes());
        let hash = hasher.finalize();
        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        UserId::new(id)
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No key material configured on the server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token expired.
    #[error("token expired")]
    Expired,
    /// Signature, format, or claim validation failed.
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Validate a token and extract its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let (algorithm, key) = match (&config.public_key_pem, &config.secret) {
        (Some(pem), _) => (
            Algorithm::RS256,
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::Invalid(e.to_string()))?,
        ),
        (None, Some(secret)) => (Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes())),
        (None, None) => return Err(AuthError::NotConfigured),
    };

    let mut validation = Validation::new(algorithm);
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    decode::<TokenClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(err.to_string()),
        })
}
