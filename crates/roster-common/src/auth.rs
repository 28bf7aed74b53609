//! Authentication primitives for the roster service.
//!
//! - **Passwords**: Argon2id hashing and verification
//! - **Tokens**: HS256-signed bearer tokens carrying one `account` claim

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Issuer stamped into every token and required on verification.
pub const ISSUER: &str = "roster";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    /// The presented token is malformed, wrongly signed, expired or is
    /// missing a required claim. Deliberately carries no detail.
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("password hashing failed: {0}")]
    HashError(String),
    #[error("signing secret must not be empty")]
    InvalidKey,
}

// ── Password Hashing (Argon2id) ─────────────────────────────────────

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| AuthError::HashError(e.to_string()))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::HashError(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    use argon2::{password_hash::PasswordHash, Argon2, PasswordVerifier};

    let parsed_hash = PasswordHash::new(hash).map_err(|e| AuthError::HashError(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// ── Bearer tokens ───────────────────────────────────────────────────

/// Claims embedded in a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated identity (account name).
    pub account: String,
    /// Issuer, always [`ISSUER`].
    pub iss: String,
    /// Issued-at time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiration time (Unix timestamp). Absent when the authority issues
    /// non-expiring tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Issues and verifies signed bearer tokens.
///
/// The signing secret is fixed at construction and never changes for the
/// lifetime of the authority, so a single instance is shared read-only by
/// every request.
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Option<Duration>,
}

impl TokenAuthority {
    /// Build an authority from a shared secret.
    ///
    /// `ttl = None` issues tokens without an `exp` claim; they stay valid for
    /// as long as the secret does.
    pub fn new(secret: &[u8], ttl: Option<Duration>) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::InvalidKey);
        }
        Ok(Self::with_secret(secret, ttl))
    }

    /// Build an authority around a random 256-bit secret.
    /// Tokens it issues will not verify after a restart.
    pub fn ephemeral(ttl: Option<Duration>) -> Self {
        Self::with_secret(&rand::random::<[u8; 32]>(), ttl)
    }

    fn with_secret(secret: &[u8], ttl: Option<Duration>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        match ttl {
            Some(_) => validation.set_required_spec_claims(&["iss", "exp"]),
            None => {
                validation.set_required_spec_claims(&["iss"]);
                validation.validate_exp = false;
            }
        }

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Lifetime of issued tokens, if they expire at all.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Sign a token for `identity`.
    pub fn issue(&self, identity: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            account: identity.to_string(),
            iss: ISSUER.into(),
            iat: Some(now),
            exp: self
                .ttl
                .map(|ttl| now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Signing)
    }

    /// Check a token's signature and claims and return the embedded identity.
    ///
    /// Every failure collapses into [`AuthError::Unauthenticated`]; the
    /// underlying reason is only logged at debug level.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(reason = ?e.kind(), "token verification failed");
                AuthError::Unauthenticated
            })?;
        Ok(data.claims.account)
    }
}
