//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs signed with the gateway secret. A request is either
//! on the skip-list (matched by path prefix), or must carry
//! `<header>: Bearer <token>` with a valid signature and an unexpired `exp`.
//! Validation is stateless and safe to share across all requests.
use http::{HeaderMap, HeaderName};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;

use crate::{config::models::AuthSettings, core::context::AuthClaims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("malformed credential")]
    MalformedCredential,
    /// Signature, expiry or claim decoding failed. The cause is logged, never returned.
    #[error("invalid token")]
    InvalidToken,
}

impl AuthError {
    /// Message returned to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingCredential | AuthError::MalformedCredential => {
                "Invalid or missing token"
            }
            AuthError::InvalidToken => "Invalid token",
        }
    }

    /// Metric label for the failure.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing",
            AuthError::MalformedCredential => "malformed",
            AuthError::InvalidToken => "invalid",
        }
    }
}

/// Issuers encode the subject either as a number or as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubjectId {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    user_id: SubjectId,
    #[serde(default)]
    email: String,
    exp: i64,
}

impl From<TokenClaims> for AuthClaims {
    fn from(claims: TokenClaims) -> Self {
        let subject_id = match claims.user_id {
            SubjectId::Number(id) => id.to_string(),
            SubjectId::Text(id) => id,
        };
        AuthClaims {
            subject_id,
            email: claims.email,
            expires_at: claims.exp,
        }
    }
}

pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    skip_paths: Vec<String>,
    header: HeaderName,
}

impl TokenValidator {
    pub fn new(secret: &str, skip_paths: Vec<String>, header: HeaderName) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            skip_paths,
            header,
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Result<Self, http::header::InvalidHeaderName> {
        let header = HeaderName::from_bytes(settings.header.as_bytes())?;
        Ok(Self::new(
            &settings.jwt_secret,
            settings.skip_paths.clone(),
            header,
        ))
    }

    /// Prefix match against the skip-list, so `/health-anything` is skipped too.
    pub fn should_skip(&self, path: &str) -> bool {
        self.skip_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Pull the raw token out of `<header>: Bearer <token>`.
    pub fn extract<'h>(&self, headers: &'h HeaderMap) -> Result<&'h str, AuthError> {
        let value = headers
            .get(&self.header)
            .ok_or(AuthError::MissingCredential)?;
        let value = value
            .to_str()
            .map_err(|_| AuthError::MalformedCredential)?;

        let (scheme, token) = value
            .split_once(' ')
            .ok_or(AuthError::MalformedCredential)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::MalformedCredential);
        }
        let token = token.trim();
        if token.is_empty() || token.contains(' ') {
            return Err(AuthError::MalformedCredential);
        }
        Ok(token)
    }

    /// Verify signature and expiry and decode the identity claims.
    pub fn validate(&self, token: &str) -> Result<AuthClaims, AuthError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims.into())
            .map_err(|e| {
                tracing::debug!(error = %e, "Token validation failed");
                AuthError::InvalidToken
            })
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthClaims, AuthError> {
        let token = self.extract(headers)?;
        self.validate(token)
    }
}
