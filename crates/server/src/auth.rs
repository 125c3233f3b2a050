//! Bearer token handling.
//!
//! Tokens are JWTs issued by the upstream identity provider. The user id is
//! the `sub` claim and must carry the configured prefix (`user_` by default).
//! With `JWT_SECRET` set, tokens are verified as HS256 including expiry;
//! otherwise the signature is assumed to have been checked upstream and only
//! the claims are read.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use agentrun_core::config::AuthConfig;

#[derive(Debug, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No valid authentication credentials found")]
    MissingCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid token payload - missing user ID")]
    MissingUserId,
    #[error("Invalid user ID format")]
    InvalidUserId,
}

/// Decodes tokens and extracts user ids.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    user_id_prefix: String,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let (key, validation) = match &config.jwt_secret {
            Some(secret) => {
                let mut validation = Validation::new(Algorithm::HS256);
                validation.validate_aud = false;
                (DecodingKey::from_secret(secret.as_bytes()), validation)
            }
            None => {
                let mut validation = Validation::default();
                validation.insecure_disable_signature_validation();
                validation.validate_exp = false;
                validation.validate_aud = false;
                validation.required_spec_claims.clear();
                (DecodingKey::from_secret(&[]), validation)
            }
        };
        Self {
            key,
            validation,
            user_id_prefix: config.user_id_prefix.clone(),
        }
    }

    /// The user id carried by `token`.
    pub fn user_id(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;
        let sub = data.claims.sub.ok_or(AuthError::MissingUserId)?;
        if !sub.starts_with(&self.user_id_prefix) {
            return Err(AuthError::InvalidUserId);
        }
        Ok(sub)
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// User id from the `Authorization` header.
pub fn user_id_from_header(verifier: &TokenVerifier, headers: &HeaderMap) -> Result<String, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;
    verifier.user_id(token)
}

/// User id for streaming endpoints.
///
/// EventSource clients cannot set headers, so a `token` query parameter is
/// tried first and the header second. Any failure collapses to
/// [`AuthError::MissingCredentials`].
pub fn user_id_from_stream_auth(
    verifier: &TokenVerifier,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<String, AuthError> {
    if let Some(user_id) = query_token.and_then(|t| verifier.user_id(t).ok()) {
        return Ok(user_id);
    }
    if let Some(user_id) = bearer_token(headers).and_then(|t| verifier.user_id(t).ok()) {
        return Ok(user_id);
    }
    Err(AuthError::MissingCredentials)
}
