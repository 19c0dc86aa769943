//! Session token authentication: an HS256 JWT carried in a cookie.

use async_trait::async_trait;
use axum::http::{header, request::Parts};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, trace};

use crate::{
    auth::{Authenticator, Identity},
    config::Config,
    errors::{Error, Result},
};

pub const SOURCE: &str = "session";

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,          // Account id
    pub name: Option<String>, // Display name
    pub exp: i64,             // Expiration time
    pub iat: i64,             // Issued at
}

impl SessionClaims {
    pub fn new(identity: &Identity, expiry: Duration) -> Self {
        let now = Utc::now();
        let exp = now + expiry;

        Self {
            sub: identity.account_id.clone(),
            name: identity.name.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Self {
            account_id: claims.sub,
            name: claims.name,
            source: SOURCE.to_string(),
        }
    }
}

fn secret_key(config: &Config) -> Result<&str> {
    config.secret_key.as_deref().ok_or_else(|| Error::Internal {
        operation: "JWT sessions: secret_key is required".to_string(),
    })
}

/// Create a session token for an identity
pub fn issue_session_token(identity: &Identity, config: &Config) -> Result<String> {
    let claims = SessionClaims::new(identity, config.auth.session.token_expiry);
    let key = EncodingKey::from_secret(secret_key(config)?.as_bytes());
    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode a session token
pub fn verify_session_token(token: &str, config: &Config) -> Result<Identity> {
    let key = DecodingKey::from_secret(secret_key(config)?.as_bytes());

    let token_data = decode::<SessionClaims>(token, &key, &Validation::default()).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, invalid claims, expired tokens
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::ExpiredSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Error::Unauthenticated {
            message: Some("Invalid session".to_string()),
        },

        // Key problems and anything unexpected are server errors
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    Ok(Identity::from(token_data.claims))
}

/// Reads the session cookie named in `auth.session.cookie_name`.
pub struct SessionCookieAuthenticator {
    config: Config,
}

impl SessionCookieAuthenticator {
    pub fn new(config: &Config) -> Self {
        Self { config: config.clone() }
    }
}

#[async_trait]
impl Authenticator for SessionCookieAuthenticator {
    #[instrument(skip_all)]
    async fn authenticate(&self, parts: &Parts) -> Result<Option<Identity>> {
        let cookie_name = &self.config.auth.session.cookie_name;
        let mut last_error = None;

        for cookie_header in parts.headers.get_all(header::COOKIE) {
            let cookie_str = cookie_header.to_str().map_err(|e| Error::MalformedInput {
                message: format!("Invalid cookie header: {e}"),
            })?;

            for cookie in cookie_str.split(';') {
                let Some((name, value)) = cookie.trim().split_once('=') else {
                    continue;
                };
                if name != cookie_name {
                    continue;
                }
                // Browsers may hold several cookies with the same name; any valid one will do
                match verify_session_token(value, &self.config) {
                    Ok(identity) => return Ok(Some(identity)),
                    Err(e) => {
                        trace!("Rejected session cookie: {}", e);
                        last_error = Some(e);
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}
