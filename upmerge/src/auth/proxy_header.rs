//! Identity asserted by a trusted upstream proxy (oauth2-proxy, vouch, a groupware front end).

use async_trait::async_trait;
use axum::http::{HeaderName, request::Parts};

use crate::{
    auth::{Authenticator, Identity},
    errors::{Error, Result},
};

pub const SOURCE: &str = "proxy-header";

pub struct ProxyHeaderAuthenticator {
    header_name: String,
}

impl ProxyHeaderAuthenticator {
    pub fn new(header_name: &str) -> Self {
        Self {
            header_name: header_name.to_ascii_lowercase(),
        }
    }
}

#[async_trait]
impl Authenticator for ProxyHeaderAuthenticator {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<Identity>> {
        let Ok(header_name) = HeaderName::from_bytes(self.header_name.as_bytes()) else {
            return Err(Error::Internal {
                operation: format!("parse proxy header name '{}'", self.header_name),
            });
        };

        let Some(value) = parts.headers.get(&header_name) else {
            return Ok(None);
        };

        let account_id = value
            .to_str()
            .map_err(|e| Error::MalformedInput {
                message: format!("Invalid {} header: {e}", self.header_name),
            })?
            .trim();

        if account_id.is_empty() {
            return Err(Error::Unauthenticated {
                message: Some(format!("Empty {} header", self.header_name)),
            });
        }

        Ok(Some(Identity {
            account_id: account_id.to_string(),
            name: None,
            source: SOURCE.to_string(),
        }))
    }
}
