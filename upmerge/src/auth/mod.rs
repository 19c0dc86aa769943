//! Authentication and request-forgery checks.
//!
//! The upload pipeline never talks to a concrete authentication scheme. Handlers extract a
//! [`CurrentIdentity`](current_identity::CurrentIdentity), which asks the configured
//! [`Authenticator`] for the caller's [`Identity`]. The crate ships two authenticators:
//!
//! - [`session::SessionCookieAuthenticator`]: signed session token in a cookie
//! - [`proxy_header::ProxyHeaderAuthenticator`]: identity asserted by a trusted upstream proxy
//!
//! Several can be combined with [`AuthChain`]; the first one that yields an identity wins.
//!
//! The pre-flight check additionally uses a [`csrf::CsrfValidator`] and a
//! [`csrf::RefererAllowlist`].

pub mod csrf;
pub mod current_identity;
pub mod proxy_header;
pub mod session;

use async_trait::async_trait;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::Config;
use crate::errors::{Error, Result};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_id: String,
    pub name: Option<String>,
    /// Which authenticator vouched for this identity
    pub source: String,
}

/// Resolves the caller of a request.
///
/// Returns:
/// - `Ok(None)`: no credentials of this kind are present
/// - `Ok(Some(identity))`: credentials present and valid
/// - `Err(error)`: credentials present but unusable
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<Identity>>;
}

/// Tries each authenticator in order and returns the first identity found.
///
/// A failure in one method does not stop the others, so a valid session cookie still
/// authenticates a request that also carries an unrelated, stale header.
#[derive(Clone, Default)]
pub struct AuthChain {
    authenticators: Vec<(&'static str, Arc<dyn Authenticator>)>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push((name, authenticator));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// Build the chain described by the configuration. Session auth is tried before proxy headers.
    pub fn from_config(config: &Config) -> Self {
        let mut chain = Self::new();
        if config.auth.session.enabled {
            chain = chain.with("session", Arc::new(session::SessionCookieAuthenticator::new(config)));
        }
        if config.auth.proxy_header.enabled {
            chain = chain.with(
                "proxy header",
                Arc::new(proxy_header::ProxyHeaderAuthenticator::new(&config.auth.proxy_header.header_name)),
            );
        }
        chain
    }
}

#[async_trait]
impl Authenticator for AuthChain {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<Identity>> {
        let mut failures = Vec::new();

        for (name, authenticator) in &self.authenticators {
            match authenticator.authenticate(parts).await {
                Ok(Some(identity)) => {
                    debug!(account_id = %identity.account_id, method = name, "Authenticated caller");
                    return Ok(Some(identity));
                }
                Ok(None) => trace!(method = name, "No credentials for method"),
                // Server-side failures (e.g. missing secret_key) must not read as a 401
                Err(e @ (Error::Internal { .. } | Error::Other(_))) => return Err(e),
                Err(e) => {
                    trace!(method = name, "Authentication failed: {:?}", e);
                    failures.push((*name, e));
                }
            }
        }

        if !failures.is_empty() {
            trace!("All authentication attempts failed ({}): {:?}", failures.len(), failures);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<Option<Identity>>);

    #[async_trait]
    impl Authenticator for Fixed {
        async fn authenticate(&self, _parts: &Parts) -> Result<Option<Identity>> {
            match &self.0 {
                Ok(identity) => Ok(identity.clone()),
                Err(Error::Internal { operation }) => Err(Error::Internal {
                    operation: operation.clone(),
                }),
                Err(_) => Err(Error::Unauthenticated { message: None }),
            }
        }
    }

    fn identity(id: &str) -> Identity {
        Identity {
            account_id: id.to_string(),
            name: None,
            source: "test".to_string(),
        }
    }

    fn parts() -> Parts {
        axum::http::Request::builder().uri("/").body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_first_identity_wins() {
        let chain = AuthChain::new()
            .with("none", Arc::new(Fixed(Ok(None))))
            .with("first", Arc::new(Fixed(Ok(Some(identity("a"))))))
            .with("second", Arc::new(Fixed(Ok(Some(identity("b"))))));

        let found = chain.authenticate(&parts()).await.unwrap();
        assert_eq!(found, Some(identity("a")));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_chain() {
        let chain = AuthChain::new()
            .with("broken", Arc::new(Fixed(Err(Error::Unauthenticated { message: None }))))
            .with("ok", Arc::new(Fixed(Ok(Some(identity("a"))))));

        assert_eq!(chain.authenticate(&parts()).await.unwrap(), Some(identity("a")));
    }

    #[tokio::test]
    async fn test_all_failing_yields_none() {
        let chain = AuthChain::new()
            .with("broken", Arc::new(Fixed(Err(Error::Unauthenticated { message: None }))))
            .with("none", Arc::new(Fixed(Ok(None))));

        assert_eq!(chain.authenticate(&parts()).await.unwrap(), None);
        assert_eq!(AuthChain::new().authenticate(&parts()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_internal_failure_is_propagated() {
        let chain = AuthChain::new()
            .with(
                "misconfigured",
                Arc::new(Fixed(Err(Error::Internal {
                    operation: "JWT sessions: secret_key is required".to_string(),
                }))),
            )
            .with("ok", Arc::new(Fixed(Ok(Some(identity("a"))))));

        let result = chain.authenticate(&parts()).await;
        assert!(matches!(result, Err(Error::Internal { .. })));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config {
            secret_key: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(!AuthChain::from_config(&config).is_empty());

        config.auth.session.enabled = false;
        assert!(AuthChain::from_config(&config).is_empty());

        config.auth.proxy_header.enabled = true;
        assert!(!AuthChain::from_config(&config).is_empty());
    }
}
