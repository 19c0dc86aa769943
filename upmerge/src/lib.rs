//! # upmerge: multipart upload to JSON merge endpoint
//!
//! `upmerge` serves a single HTTP endpoint, registered as an extension under a host's extension
//! mount (`/service/extension/mytest` by default). A browser submits a multipart form with a JSON
//! document in the `jsondata` part and any number of files in `filesToUpload[]` parts; the
//! endpoint answers with the same document plus a `files` member mapping each uploaded file name
//! to a base64 `data:` URI.
//!
//! ## Request Flow
//!
//! Requests below the mount are routed by the [`extension::ExtensionDispatcher`] to the extension
//! owning the first path segment. The merge extension then handles three methods:
//!
//! - **GET** returns the upload page embedded in the binary ([`static_assets`]). Signed-in callers
//!   also receive a CSRF token in a response header.
//! - **POST** authenticates the caller ([`auth`]), streams the form in with per-part and total size
//!   limits ([`upload::form`]) and merges the files into the document ([`upload::merge`]).
//! - **OPTIONS** is an authenticated pre-flight that checks the CSRF token and the Referer host.
//!
//! Every failure is answered with a JSON [`errors::ErrorBody`] and a status code chosen by
//! [`errors::Error`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use upmerge::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = upmerge::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     upmerge::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!         })
//!         .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod extension;
mod static_assets;
pub mod telemetry;
pub mod upload;

#[cfg(test)]
pub mod test_utils;

use anyhow::Context;
use axum::{Router, routing::get};
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};

use crate::{
    auth::{
        AuthChain, Authenticator,
        csrf::{CsrfValidator, HmacCsrfValidator, HostAllowlist, RefererAllowlist},
    },
    extension::{ExtensionDispatcher, MergeExtension},
};

/// Application state shared across all request handlers.
///
/// The collaborators are trait objects so that embedders can swap in their own session store,
/// CSRF scheme or Referer policy.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .authenticator(Arc::new(AuthChain::from_config(&config)))
///     .referers(Arc::new(HostAllowlist::new(["mail.example.com"])))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub authenticator: Arc<dyn Authenticator>,
    /// `None` disables CSRF checks in the pre-flight
    pub csrf: Option<Arc<dyn CsrfValidator>>,
    pub referers: Arc<dyn RefererAllowlist>,
}

impl AppState {
    /// Build the default collaborators described by the configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let csrf = if config.security.csrf_enabled {
            let secret = config
                .secret_key
                .as_deref()
                .context("CSRF validation is enabled but secret_key is not configured")?;
            let validator = HmacCsrfValidator::new(secret).map_err(|e| anyhow::anyhow!("invalid CSRF secret: {e}"))?;
            Some(Arc::new(validator) as Arc<dyn CsrfValidator>)
        } else {
            None
        };

        Ok(Self::builder()
            .authenticator(Arc::new(AuthChain::from_config(&config)))
            .maybe_csrf(csrf)
            .referers(Arc::new(HostAllowlist::new(&config.security.allowed_referers)))
            .config(config)
            .build())
    }
}

/// Build the application router: health check plus everything under the extension mount.
pub fn build_router(dispatcher: &ExtensionDispatcher) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(dispatcher.router())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Main application struct that owns the router and the extension registration.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] builds the shared state and registers the merge extension
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: once the shutdown signal fires, in-flight requests drain, the extension is
///    unregistered and telemetry is flushed
pub struct Application {
    router: Router,
    config: Config,
    dispatcher: ExtensionDispatcher,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting upmerge with configuration: {:#?}", config);
        config.validate()?;

        let state = AppState::from_config(config.clone())?;
        let dispatcher = ExtensionDispatcher::new(&config.extension.mount);
        dispatcher.register(&MergeExtension::new(state))?;

        let router = build_router(&dispatcher);

        Ok(Self {
            router,
            config,
            dispatcher,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "upmerge listening on http://{}, endpoint at {}",
            bind_addr,
            self.config.extension.public_path()
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.dispatcher.unregister(&self.config.extension.name);

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::create_test_config;

    #[tokio::test]
    async fn test_healthz_endpoint() {
        let server = Application::new(create_test_config()).unwrap().into_test_server();

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[tokio::test]
    async fn test_endpoint_served_at_public_path() {
        let config = create_test_config();
        let path = config.extension.public_path();
        assert_eq!(path, "/service/extension/mytest");

        let server = Application::new(config).unwrap().into_test_server();

        server.get(&path).await.assert_status_ok();
        server.get("/service/extension/unknown").await.assert_status_not_found();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = create_test_config();
        config.secret_key = None;
        config.security.csrf_enabled = false;
        assert!(Application::new(config).is_err());

        let mut config = create_test_config();
        config.extension.path = "/a/b".to_string();
        assert!(Application::new(config).is_err());
    }

    #[test]
    fn test_csrf_disabled_state() {
        let mut config = create_test_config();
        config.security.csrf_enabled = false;

        let state = AppState::from_config(config).unwrap();
        assert!(state.csrf.is_none());
    }

    #[test]
    fn test_csrf_requires_secret() {
        let mut config = create_test_config();
        config.secret_key = None;
        config.auth.session.enabled = false;

        assert!(AppState::from_config(config).is_err());
    }
}
