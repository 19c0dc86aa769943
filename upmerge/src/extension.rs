//! Extension registration and dispatch.
//!
//! The host exposes every extension under a common mount (`/service/extension` by default).
//! Each extension owns exactly one path segment below it and is handed requests with that
//! prefix stripped, so its own router only ever sees paths relative to itself.
//!
//! Registration is dynamic: the routing table lives behind an [`ArcSwap`], so extensions can be
//! registered and unregistered while the server is running without locking the request path.

use arc_swap::ArcSwap;
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request, State},
    http::Uri,
    response::Response,
    routing::{any, get},
};
use std::{collections::HashMap, sync::Arc};
use tower::ServiceExt;
use tracing::{debug, info, instrument};

use crate::{
    AppState,
    api::handlers::upload,
    errors::{Error, Result},
};

/// Allowance for multipart framing (boundaries and part headers) on top of the payload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// A unit of functionality mounted by the [`ExtensionDispatcher`].
pub trait Extension: Send + Sync {
    /// Identifier used for registration and unregistration
    fn name(&self) -> &str;

    /// The single path segment this extension owns, with a leading slash (e.g. `/mytest`)
    fn path(&self) -> &str;

    /// Routes relative to [`Extension::path`]; `/` is the extension root.
    fn router(&self) -> Router;
}

#[derive(Clone)]
struct Registered {
    name: String,
    router: Router,
}

/// Routes requests under the mount point to the extension owning the first path segment.
#[derive(Clone)]
pub struct ExtensionDispatcher {
    mount: String,
    routes: Arc<ArcSwap<HashMap<String, Registered>>>,
}

fn segment_of(path: &str) -> &str {
    path.trim_matches('/')
}

impl ExtensionDispatcher {
    pub fn new(mount: &str) -> Self {
        Self {
            mount: mount.trim_end_matches('/').to_string(),
            routes: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Register an extension. Fails if its path segment is already taken.
    pub fn register(&self, extension: &dyn Extension) -> Result<()> {
        let segment = segment_of(extension.path());
        if segment.is_empty() || segment.contains('/') {
            return Err(Error::Internal {
                operation: format!("register extension {}: invalid path \"{}\"", extension.name(), extension.path()),
            });
        }

        let entry = Registered {
            name: extension.name().to_string(),
            router: extension.router(),
        };

        let mut taken_by = None;
        self.routes.rcu(|current| {
            let mut next = HashMap::clone(current);
            taken_by = next.get(segment).map(|existing| existing.name.clone());
            if taken_by.is_none() {
                next.insert(segment.to_string(), entry.clone());
            }
            next
        });

        if let Some(existing) = taken_by {
            return Err(Error::Internal {
                operation: format!(
                    "register extension {}: {}/{} is already served by {}",
                    extension.name(),
                    self.mount,
                    segment,
                    existing
                ),
            });
        }

        info!(extension = extension.name(), path = %format!("{}/{}", self.mount, segment), "Registered extension");
        Ok(())
    }

    /// Remove every route owned by the named extension. Returns whether anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut removed = false;
        self.routes.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.retain(|_, registered| registered.name != name);
            removed = next.len() != current.len();
            next
        });

        if removed {
            info!(extension = name, "Unregistered extension");
        }
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.routes.load().values().any(|registered| registered.name == name)
    }

    /// Router serving everything below the mount point.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&format!("{}/{{*rest}}", self.mount), any(dispatch))
            .with_state(self.clone())
    }

    #[instrument(skip_all, fields(path = %request.uri().path()))]
    async fn dispatch(&self, request: Request) -> Result<Response> {
        let full_path = request.uri().path().to_string();
        let relative = full_path
            .strip_prefix(&self.mount)
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| Error::NotFound { path: full_path.clone() })?;

        let (segment, remainder) = relative.split_once('/').unwrap_or((relative, ""));

        let router = match self.routes.load().get(segment) {
            Some(registered) => {
                debug!(extension = %registered.name, "Dispatching to extension");
                registered.router.clone()
            }
            None => return Err(Error::NotFound { path: full_path }),
        };

        let (mut parts, body) = request.into_parts();
        let rewritten = match parts.uri.query() {
            Some(query) => format!("/{remainder}?{query}"),
            None => format!("/{remainder}"),
        };
        parts.uri = Uri::try_from(rewritten).map_err(|e| Error::MalformedInput {
            message: format!("Invalid request path: {e}"),
        })?;

        match router.oneshot(Request::from_parts(parts, body)).await {
            Ok(response) => Ok(response),
            Err(never) => match never {},
        }
    }
}

async fn dispatch(State(dispatcher): State<ExtensionDispatcher>, request: Request) -> Result<Response> {
    dispatcher.dispatch(request).await
}

/// The multipart-to-JSON merge endpoint.
pub struct MergeExtension {
    state: AppState,
}

impl MergeExtension {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl Extension for MergeExtension {
    fn name(&self) -> &str {
        &self.state.config.extension.name
    }

    fn path(&self) -> &str {
        &self.state.config.extension.path
    }

    fn router(&self) -> Router {
        let body_limit = usize::try_from(self.state.config.limits.max_total_size)
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD);

        Router::new()
            .route(
                "/",
                get(upload::get_page).post(upload::merge_upload).options(upload::preflight),
            )
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(self.state.clone())
    }
}
