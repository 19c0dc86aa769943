//! HTTP helpers for embedded asset serving.

use axum::{
    body::Body,
    http::{HeaderValue, Response, header},
};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::static_assets;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Build a response for an embedded HTML asset.
///
/// A missing asset is a packaging mistake rather than a client error, so it surfaces as an
/// internal error.
pub fn html_asset(path: &str) -> Result<Response<Body>> {
    let Some(content) = static_assets::Assets::get(path) else {
        return Err(Error::Internal {
            operation: format!("load embedded asset {path}"),
        });
    };
    debug!(path, size = content.data.len(), "Serving embedded asset");

    let mut response = Response::new(Body::from(content.data.into_owned()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
    // The page is tiny and may carry per-user headers, so never cache it
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}
