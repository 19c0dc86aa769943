//! The extension endpoint.
//!
//! One path, three methods:
//!
//! - `GET` serves the upload page (and a CSRF token to signed-in callers)
//! - `POST` reads the multipart form and returns the client's JSON with the uploaded files merged
//!   in under `files`
//! - `OPTIONS` checks the caller's session, CSRF token and Referer before a browser commits to
//!   an upload

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, instrument};
use url::Url;

use crate::{
    AppState,
    api::{handlers::static_assets::html_asset, models::preflight::PreflightResponse},
    auth::current_identity::CurrentIdentity,
    errors::{Error, Result},
    static_assets,
    upload::{merge, read_form},
};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Methods advertised by the pre-flight response
pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";

/// Serve the static upload page.
#[instrument(skip_all)]
pub async fn get_page(State(state): State<AppState>, identity: Option<CurrentIdentity>) -> Result<Response> {
    let mut response = html_asset(static_assets::PAGE)?;

    if let (Some(CurrentIdentity(identity)), Some(csrf)) = (identity, state.csrf.as_ref()) {
        let token = HeaderValue::from_str(&csrf.issue(&identity)).map_err(|e| Error::Internal {
            operation: format!("encode CSRF token header: {e}"),
        })?;
        let name = header::HeaderName::from_bytes(state.config.security.csrf_header.as_bytes()).map_err(|e| Error::Internal {
            operation: format!("parse CSRF header name: {e}"),
        })?;
        response.headers_mut().insert(name, token);
    }

    Ok(response)
}

/// Merge the uploaded files into the submitted JSON document.
#[instrument(skip_all, fields(account_id = %identity.account_id))]
pub async fn merge_upload(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let mut multipart = multipart.map_err(|rejection| Error::MalformedInput {
        message: rejection.body_text(),
    })?;

    let form = read_form(&mut multipart, &state.config.limits).await?;
    let file_count = form.files.len();

    let body = merge::merge_upload(&form.json_text, form.files)?;

    info!(files = file_count, response_bytes = body.len(), "Merged upload into client document");

    Ok(([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response())
}

/// Authenticated pre-flight: validates the CSRF token and the Referer host.
#[instrument(skip_all, fields(account_id = %identity.account_id))]
pub async fn preflight(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
) -> Result<Response> {
    if let Some(csrf) = state.csrf.as_ref() {
        let header_name = state.config.security.csrf_header.as_str();
        let token = headers
            .get(header_name)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Forbidden {
                message: format!("missing {header_name} header"),
            })?;

        if !csrf.validate(token, &identity) {
            return Err(Error::Forbidden {
                message: "invalid CSRF token".to_string(),
            });
        }
    }

    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Forbidden {
            message: "missing Referer header".to_string(),
        })?;
    let host = Url::parse(referer)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .ok_or_else(|| Error::Forbidden {
            message: "unparsable Referer header".to_string(),
        })?;

    if !state.referers.contains(&host) {
        return Err(Error::Forbidden {
            message: format!("referer host {host} is not allowed"),
        });
    }

    debug!(referer_host = %host, "Pre-flight accepted");

    Ok((
        StatusCode::OK,
        [(header::ALLOW, ALLOWED_METHODS)],
        Json(PreflightResponse::ok(identity.account_id)),
    )
        .into_response())
}
