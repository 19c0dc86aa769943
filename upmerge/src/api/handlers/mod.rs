//! HTTP request handlers.
//!
//! - [`upload`]: the extension endpoint (page, merge, pre-flight)
//! - [`static_assets`]: embedded page serving
//!
//! Handlers return [`crate::errors::Result`], which converts every failure into a structured
//! JSON error response.

pub mod static_assets;
pub mod upload;
