//! Embedded static assets served by the extension.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct Assets;

/// File served on `GET` of the extension path
pub const PAGE: &str = "page.html";
