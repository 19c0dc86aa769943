//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for the extension endpoint
//! - **[`models`]**: Response data structures
//!
//! # API Structure
//!
//! Everything lives on the one extension path (default `/service/extension/mytest`):
//!
//! - `GET`: the static upload page
//! - `POST`: multipart upload merged into the submitted JSON document
//! - `OPTIONS`: authenticated pre-flight with CSRF and Referer checks

pub mod handlers;
pub mod models;
