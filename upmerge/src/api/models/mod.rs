//! API response data models.
//!
//! The merge endpoint returns the caller's own JSON document, so it has no model here. Failures
//! use [`crate::errors::ErrorBody`].

pub mod preflight;
