//! Multipart upload handling: reading the form ([`form`]) and merging it into the client's
//! JSON document ([`merge`]).

pub mod form;
pub mod merge;

pub use form::{FILES_FIELD, IncomingForm, JSON_FIELD, read_form};
pub use merge::{FileEntry, FilesMap, merge_objects, merge_upload};
