//! The upload-to-JSON merge pipeline.
//!
//! Every uploaded file becomes a data URI (`data:<type>;base64,<payload>`) stored under its
//! sanitized filename in a `files` map. That map is merged over the client's JSON object:
//! the client's own top-level keys pass through untouched, and any `files` key it sent is
//! replaced.
//!
//! The client document is parsed into raw JSON values, so everything except `files` is written
//! back exactly as it was received (number formatting, escapes and inner whitespace included).

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bytes::Bytes;
use serde_json::value::RawValue;
use std::collections::BTreeMap;

use crate::errors::{Error, Result};

/// Key under which the encoded files are merged into the client document.
pub const FILES_KEY: &str = "files";

/// Content type recorded for parts that do not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Client document: top-level keys mapped to their raw JSON text.
pub type Document = BTreeMap<String, Box<RawValue>>;

/// Sanitized filename to data URI. Later entries replace earlier ones with the same name.
pub type FilesMap = BTreeMap<String, String>;

/// One uploaded file, held in memory until it is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl FileEntry {
    /// Build an entry from the filename a client submitted, keeping only its final path segment.
    pub fn new(submitted_name: &str, content_type: Option<&str>, bytes: Bytes) -> Result<Self> {
        let filename = sanitize_filename(submitted_name).ok_or_else(|| Error::MalformedInput {
            message: format!("Invalid filename '{submitted_name}'"),
        })?;

        Ok(Self {
            filename: filename.to_string(),
            content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            bytes,
        })
    }

    pub fn to_data_uri(&self) -> String {
        data_uri(&self.content_type, &self.bytes)
    }
}

/// Strip directory components from a submitted filename.
///
/// Some browsers send the full client-side path (`C:\fakepath\evil.txt`), so both separators
/// count. Returns `None` when nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<&str> {
    let last = name.rsplit(['/', '\\']).next()?;
    match last {
        "" | "." | ".." => None,
        _ => Some(last),
    }
}

/// Encode bytes as a data URI with the declared content type. The type is not validated.
pub fn data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, BASE64_STANDARD.encode(bytes))
}

/// Encode the entries into a [`FilesMap`], in order, so duplicate names keep the last upload.
pub fn files_map<I>(entries: I) -> FilesMap
where
    I: IntoIterator<Item = FileEntry>,
{
    entries.into_iter().map(|entry| (entry.filename.clone(), entry.to_data_uri())).collect()
}

/// Shallow merge: a copy of `a` with every key of `b` set over it.
pub fn merge_objects<K, V>(a: &BTreeMap<K, V>, b: &BTreeMap<K, V>) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut merged = a.clone();
    for (key, value) in b {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Parse the client's JSON text. Anything other than a JSON object is rejected.
pub fn parse_document(json_text: &str) -> Result<Document> {
    serde_json::from_str(json_text).map_err(|e| Error::MalformedInput {
        message: format!("jsondata must be a JSON object: {e}"),
    })
}

/// Run the whole pipeline and return the merged document as JSON text.
pub fn merge_upload<I>(json_text: &str, files: I) -> Result<String>
where
    I: IntoIterator<Item = FileEntry>,
{
    let document = parse_document(json_text)?;

    let files = serde_json::value::to_raw_value(&files_map(files)).map_err(|e| Error::Internal {
        operation: format!("encode files map: {e}"),
    })?;
    let wrapper = Document::from([(FILES_KEY.to_string(), files)]);

    let merged = merge_objects(&document, &wrapper);

    serde_json::to_string(&merged).map_err(|e| Error::Internal {
        operation: format!("serialize merged document: {e}"),
    })
}
