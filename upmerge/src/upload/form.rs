//! Reading the multipart submission into an [`IncomingForm`].
//!
//! Parts are consumed as they stream in and size limits are checked chunk by chunk, so an
//! oversized upload is rejected before it is fully buffered.

use axum::{
    extract::{Multipart, multipart::MultipartError},
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::config::UploadLimitsConfig;
use crate::errors::{Error, Result};
use crate::upload::merge::FileEntry;

/// Name of the part carrying the client's JSON document.
pub const JSON_FIELD: &str = "jsondata";

/// Name shared by all file parts (`<input type="file" name="filesToUpload[]" multiple>`).
pub const FILES_FIELD: &str = "filesToUpload[]";

/// The parts of a submission the merge pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingForm {
    pub json_text: String,
    /// Non-empty file parts, in submission order
    pub files: Vec<FileEntry>,
}

/// Running byte count across all parts of one request.
struct Budget<'a> {
    limits: &'a UploadLimitsConfig,
    total: u64,
}

impl Budget<'_> {
    /// Account for `chunk_len` more bytes of a part that already holds `buffered` bytes.
    fn charge(&mut self, part: &str, buffered: usize, chunk_len: usize, part_limit: u64) -> Result<()> {
        self.total += chunk_len as u64;
        if (buffered + chunk_len) as u64 > part_limit {
            return Err(Error::PayloadTooLarge {
                message: format!("Part '{part}' exceeds maximum allowed size of {part_limit} bytes"),
            });
        }
        if self.total > self.limits.max_total_size {
            return Err(Error::PayloadTooLarge {
                message: format!("Upload exceeds maximum allowed size of {} bytes", self.limits.max_total_size),
            });
        }
        Ok(())
    }
}

fn body_limit_error(e: &MultipartError) -> Option<Error> {
    (e.status() == StatusCode::PAYLOAD_TOO_LARGE).then(|| Error::PayloadTooLarge {
        message: format!("Request body too large: {}", e.body_text()),
    })
}

/// Read every part of the submission.
///
/// Unknown parts are drained and ignored, zero-length file parts are dropped.
pub async fn read_form(multipart: &mut Multipart, limits: &UploadLimitsConfig) -> Result<IncomingForm> {
    let mut budget = Budget { limits, total: 0 };
    let mut json_text: Option<String> = None;
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        body_limit_error(&e).unwrap_or_else(|| Error::MalformedInput {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        })
    })? {
        let name = field.name().unwrap_or("").to_string();

        let part_limit = match name.as_str() {
            JSON_FIELD => limits.max_json_size,
            FILES_FIELD => limits.max_file_size,
            _ => limits.max_total_size,
        };

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            body_limit_error(&e).unwrap_or_else(|| Error::Io {
                part: name.clone(),
                message: e.body_text(),
            })
        })? {
            budget.charge(&name, buffer.len(), chunk.len(), part_limit)?;
            buffer.extend_from_slice(&chunk);
        }
        let bytes: Bytes = buffer.freeze();

        match name.as_str() {
            JSON_FIELD => {
                if json_text.is_some() {
                    return Err(Error::MalformedInput {
                        message: format!("Expected exactly one '{JSON_FIELD}' part"),
                    });
                }
                let text = String::from_utf8(bytes.to_vec()).map_err(|_| Error::MalformedInput {
                    message: format!("'{JSON_FIELD}' must be valid UTF-8"),
                })?;
                json_text = Some(text);
            }
            FILES_FIELD => {
                if bytes.is_empty() {
                    trace!(filename = ?field.file_name(), "Skipping empty file part");
                    continue;
                }
                let submitted = field.file_name().ok_or_else(|| Error::MalformedInput {
                    message: format!("'{FILES_FIELD}' part is missing a filename"),
                })?;
                let entry = FileEntry::new(submitted, field.content_type(), bytes)?;
                debug!(
                    filename = %entry.filename,
                    content_type = %entry.content_type,
                    size = entry.bytes.len(),
                    "Received file part"
                );
                files.push(entry);
            }
            other => {
                trace!(part = other, "Ignoring unexpected part");
            }
        }
    }

    let json_text = json_text.ok_or_else(|| Error::MissingField {
        field: JSON_FIELD.to_string(),
    })?;

    debug!(files = files.len(), total_bytes = budget.total, "Multipart submission read");

    Ok(IncomingForm { json_text, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::post};
    use axum_test::{
        TestServer,
        multipart::{MultipartForm, Part},
    };
    use serde_json::{Value, json};

    fn limits() -> UploadLimitsConfig {
        UploadLimitsConfig {
            max_json_size: 64,
            max_file_size: 32,
            max_total_size: 100,
        }
    }

    // Echo what was read so assertions can inspect it
    async fn echo(mut multipart: Multipart) -> Result<axum::Json<Value>> {
        let form = read_form(&mut multipart, &limits()).await?;
        let files: Vec<Value> = form
            .files
            .iter()
            .map(|f| json!({"filename": f.filename, "content_type": f.content_type, "size": f.bytes.len()}))
            .collect();
        Ok(axum::Json(json!({"json_text": form.json_text, "files": files})))
    }

    fn server() -> TestServer {
        TestServer::new(Router::new().route("/", post(echo))).unwrap()
    }

    #[tokio::test]
    async fn test_reads_json_and_files_in_order() {
        let form = MultipartForm::new()
            .add_part(FILES_FIELD, Part::bytes(b"one".to_vec()).file_name("a.txt").mime_type("text/plain"))
            .add_text(JSON_FIELD, r#"{"a":1}"#)
            .add_part(FILES_FIELD, Part::bytes(b"two".to_vec()).file_name("b.bin").mime_type("application/x-b"));

        let response = server().post("/").multipart(form).await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["json_text"], r#"{"a":1}"#);
        assert_eq!(
            body["files"],
            json!([
                {"filename": "a.txt", "content_type": "text/plain", "size": 3},
                {"filename": "b.bin", "content_type": "application/x-b", "size": 3},
            ])
        );
    }

    #[tokio::test]
    async fn test_empty_file_parts_are_dropped() {
        let form = MultipartForm::new()
            .add_text(JSON_FIELD, "{}")
            .add_part(FILES_FIELD, Part::bytes(Vec::new()).file_name("empty.txt").mime_type("text/plain"))
            .add_part(FILES_FIELD, Part::bytes(b"x".to_vec()).file_name("full.txt").mime_type("text/plain"));

        let response = server().post("/").multipart(form).await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["files"].as_array().unwrap().len(), 1);
        assert_eq!(body["files"][0]["filename"], "full.txt");
    }

    #[tokio::test]
    async fn test_unknown_parts_are_ignored() {
        let form = MultipartForm::new().add_text("other", "ignored").add_text(JSON_FIELD, "{}");

        let response = server().post("/").multipart(form).await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_missing_json_field() {
        let form =
            MultipartForm::new().add_part(FILES_FIELD, Part::bytes(b"x".to_vec()).file_name("a.txt").mime_type("text/plain"));

        let response = server().post("/").multipart(form).await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["error"], "missing_field");
    }

    #[tokio::test]
    async fn test_duplicate_json_field() {
        let form = MultipartForm::new().add_text(JSON_FIELD, "{}").add_text(JSON_FIELD, "{}");

        let response = server().post("/").multipart(form).await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["error"], "malformed_input");
    }

    #[tokio::test]
    async fn test_non_utf8_json_field() {
        let form = MultipartForm::new().add_part(JSON_FIELD, Part::bytes(vec![0xff, 0xfe, 0x7b]));

        let response = server().post("/").multipart(form).await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["error"], "malformed_input");
    }

    #[tokio::test]
    async fn test_file_without_filename() {
        let form = MultipartForm::new()
            .add_text(JSON_FIELD, "{}")
            .add_part(FILES_FIELD, Part::bytes(b"x".to_vec()).mime_type("text/plain"));

        let response = server().post("/").multipart(form).await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["error"], "malformed_input");
    }

    #[tokio::test]
    async fn test_file_over_limit() {
        let form = MultipartForm::new()
            .add_text(JSON_FIELD, "{}")
            .add_part(FILES_FIELD, Part::bytes(vec![b'x'; 33]).file_name("big.bin").mime_type("text/plain"));

        let response = server().post("/").multipart(form).await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.json::<Value>()["error"], "payload_too_large");
    }

    #[tokio::test]
    async fn test_total_over_limit() {
        let mut form = MultipartForm::new().add_text(JSON_FIELD, "{}");
        for i in 0..4 {
            form = form.add_part(
                FILES_FIELD,
                Part::bytes(vec![b'x'; 30]).file_name(format!("f{i}.bin")).mime_type("text/plain"),
            );
        }

        let response = server().post("/").multipart(form).await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let response = server()
            .post("/")
            .bytes(Bytes::from_static(b"this is not multipart"))
            .content_type("multipart/form-data; boundary=XYZ")
            .await;

        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_truncated_file_part_is_io_error() {
        let body = concat!(
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"jsondata\"\r\n\r\n",
            "{}\r\n",
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"filesToUpload[]\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "abcdef",
        );

        let response = server()
            .post("/")
            .bytes(Bytes::from_static(body.as_bytes()))
            .content_type("multipart/form-data; boundary=XYZ")
            .await;

        response.assert_status_bad_request();
        let error: crate::errors::ErrorBody = response.json();
        assert_eq!(error.error, "io_error");
    }

    #[test]
    fn test_budget_tracks_running_total() {
        let limits = limits();
        let mut budget = Budget { limits: &limits, total: 0 };

        budget.charge(JSON_FIELD, 0, 40, limits.max_json_size).unwrap();
        budget.charge(FILES_FIELD, 0, 30, limits.max_file_size).unwrap();
        assert_eq!(budget.total, 70);

        let err = budget.charge(FILES_FIELD, 0, 31, limits.max_file_size).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert_eq!(budget.total, 101);

        let mut fresh = Budget { limits: &limits, total: 0 };
        assert!(fresh.charge(FILES_FIELD, 30, 3, limits.max_file_size).is_err());
    }
}
