//! Multipart form construction.
//!
//! Parts are recorded, not encoded: the transport turns them into a wire body
//! on every send, so a queued multipart request can be replayed after a
//! restart. File parts are read when the request is sent.

use crate::request::base64_bytes;
use crate::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// Where a part's bytes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PartSource {
    Bytes {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    File {
        path: PathBuf,
    },
}

/// One named part of a multipart body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormPart {
    pub name: String,
    pub source: PartSource,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Multipart body under construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultipartFormData {
    parts: Vec<FormPart>,
}

impl MultipartFormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain form field.
    pub fn append_text(&mut self, name: &str, value: &str) {
        self.append_data(name, value.as_bytes().to_vec());
    }

    /// Append raw bytes without filename or content type.
    pub fn append_data(&mut self, name: &str, data: impl Into<Vec<u8>>) {
        self.parts.push(FormPart {
            name: name.to_string(),
            source: PartSource::Bytes { data: data.into() },
            filename: None,
            content_type: None,
        });
    }

    /// Append in-memory file content.
    pub fn append_file_data(
        &mut self,
        name: &str,
        data: impl Into<Vec<u8>>,
        filename: &str,
        content_type: &str,
    ) {
        self.parts.push(FormPart {
            name: name.to_string(),
            source: PartSource::Bytes { data: data.into() },
            filename: Some(filename.to_string()),
            content_type: Some(content_type.to_string()),
        });
    }

    /// Append a file streamed from disk at send time.
    ///
    /// The filename defaults to the path's last component. Fails with
    /// `Encoding` when the path is not a readable file right now.
    pub fn append_file(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> SessionResult<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SessionError::Encoding(format!(
                "multipart file {} is not a readable file",
                path.display()
            )));
        }

        let filename = match filename {
            Some(f) => f.to_string(),
            None => path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    SessionError::Encoding(format!("no filename for {}", path.display()))
                })?,
        };

        self.parts.push(FormPart {
            name: name.to_string(),
            source: PartSource::File {
                path: path.to_path_buf(),
            },
            filename: Some(filename),
            content_type: Some(content_type.unwrap_or(DEFAULT_FILE_CONTENT_TYPE).to_string()),
        });
        Ok(())
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parts_keep_append_order() {
        let mut form = MultipartFormData::new();
        form.append_text("title", "hello");
        form.append_file_data("avatar", vec![1, 2, 3], "a.png", "image/png");

        assert_eq!(form.len(), 2);
        assert_eq!(form.parts()[0].name, "title");
        assert_eq!(form.parts()[1].filename.as_deref(), Some("a.png"));
        assert_eq!(form.parts()[1].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_append_file_infers_filename() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "a,b\n").unwrap();

        let mut form = MultipartFormData::new();
        form.append_file("report", &path, None, Some("text/csv")).unwrap();

        let part = &form.parts()[0];
        assert_eq!(part.filename.as_deref(), Some("report.csv"));
        assert_eq!(part.content_type.as_deref(), Some("text/csv"));
        assert!(matches!(part.source, PartSource::File { .. }));
    }

    #[test]
    fn test_append_missing_file_fails() {
        let mut form = MultipartFormData::new();
        let err = form
            .append_file("report", "/definitely/not/here.bin", None, None)
            .unwrap_err();
        assert!(matches!(err, SessionError::Encoding(_)));
        assert!(form.is_empty());
    }

    #[test]
    fn test_form_survives_json() {
        let mut form = MultipartFormData::new();
        form.append_file_data("blob", vec![0, 255], "b.bin", "application/octet-stream");

        let json = serde_json::to_string(&form).unwrap();
        let back: MultipartFormData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, form);
    }
}
