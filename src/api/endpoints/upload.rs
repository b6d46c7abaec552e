//! Multipart upload handling shared by every POST endpoint.
//!
//! Uploads stay in memory; nothing is staged on disk. The file type is
//! decided by extension, case-insensitively.

use std::collections::HashMap;
use std::path::Path;

use axum::extract::Multipart;

use crate::api::error::ApiError;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Csv,
}

impl UploadKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)?;
        match ext.as_str() {
            "jpg" | "jpeg" | "png" => Some(UploadKind::Image),
            "csv" => Some(UploadKind::Csv),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub kind: Option<UploadKind>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Image bytes, or 400 naming what the endpoint accepts.
    pub fn into_image(self, purpose: &str) -> Result<Vec<u8>, ApiError> {
        match self.kind {
            Some(UploadKind::Image) => Ok(self.bytes),
            _ => Err(ApiError::UnsupportedFile(format!(
                "Only image files supported for {purpose}"
            ))),
        }
    }
}

/// Every part of a multipart body: the upload plus any text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == FILE_FIELD {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                tracing::debug!(file_name, size = bytes.len(), "Upload received");
                form.file = Some(UploadedFile {
                    kind: UploadKind::from_file_name(&file_name),
                    file_name,
                    bytes,
                });
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn take_file(&mut self) -> Result<UploadedFile, ApiError> {
        self.file.take().ok_or(ApiError::NoFile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert_eq!(UploadKind::from_file_name("scan.PNG"), Some(UploadKind::Image));
        assert_eq!(UploadKind::from_file_name("scan.Jpeg"), Some(UploadKind::Image));
        assert_eq!(UploadKind::from_file_name("eeg.CSV"), Some(UploadKind::Csv));
        assert_eq!(UploadKind::from_file_name("notes.txt"), None);
        assert_eq!(UploadKind::from_file_name("png"), None);
        assert_eq!(UploadKind::from_file_name(""), None);
    }

    #[test]
    fn csv_is_not_an_image() {
        let file = UploadedFile {
            file_name: "eeg.csv".into(),
            kind: Some(UploadKind::Csv),
            bytes: b"a,b\n".to_vec(),
        };
        let err = file.into_image("classification").unwrap_err();
        assert!(
            matches!(err, ApiError::UnsupportedFile(msg) if msg == "Only image files supported for classification")
        );
    }

    #[test]
    fn blank_fields_read_as_absent() {
        let mut form = UploadForm::default();
        form.fields.insert("subtype".into(), "  ".into());
        assert_eq!(form.field("subtype"), None);
        form.fields.insert("subtype".into(), "neuro_ms".into());
        assert_eq!(form.field("subtype"), Some("neuro_ms"));
        assert!(matches!(form.take_file(), Err(ApiError::NoFile)));
    }
}
