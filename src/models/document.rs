// src/models/document.rs
//! Reference to the document being certified.
//!
//! The document bytes themselves live with the external storage collaborator;
//! the pipeline only carries this immutable reference.

use crate::errors::CertificationError;
use serde::{Deserialize, Serialize};

/// Identifies an uploaded document.
///
/// Fields are private so a reference cannot be altered once created. Use the
/// accessors to read them.
///
/// # Serialization
/// Serialized with camelCase keys (`sizeBytes`, `mimeType`) to match the
/// browser clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    id: String,
    title: String,
    size_bytes: u64,
    mime_type: String,
}

impl DocumentReference {
    /// Creates a reference for a freshly selected file.
    ///
    /// No validation happens here; the pipeline checks the guard when the
    /// reference is attached.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        size_bytes: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            size_bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Identifier assigned by the storage collaborator.
    ///
    /// Sent as one path segment of the persistence URL.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display title shown to the signer.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// File size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// MIME type reported at upload, e.g. `application/pdf`.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Checks the upload guard.
    ///
    /// # Errors
    /// Returns [`CertificationError::InvalidDocument`] if:
    /// - the id is blank, is `.` or `..`, or contains `/`, `\`, `?` or `#`
    /// - the title is blank
    /// - the file is empty (`sizeBytes == 0`)
    pub fn validate(&self) -> Result<(), CertificationError> {
        if self.id.trim().is_empty() {
            return Err(CertificationError::InvalidDocument("document id is empty".into()));
        }
        if matches!(self.id.as_str(), "." | "..") || self.id.contains(&['/', '\\', '?', '#'][..]) {
            return Err(CertificationError::InvalidDocument(format!(
                "document id '{}' is not a single path segment",
                self.id
            )));
        }
        if self.title.trim().is_empty() {
            return Err(CertificationError::InvalidDocument("document title is empty".into()));
        }
        if self.size_bytes == 0 {
            return Err(CertificationError::InvalidDocument(format!(
                "document {} has no content",
                self.id
            )));
        }
        Ok(())
    }
}
