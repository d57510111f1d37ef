// src/models/signature.rs
//! Encoded handwritten signature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raster image of a handwritten signature.
///
/// `image_data` is a `data:image/png;base64,...` URL. An artifact with
/// `stroke_count == 0` is empty and is never accepted by the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignatureArtifact {
    image_data: String,
    stroke_count: u32,
    created_at: DateTime<Utc>,
}

impl SignatureArtifact {
    /// Wraps an exported signature, stamped with the current time.
    ///
    /// # Arguments
    /// * `image_data` - PNG data URL produced by the capture surface.
    /// * `stroke_count` - Number of strokes drawn; `0` marks the artifact empty.
    pub fn new(image_data: String, stroke_count: u32) -> Self {
        Self {
            image_data,
            stroke_count,
            created_at: Utc::now(),
        }
    }

    /// The `data:image/png;base64,...` URL sent to the document service.
    pub fn image_data(&self) -> &str {
        &self.image_data
    }

    pub fn stroke_count(&self) -> u32 {
        self.stroke_count
    }

    /// When the signature was exported from the surface.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether no stroke was drawn.
    ///
    /// # Returns
    /// `true` when `stroke_count == 0`.
    pub fn is_empty(&self) -> bool {
        self.stroke_count == 0
    }
}
