// src/services/identity_backend.rs
//! Client for the identity verification backend.
//!
//! Facial and video evidence are confirmed remotely: the captured frame is
//! posted as multipart form data to `POST /identity/verify-face` and the
//! backend answers with a verification verdict.

use crate::errors::CertificationError;
use crate::utils::serialization::deserialize;
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of check requested from the backend.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationType {
    Facial,
    Video,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::Facial => "facial",
            VerificationType::Video => "video",
        }
    }
}

/// Multipart body of a face verification call.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceVerificationRequest {
    /// JPEG frame.
    pub image: Bytes,
    pub verification_type: VerificationType,
    pub document_type: Option<String>,
    pub session_id: Option<String>,
}

/// Verdict returned by the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FaceVerificationResponse {
    pub success: bool,
    #[serde(default)]
    pub verification_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub liveness: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Identity verification backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerificationBackend: Send + Sync {
    /// Submits a frame for verification.
    ///
    /// # Errors
    /// [`CertificationError::Backend`] on transport failures or non-2xx answers.
    /// A well-formed `success: false` verdict is returned as `Ok`.
    async fn verify_face(
        &self,
        request: FaceVerificationRequest,
    ) -> Result<FaceVerificationResponse, CertificationError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Extracts `{message}` from an error body, falling back to the raw text.
pub(crate) fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match deserialize::<ErrorBody>(body) {
        Ok(error) => format!("{}: {}", status, error.message),
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => format!("{}: {}", status, body.trim()),
    }
}

/// reqwest-backed [`IdentityVerificationBackend`].
#[derive(Clone)]
pub struct HttpIdentityBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityBackend {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Arguments
    /// * `base_url` - Backend root, with or without trailing slash
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    /// Returns `Err` if the HTTP client cannot be built (TLS backend failure).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CertificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn form(request: FaceVerificationRequest) -> Result<Form, CertificationError> {
        let image = Part::bytes(request.image.to_vec())
            .file_name("capture.jpg")
            .mime_str("image/jpeg")?;
        let mut form = Form::new()
            .part("image", image)
            .text("verificationType", request.verification_type.as_str());
        if let Some(document_type) = request.document_type {
            form = form.text("documentType", document_type);
        }
        if let Some(session_id) = request.session_id {
            form = form.text("sessionId", session_id);
        }
        Ok(form)
    }
}

#[async_trait]
impl IdentityVerificationBackend for HttpIdentityBackend {
    async fn verify_face(
        &self,
        request: FaceVerificationRequest,
    ) -> Result<FaceVerificationResponse, CertificationError> {
        let url = format!("{}/identity/verify-face", self.base_url);
        debug!(
            "POST {} ({} bytes, {})",
            url,
            request.image.len(),
            request.verification_type.as_str()
        );

        let response = self
            .client
            .post(&url)
            .multipart(Self::form(request)?)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CertificationError::Backend(error_message(status, &body)));
        }
        deserialize(&body).map_err(|e| {
            CertificationError::Backend(format!("unexpected verification response: {}", e))
        })
    }
}
