// src/services/persistence.rs
//! Document persistence collaborator.
//!
//! Finalizing a session hands `{document, evidence, signature}` to a
//! [`DocumentPersistence`]. The HTTP implementation talks to the document
//! service:
//!
//! ```text
//! PUT /documents/{id}/certification
//! {"evidenceMethod": "...", "evidencePayload": {...}, "signatureImage": "data:image/png;base64,..."}
//! -> 200 {"certificationId": "...", "verifiedAt": "..."}
//! ```
//!
//! The document id is sent as a single percent-encoded path segment.

use crate::errors::CertificationError;
use crate::models::evidence::EvidenceMethod;
use crate::models::session::{CertificationReceipt, CertificationRequest};
use crate::services::identity_backend::error_message;
use crate::utils::serialization::{deserialize, serialize};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

/// Persists a finalized certification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentPersistence: Send + Sync {
    /// # Errors
    /// [`CertificationError::Persistence`] when the certification could not be
    /// stored. The caller keeps every artifact and may retry.
    async fn persist(
        &self,
        request: &CertificationRequest,
    ) -> Result<CertificationReceipt, CertificationError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificationBody<'a> {
    evidence_method: EvidenceMethod,
    evidence_payload: &'a serde_json::Value,
    signature_image: &'a str,
}

/// reqwest-backed [`DocumentPersistence`].
#[derive(Clone, Debug)]
pub struct HttpDocumentPersistence {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpDocumentPersistence {
    /// Creates a client for the document service at `base_url`.
    ///
    /// # Errors
    /// [`CertificationError::Persistence`] if `base_url` is not an http(s) URL
    /// that can carry a path.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CertificationError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CertificationError::Persistence(format!("invalid base URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CertificationError::Persistence(format!(
                "base URL {} cannot carry a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CertificationError::Persistence(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// `{base}/documents/{id}/certification` with `id` encoded as one segment.
    fn certification_url(&self, document_id: &str) -> Result<Url, CertificationError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CertificationError::Persistence(format!("base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .push("documents")
            .push(document_id)
            .push("certification");
        Ok(url)
    }
}

#[async_trait]
impl DocumentPersistence for HttpDocumentPersistence {
    async fn persist(
        &self,
        request: &CertificationRequest,
    ) -> Result<CertificationReceipt, CertificationError> {
        let url = self.certification_url(request.document.id())?;
        let body = serialize(&CertificationBody {
            evidence_method: request.evidence.method(),
            evidence_payload: request.evidence.payload(),
            signature_image: request.signature.image_data(),
        })
        .map_err(|e| CertificationError::Persistence(e.to_string()))?;
        debug!("PUT {}", url);

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| CertificationError::Persistence(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CertificationError::Persistence(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(status, &text);
            error!("certification of document {} rejected: {}", request.document.id(), message);
            return Err(CertificationError::Persistence(message));
        }
        deserialize(&text).map_err(|e| {
            CertificationError::Persistence(format!("unexpected certification response: {}", e))
        })
    }
}
