// src/storage/certification_store.rs
//! In-process certification storage.
//!
//! Used as the [`DocumentPersistence`] collaborator when no document service
//! is configured. Certifications are keyed by document id, so certifying the
//! same document twice yields the same receipt.

use crate::errors::CertificationError;
use crate::models::evidence::EvidenceMethod;
use crate::models::session::{CertificationReceipt, CertificationRequest};
use crate::services::persistence::DocumentPersistence;
use crate::utils::verification_code;
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What is kept for a certified document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredCertification {
    pub document_id: String,
    pub title: String,
    #[serde(flatten)]
    pub receipt: CertificationReceipt,
    pub evidence_method: EvidenceMethod,
    pub evidence_payload: serde_json::Value,
    pub signature_image: String,
    pub verification_url: String,
}

#[derive(Default)]
struct Records {
    by_document: HashMap<String, StoredCertification>,
    /// certification id -> document id
    by_code: HashMap<String, String>,
}

/// Thread-safe map of certified documents.
#[derive(Default)]
pub struct CertificationStore {
    records: Mutex<Records>,
}

impl CertificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a certification, replacing any earlier one for the same document.
    pub fn store(&self, certification: StoredCertification) {
        let mut records = self.records();
        if let Some(previous) = records.by_document.get(&certification.document_id) {
            let code = previous.receipt.certification_id.clone();
            records.by_code.remove(&code);
        }
        records.by_code.insert(
            certification.receipt.certification_id.clone(),
            certification.document_id.clone(),
        );
        records
            .by_document
            .insert(certification.document_id.clone(), certification);
    }

    pub fn get(&self, document_id: &str) -> Option<StoredCertification> {
        self.records().by_document.get(document_id).cloned()
    }

    /// Looks a certification up by its verification code.
    pub fn find_by_code(&self, code: &str) -> Option<StoredCertification> {
        let records = self.records();
        let document_id = records.by_code.get(&code.to_uppercase())?;
        records.by_document.get(document_id).cloned()
    }

    /// Number of certified documents.
    pub fn count(&self) -> usize {
        self.records().by_document.len()
    }
}

#[async_trait]
impl DocumentPersistence for CertificationStore {
    async fn persist(
        &self,
        request: &CertificationRequest,
    ) -> Result<CertificationReceipt, CertificationError> {
        let document = &request.document;
        if let Some(existing) = self.get(document.id()) {
            info!("document {} already certified as {}", document.id(), existing.receipt.certification_id);
            return Ok(existing.receipt);
        }

        let verified_at = Utc::now();
        let code = verification_code::generate(document.id(), document.title(), verified_at)
            .map_err(|_| CertificationError::Persistence("random number generator failed".into()))?;
        let receipt = CertificationReceipt {
            certification_id: code.clone(),
            verified_at,
        };
        self.store(StoredCertification {
            document_id: document.id().to_string(),
            title: document.title().to_string(),
            receipt: receipt.clone(),
            evidence_method: request.evidence.method(),
            evidence_payload: request.evidence.payload().clone(),
            signature_image: request.signature.image_data().to_string(),
            verification_url: verification_code::verification_url(&code),
        });
        info!("document {} certified as {} ({} stored)", document.id(), code, self.count());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::DocumentReference;
    use crate::models::evidence::IdentityEvidence;
    use crate::models::signature::SignatureArtifact;
    use serde_json::json;

    fn request(document_id: &str) -> CertificationRequest {
        CertificationRequest {
            document: DocumentReference::new(document_id, "Finiquito", 4096, "application/pdf"),
            evidence: IdentityEvidence::new(EvidenceMethod::Video, json!({ "sessionId": "vs-1" })),
            signature: SignatureArtifact::new("data:image/png;base64,AAAA".into(), 1),
        }
    }

    #[tokio::test]
    async fn test_persist_generates_code_and_url() {
        let store = CertificationStore::new();
        let receipt = store.persist(&request("doc-1")).await.unwrap();

        assert_eq!(receipt.certification_id.len(), 10);
        let stored = store.get("doc-1").unwrap();
        assert_eq!(
            stored.verification_url,
            format!("/verificar-documento/{}", receipt.certification_id)
        );
        assert_eq!(stored.evidence_method, EvidenceMethod::Video);
        assert_eq!(
            store.find_by_code(&receipt.certification_id.to_lowercase()),
            Some(stored)
        );
    }

    #[tokio::test]
    async fn test_persist_is_idempotent_per_document() {
        let store = CertificationStore::new();
        let first = store.persist(&request("doc-2")).await.unwrap();
        let second = store.persist(&request("doc-2")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_store_replaces_code_for_same_document() {
        let store = CertificationStore::new();
        let receipt = store.persist(&request("doc-3")).await.unwrap();
        let mut replacement = store.get("doc-3").unwrap();
        replacement.receipt.certification_id = "ZZ-99YY-XX".into();
        store.store(replacement);

        assert!(store.find_by_code(&receipt.certification_id).is_none());
        assert_eq!(store.find_by_code("zz-99yy-xx").unwrap().document_id, "doc-3");
        assert_eq!(store.count(), 1);
    }
}
