// src/identity/submitted.rs
//! Device adapters that replay a capture already made by the browser.
//!
//! Over HTTP the hardware lives on the client: it uploads what the NFC reader,
//! camera or video call produced, and the strategies run server-side against
//! these adapters exactly as they would against live hardware.

use crate::errors::CertificationError;
use crate::identity::collector::{CaptureTimeouts, IdentityEvidenceCollector};
use crate::identity::facial::{Camera, CameraStream, FacialStrategy};
use crate::identity::nfc::{NdefRecord, NfcEvent, NfcProgress, NfcReader, NfcReaderType, NfcStrategy};
use crate::identity::capability::{Capability, StaticCapabilities};
use crate::identity::video::{VideoSessionHandle, VideoSessionProvider, VideoStrategy};
use crate::models::evidence::EvidenceMethod;
use crate::services::identity_backend::IdentityVerificationBackend;
use crate::utils::serialization::decode_base64_payload;
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An NDEF record as posted by the browser (`data` is the decoded text).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedRecord {
    pub record_type: String,
    pub data: String,
}

/// Raw capture uploaded by the client, tagged by evidence method.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum SubmittedEvidence {
    #[serde(rename_all = "camelCase")]
    Nfc {
        #[serde(default)]
        serial_number: Option<String>,
        #[serde(default)]
        records: Vec<SubmittedRecord>,
        /// Reader failure reported by the browser instead of a message.
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Facial {
        /// Base64 JPEG, plain or as a data URL.
        image: String,
        #[serde(default)]
        document_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Video { session_id: String, image: String },
}

impl SubmittedEvidence {
    pub fn method(&self) -> EvidenceMethod {
        match self {
            SubmittedEvidence::Nfc { .. } => EvidenceMethod::Nfc,
            SubmittedEvidence::Facial { .. } => EvidenceMethod::Facial,
            SubmittedEvidence::Video { .. } => EvidenceMethod::Video,
        }
    }
}

fn decode_image(data: &str) -> Result<Bytes, CertificationError> {
    decode_base64_payload(data)
        .map(Bytes::from)
        .map_err(CertificationError::MalformedEvidence)
}

/// Replays one tag read: a proximity signal followed by the full message, or
/// by the read error the browser reported.
pub struct SubmittedNfcReader {
    reader_type: NfcReaderType,
    serial_number: Option<String>,
    records: Vec<NdefRecord>,
    read_error: Option<String>,
}

impl SubmittedNfcReader {
    pub fn new(
        reader_type: NfcReaderType,
        serial_number: Option<String>,
        records: Vec<NdefRecord>,
    ) -> Self {
        Self {
            reader_type,
            serial_number,
            records,
            read_error: None,
        }
    }

    pub fn with_read_error(mut self, read_error: Option<String>) -> Self {
        self.read_error = read_error;
        self
    }
}

#[async_trait]
impl NfcReader for SubmittedNfcReader {
    fn reader_type(&self) -> NfcReaderType {
        self.reader_type
    }

    async fn scan(&self) -> Result<mpsc::Receiver<NfcEvent>, CertificationError> {
        let (tx, rx) = mpsc::channel(2);
        let outcome = match &self.read_error {
            Some(message) => NfcEvent::ReadError(message.clone()),
            None => NfcEvent::Message {
                serial_number: self.serial_number.clone(),
                records: self.records.clone(),
            },
        };
        let events = [
            NfcEvent::Proximity {
                serial_number: self.serial_number.clone(),
            },
            outcome,
        ];
        for event in events {
            tx.try_send(event).map_err(|e| {
                CertificationError::MalformedEvidence(format!("NFC replay failed: {}", e))
            })?;
        }
        Ok(rx)
    }
}

/// A camera that yields a single uploaded frame.
pub struct StillFrameCamera {
    frame: Bytes,
}

impl StillFrameCamera {
    pub fn new(frame: Bytes) -> Self {
        Self { frame }
    }
}

struct StillFrameStream {
    frame: Option<Bytes>,
}

#[async_trait]
impl CameraStream for StillFrameStream {
    async fn next_frame(&mut self) -> Result<Bytes, CertificationError> {
        self.frame
            .take()
            .ok_or_else(|| CertificationError::MalformedEvidence("frame already consumed".into()))
    }

    fn stop(&mut self) {
        self.frame = None;
    }
}

#[async_trait]
impl Camera for StillFrameCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CertificationError> {
        Ok(Box::new(StillFrameStream {
            frame: Some(self.frame.clone()),
        }))
    }
}

/// A video session that already took place on the client.
pub struct SubmittedVideoSession {
    session_id: String,
    snapshot: Bytes,
}

impl SubmittedVideoSession {
    pub fn new(session_id: impl Into<String>, snapshot: Bytes) -> Self {
        Self {
            session_id: session_id.into(),
            snapshot,
        }
    }
}

#[async_trait]
impl VideoSessionProvider for SubmittedVideoSession {
    async fn open_session(&self) -> Result<VideoSessionHandle, CertificationError> {
        Ok(VideoSessionHandle {
            session_id: self.session_id.clone(),
            room: format!("room-{}", self.session_id),
        })
    }

    async fn await_snapshot(&self, session_id: &str) -> Result<Bytes, CertificationError> {
        if session_id != self.session_id {
            return Err(CertificationError::MalformedEvidence(format!(
                "unknown video session {}",
                session_id
            )));
        }
        Ok(self.snapshot.clone())
    }

    async fn end_session(&self, session_id: &str) {
        debug!("video session {} closed", session_id);
    }
}

/// Builds per-request collectors around a client submission.
#[derive(Clone)]
pub struct SubmittedCaptureFactory {
    backend: Arc<dyn IdentityVerificationBackend>,
    enabled: Vec<EvidenceMethod>,
    timeouts: CaptureTimeouts,
    nfc_reader: NfcReaderType,
}

impl SubmittedCaptureFactory {
    pub fn new(
        backend: Arc<dyn IdentityVerificationBackend>,
        enabled: Vec<EvidenceMethod>,
        timeouts: CaptureTimeouts,
    ) -> Self {
        Self {
            backend,
            enabled,
            timeouts,
            nfc_reader: NfcReaderType::WebNfc,
        }
    }

    /// Capabilities granted by configuration; disabled methods report as absent.
    fn platform(&self) -> Arc<StaticCapabilities> {
        let capabilities = self.enabled.iter().map(|method| match method {
            EvidenceMethod::Nfc => self.nfc_reader.capability(),
            EvidenceMethod::Facial => Capability::Camera,
            EvidenceMethod::Video => Capability::VideoSession,
        });
        Arc::new(StaticCapabilities::new(capabilities))
    }

    /// Collector with one strategy per method and nothing submitted yet.
    ///
    /// Only good for probing: every capture through it fails as malformed.
    pub fn catalog(&self) -> IdentityEvidenceCollector {
        let platform = self.platform();
        let reader = SubmittedNfcReader::new(self.nfc_reader, None, Vec::new());
        let camera = StillFrameCamera::new(Bytes::new());
        let video = SubmittedVideoSession::new("", Bytes::new());
        IdentityEvidenceCollector::new(self.timeouts)
            .with_strategy(Arc::new(NfcStrategy::new(Arc::new(reader), platform.clone())))
            .with_strategy(Arc::new(FacialStrategy::new(
                Arc::new(camera),
                platform.clone(),
                self.backend.clone(),
            )))
            .with_strategy(Arc::new(VideoStrategy::new(
                Arc::new(video),
                platform,
                self.backend.clone(),
            )))
    }

    /// Collector holding the single strategy that matches `submission`.
    ///
    /// NFC reads publish their status on `nfc_progress`.
    pub fn collector_for(
        &self,
        submission: SubmittedEvidence,
        nfc_progress: &NfcProgress,
    ) -> Result<IdentityEvidenceCollector, CertificationError> {
        let platform = self.platform();
        let collector = IdentityEvidenceCollector::new(self.timeouts);
        let collector = match submission {
            SubmittedEvidence::Nfc {
                serial_number,
                records,
                error,
            } => {
                let records = records
                    .into_iter()
                    .map(|r| NdefRecord {
                        record_type: r.record_type,
                        data: r.data.into_bytes(),
                    })
                    .collect();
                let reader = SubmittedNfcReader::new(self.nfc_reader, serial_number, records)
                    .with_read_error(error);
                let nfc = NfcStrategy::new(Arc::new(reader), platform).with_progress(nfc_progress.clone());
                collector.with_strategy(Arc::new(nfc))
            }
            SubmittedEvidence::Facial {
                image,
                document_type,
            } => {
                let camera = StillFrameCamera::new(decode_image(&image)?);
                let mut facial = FacialStrategy::new(Arc::new(camera), platform, self.backend.clone());
                if let Some(document_type) = document_type {
                    facial = facial.with_document_type(document_type);
                }
                collector.with_strategy(Arc::new(facial))
            }
            SubmittedEvidence::Video { session_id, image } => {
                let provider = SubmittedVideoSession::new(session_id, decode_image(&image)?);
                collector.with_strategy(Arc::new(VideoStrategy::new(
                    Arc::new(provider),
                    platform,
                    self.backend.clone(),
                )))
            }
        };
        Ok(collector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::cancel::CancellationSignal;
    use crate::identity::nfc::NfcReadStatus;
    use crate::services::identity_backend::{FaceVerificationResponse, MockIdentityVerificationBackend};
    use serde_json::json;

    fn factory(backend: MockIdentityVerificationBackend, enabled: Vec<EvidenceMethod>) -> SubmittedCaptureFactory {
        SubmittedCaptureFactory::new(Arc::new(backend), enabled, CaptureTimeouts::default())
    }

    #[test]
    fn test_submission_parses_by_method_tag() {
        let submission: SubmittedEvidence = serde_json::from_value(json!({
            "method": "video",
            "sessionId": "vs-3",
            "image": "aGk="
        }))
        .unwrap();
        assert_eq!(submission.method(), EvidenceMethod::Video);
    }

    #[tokio::test]
    async fn test_nfc_submission_produces_evidence() {
        let submission = SubmittedEvidence::Nfc {
            serial_number: Some("04:11".into()),
            records: vec![SubmittedRecord {
                record_type: "text".into(),
                data: "RUT:16.358.742-4|ANA|PÉREZ SOTO|1990-01-02|2020-05-05|2030-05-05|F".into(),
            }],
            error: None,
        };
        let collector = factory(MockIdentityVerificationBackend::new(), EvidenceMethod::ALL.to_vec())
            .collector_for(submission, &NfcProgress::default())
            .unwrap();

        let evidence = collector
            .capture(EvidenceMethod::Nfc, None, &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(evidence.payload()["cedula"]["nationality"], "CHL");
        assert_eq!(evidence.payload()["serialNumber"], "04:11");
    }

    #[tokio::test]
    async fn test_facial_submission_decodes_data_url() {
        let mut backend = MockIdentityVerificationBackend::new();
        backend
            .expect_verify_face()
            .withf(|req| req.image.as_ref() == b"hello")
            .times(1)
            .returning(|_| {
                Ok(FaceVerificationResponse {
                    success: true,
                    verification_id: Some("ver-9".into()),
                    confidence: None,
                    liveness: None,
                    message: None,
                })
            });
        let collector = factory(backend, vec![EvidenceMethod::Facial])
            .collector_for(
                SubmittedEvidence::Facial {
                    image: "data:image/jpeg;base64,aGVsbG8=".into(),
                    document_type: None,
                },
                &NfcProgress::default(),
            )
            .unwrap();

        let evidence = collector
            .capture(EvidenceMethod::Facial, None, &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(evidence.payload()["verificationId"], "ver-9");
    }

    #[tokio::test]
    async fn test_disabled_method_is_unavailable() {
        let collector = factory(MockIdentityVerificationBackend::new(), vec![EvidenceMethod::Facial])
            .collector_for(
                SubmittedEvidence::Nfc {
                    serial_number: None,
                    records: vec![],
                    error: None,
                },
                &NfcProgress::default(),
            )
            .unwrap();

        let outcome = collector
            .capture(EvidenceMethod::Nfc, None, &CancellationSignal::new())
            .await;
        assert_eq!(outcome, Err(CertificationError::Unavailable(EvidenceMethod::Nfc)));
    }

    #[test]
    fn test_bad_image_is_malformed() {
        let outcome = factory(MockIdentityVerificationBackend::new(), vec![EvidenceMethod::Video])
            .collector_for(
                SubmittedEvidence::Video {
                    session_id: "vs".into(),
                    image: "***".into(),
                },
                &NfcProgress::default(),
            );
        assert!(matches!(outcome, Err(CertificationError::MalformedEvidence(_))));
    }

    #[tokio::test]
    async fn test_reported_read_error_fails_the_read() {
        let progress = NfcProgress::default();
        let submission: SubmittedEvidence = serde_json::from_value(json!({
            "method": "nfc",
            "error": "tag moved away"
        }))
        .unwrap();
        let collector = factory(MockIdentityVerificationBackend::new(), vec![EvidenceMethod::Nfc])
            .collector_for(submission, &progress)
            .unwrap();

        let outcome = collector
            .capture(EvidenceMethod::Nfc, None, &CancellationSignal::new())
            .await;
        assert_eq!(
            outcome,
            Err(CertificationError::MalformedEvidence("NFC read failed: tag moved away".into()))
        );
        assert_eq!(progress.current(), NfcReadStatus::Error);
    }

    #[tokio::test]
    async fn test_catalog_reports_enabled_methods() {
        let catalog = factory(
            MockIdentityVerificationBackend::new(),
            vec![EvidenceMethod::Video, EvidenceMethod::Facial],
        )
        .catalog();

        assert_eq!(
            catalog.available_methods().await,
            vec![EvidenceMethod::Facial, EvidenceMethod::Video]
        );
        assert_eq!(
            catalog
                .preferred_method(&[EvidenceMethod::Nfc, EvidenceMethod::Video])
                .await,
            Some(EvidenceMethod::Video)
        );
    }
}
