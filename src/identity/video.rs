// src/identity/video.rs
//! Live video identity check.
//!
//! A video session is opened with the provider, a snapshot taken during the
//! call is confirmed by the verification backend, and the session is ended
//! whatever the outcome.

use crate::errors::CertificationError;
use crate::identity::cancel::CancellationSignal;
use crate::identity::facial::evidence_from_verdict;
use crate::identity::capability::{Capability, PlatformCapabilities};
use crate::identity::{bounded, CaptureStrategy};
use crate::models::evidence::{EvidenceMethod, IdentityEvidence};
use crate::services::identity_backend::{
    FaceVerificationRequest, IdentityVerificationBackend, VerificationType,
};
use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// An open video session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoSessionHandle {
    pub session_id: String,
    pub room: String,
}

/// Video call provider.
#[async_trait]
pub trait VideoSessionProvider: Send + Sync {
    async fn open_session(&self) -> Result<VideoSessionHandle, CertificationError>;

    /// Waits until a snapshot of the participant is available.
    async fn await_snapshot(&self, session_id: &str) -> Result<Bytes, CertificationError>;

    /// Closes the session. Called exactly once per opened session.
    async fn end_session(&self, session_id: &str);
}

/// Evidence strategy backed by a live video call.
pub struct VideoStrategy {
    provider: Arc<dyn VideoSessionProvider>,
    platform: Arc<dyn PlatformCapabilities>,
    backend: Arc<dyn IdentityVerificationBackend>,
}

impl VideoStrategy {
    pub fn new(
        provider: Arc<dyn VideoSessionProvider>,
        platform: Arc<dyn PlatformCapabilities>,
        backend: Arc<dyn IdentityVerificationBackend>,
    ) -> Self {
        Self {
            provider,
            platform,
            backend,
        }
    }

    async fn verify(&self, session_id: &str) -> Result<IdentityEvidence, CertificationError> {
        let snapshot = self.provider.await_snapshot(session_id).await?;
        if snapshot.is_empty() {
            return Err(CertificationError::MalformedEvidence(
                "video session produced an empty snapshot".into(),
            ));
        }
        let verdict = self
            .backend
            .verify_face(FaceVerificationRequest {
                image: snapshot,
                verification_type: VerificationType::Video,
                document_type: None,
                session_id: Some(session_id.to_string()),
            })
            .await?;
        evidence_from_verdict(EvidenceMethod::Video, verdict, Some(session_id))
    }
}

#[async_trait]
impl CaptureStrategy for VideoStrategy {
    fn method(&self) -> EvidenceMethod {
        EvidenceMethod::Video
    }

    async fn is_available(&self) -> bool {
        self.platform.has_capability(Capability::VideoSession).await
    }

    async fn capture(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationSignal,
    ) -> Result<IdentityEvidence, CertificationError> {
        if !self.is_available().await {
            return Err(CertificationError::Unavailable(EvidenceMethod::Video));
        }
        let handle = self.provider.open_session().await?;
        info!("video session {} opened in room {}", handle.session_id, handle.room);

        let outcome = bounded(
            EvidenceMethod::Video,
            timeout,
            cancel,
            self.verify(&handle.session_id),
        )
        .await;

        self.provider.end_session(&handle.session_id).await;
        match &outcome {
            Ok(_) => info!("video identity verified in session {}", handle.session_id),
            Err(e) => warn!("video session {} ended without evidence: {}", handle.session_id, e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::capability::StaticCapabilities;
    use crate::services::identity_backend::{FaceVerificationResponse, MockIdentityVerificationBackend};
    use std::sync::Mutex;

    /// Provider that records its calls; `snapshot: None` never delivers one.
    struct FakeProvider {
        snapshot: Option<Bytes>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new(snapshot: Option<&'static [u8]>) -> Arc<Self> {
            Arc::new(Self {
                snapshot: snapshot.map(Bytes::from_static),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VideoSessionProvider for FakeProvider {
        async fn open_session(&self) -> Result<VideoSessionHandle, CertificationError> {
            self.calls.lock().unwrap().push("open".into());
            Ok(VideoSessionHandle {
                session_id: "vs-1".into(),
                room: "room-a".into(),
            })
        }

        async fn await_snapshot(&self, session_id: &str) -> Result<Bytes, CertificationError> {
            self.calls.lock().unwrap().push(format!("snapshot:{}", session_id));
            match self.snapshot.clone() {
                Some(snapshot) => Ok(snapshot),
                None => std::future::pending().await,
            }
        }

        async fn end_session(&self, session_id: &str) {
            self.calls.lock().unwrap().push(format!("end:{}", session_id));
        }
    }

    fn strategy(provider: Arc<FakeProvider>, backend: MockIdentityVerificationBackend) -> VideoStrategy {
        VideoStrategy::new(
            provider,
            Arc::new(StaticCapabilities::none().with(Capability::VideoSession)),
            Arc::new(backend),
        )
    }

    #[tokio::test]
    async fn test_capture_verifies_snapshot_and_ends_session() {
        let provider = FakeProvider::new(Some(b"frame"));
        let mut backend = MockIdentityVerificationBackend::new();
        backend
            .expect_verify_face()
            .withf(|req| {
                req.verification_type == VerificationType::Video
                    && req.session_id.as_deref() == Some("vs-1")
            })
            .times(1)
            .returning(|_| {
                Ok(FaceVerificationResponse {
                    success: true,
                    verification_id: Some("ver-v".into()),
                    confidence: Some(0.88),
                    liveness: Some(true),
                    message: None,
                })
            });

        let evidence = strategy(provider.clone(), backend)
            .capture(None, &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(evidence.method(), EvidenceMethod::Video);
        assert_eq!(evidence.payload()["sessionId"], "vs-1");
        assert_eq!(provider.calls(), vec!["open", "snapshot:vs-1", "end:vs-1"]);
    }

    #[tokio::test]
    async fn test_cancel_still_ends_session() {
        let provider = FakeProvider::new(None);
        let mut backend = MockIdentityVerificationBackend::new();
        backend.expect_verify_face().never();
        let cancel = CancellationSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = strategy(provider.clone(), backend).capture(None, &cancel).await;
        assert_eq!(outcome, Err(CertificationError::UserCancelled(EvidenceMethod::Video)));
        assert_eq!(provider.calls().last().map(String::as_str), Some("end:vs-1"));
    }

    #[tokio::test]
    async fn test_backend_failure_ends_session() {
        let provider = FakeProvider::new(Some(b"frame"));
        let mut backend = MockIdentityVerificationBackend::new();
        backend
            .expect_verify_face()
            .returning(|_| Err(CertificationError::Backend("503 Service Unavailable".into())));

        let outcome = strategy(provider.clone(), backend)
            .capture(Some(Duration::from_secs(1)), &CancellationSignal::new())
            .await;
        assert!(matches!(outcome, Err(CertificationError::Backend(_))));
        assert!(provider.calls().contains(&"end:vs-1".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_never_opens_session() {
        let provider = FakeProvider::new(Some(b"frame"));
        let video = VideoStrategy::new(
            provider.clone(),
            Arc::new(StaticCapabilities::none()),
            Arc::new(MockIdentityVerificationBackend::new()),
        );

        let outcome = video.capture(None, &CancellationSignal::new()).await;
        assert_eq!(outcome, Err(CertificationError::Unavailable(EvidenceMethod::Video)));
        assert!(provider.calls().is_empty());
    }
}
