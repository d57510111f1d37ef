// src/identity/facial.rs
//! Facial identity check: one camera frame confirmed by the verification
//! backend.
//!
//! The camera is exclusively owned while a capture runs and is stopped on
//! every exit path (success, backend failure, timeout or cancellation) through
//! [`StreamGuard`].

use crate::errors::CertificationError;
use crate::identity::cancel::CancellationSignal;
use crate::identity::capability::{Capability, PlatformCapabilities};
use crate::identity::{bounded, CaptureStrategy};
use crate::models::evidence::{EvidenceMethod, IdentityEvidence};
use crate::services::identity_backend::{
    FaceVerificationRequest, FaceVerificationResponse, IdentityVerificationBackend,
    VerificationType,
};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Deadline applied by the collector when the caller does not give one.
pub const DEFAULT_FACIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// A camera that can be opened for a capture.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CertificationError>;
}

/// An open camera stream.
#[async_trait]
pub trait CameraStream: Send {
    /// Waits for the next frame, JPEG encoded.
    async fn next_frame(&mut self) -> Result<Bytes, CertificationError>;

    /// Releases the camera. Must be idempotent.
    fn stop(&mut self);
}

/// Stops the wrapped stream when dropped.
struct StreamGuard(Box<dyn CameraStream>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        debug!("stopping camera stream");
        self.0.stop();
    }
}

/// Turns a backend verdict into evidence, or the reason it is not evidence.
pub(crate) fn evidence_from_verdict(
    method: EvidenceMethod,
    verdict: FaceVerificationResponse,
    session_id: Option<&str>,
) -> Result<IdentityEvidence, CertificationError> {
    if !verdict.success {
        return Err(CertificationError::VerificationRejected(
            verdict
                .message
                .unwrap_or_else(|| "identity could not be confirmed".into()),
        ));
    }
    let Some(verification_id) = verdict.verification_id else {
        return Err(CertificationError::MalformedEvidence(
            "verification response carries no verificationId".into(),
        ));
    };

    let mut payload = json!({
        "verificationId": verification_id,
        "confidence": verdict.confidence,
        "liveness": verdict.liveness,
        "message": verdict.message,
    });
    if let Some(session_id) = session_id {
        payload["sessionId"] = json!(session_id);
    }
    Ok(IdentityEvidence::new(method, payload))
}

/// Evidence strategy backed by a selfie.
pub struct FacialStrategy {
    camera: Arc<dyn Camera>,
    platform: Arc<dyn PlatformCapabilities>,
    backend: Arc<dyn IdentityVerificationBackend>,
    document_type: Option<String>,
}

impl FacialStrategy {
    pub fn new(
        camera: Arc<dyn Camera>,
        platform: Arc<dyn PlatformCapabilities>,
        backend: Arc<dyn IdentityVerificationBackend>,
    ) -> Self {
        Self {
            camera,
            platform,
            backend,
            document_type: None,
        }
    }

    /// Document the selfie is compared against (e.g. `cedula`).
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    async fn grab_frame(&self) -> Result<Bytes, CertificationError> {
        let mut stream = StreamGuard(self.camera.open().await?);
        let frame = stream.0.next_frame().await?;
        if frame.is_empty() {
            return Err(CertificationError::MalformedEvidence("camera returned an empty frame".into()));
        }
        Ok(frame)
    }

    async fn verify(&self) -> Result<IdentityEvidence, CertificationError> {
        // The guard inside grab_frame releases the camera before the backend call.
        let frame = self.grab_frame().await?;
        let verdict = self
            .backend
            .verify_face(FaceVerificationRequest {
                image: frame,
                verification_type: VerificationType::Facial,
                document_type: self.document_type.clone(),
                session_id: None,
            })
            .await?;
        let evidence = evidence_from_verdict(EvidenceMethod::Facial, verdict, None)?;
        info!("facial identity verified");
        Ok(evidence)
    }
}

#[async_trait]
impl CaptureStrategy for FacialStrategy {
    fn method(&self) -> EvidenceMethod {
        EvidenceMethod::Facial
    }

    async fn is_available(&self) -> bool {
        self.platform.has_capability(Capability::Camera).await
    }

    async fn capture(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationSignal,
    ) -> Result<IdentityEvidence, CertificationError> {
        if !self.is_available().await {
            return Err(CertificationError::Unavailable(EvidenceMethod::Facial));
        }
        bounded(EvidenceMethod::Facial, timeout, cancel, self.verify()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::capability::StaticCapabilities;
    use crate::services::identity_backend::MockIdentityVerificationBackend;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Camera whose stream either yields one frame or never produces one.
    struct FakeCamera {
        frame: Option<Bytes>,
        opened: AtomicUsize,
        stopped: Arc<AtomicBool>,
    }

    impl FakeCamera {
        fn new(frame: Option<&'static [u8]>) -> Self {
            Self {
                frame: frame.map(Bytes::from_static),
                opened: AtomicUsize::new(0),
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct FakeStream {
        frame: Option<Bytes>,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CameraStream for FakeStream {
        async fn next_frame(&mut self) -> Result<Bytes, CertificationError> {
            match self.frame.clone() {
                Some(frame) => Ok(frame),
                None => std::future::pending().await,
            }
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Camera for FakeCamera {
        async fn open(&self) -> Result<Box<dyn CameraStream>, CertificationError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                frame: self.frame.clone(),
                stopped: self.stopped.clone(),
            }))
        }
    }

    fn verdict(success: bool) -> FaceVerificationResponse {
        FaceVerificationResponse {
            success,
            verification_id: Some("ver-1".into()),
            confidence: Some(0.93),
            liveness: Some(true),
            message: Some(if success { "ok" } else { "face mismatch" }.into()),
        }
    }

    fn strategy(camera: Arc<FakeCamera>, backend: MockIdentityVerificationBackend) -> FacialStrategy {
        FacialStrategy::new(
            camera,
            Arc::new(StaticCapabilities::none().with(Capability::Camera)),
            Arc::new(backend),
        )
        .with_document_type("cedula")
    }

    #[tokio::test]
    async fn test_capture_produces_facial_evidence() {
        let camera = Arc::new(FakeCamera::new(Some(b"jpeg")));
        let mut backend = MockIdentityVerificationBackend::new();
        backend
            .expect_verify_face()
            .withf(|req| {
                req.verification_type == VerificationType::Facial
                    && req.document_type.as_deref() == Some("cedula")
                    && req.image.as_ref() == b"jpeg"
            })
            .times(1)
            .returning(|_| Ok(verdict(true)));

        let evidence = strategy(camera.clone(), backend)
            .capture(Some(DEFAULT_FACIAL_TIMEOUT), &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(evidence.method(), EvidenceMethod::Facial);
        assert_eq!(evidence.payload()["verificationId"], "ver-1");
        assert!(camera.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rejected_verdict_releases_camera() {
        let camera = Arc::new(FakeCamera::new(Some(b"jpeg")));
        let mut backend = MockIdentityVerificationBackend::new();
        backend.expect_verify_face().returning(|_| Ok(verdict(false)));

        let outcome = strategy(camera.clone(), backend)
            .capture(None, &CancellationSignal::new())
            .await;
        assert_eq!(
            outcome,
            Err(CertificationError::VerificationRejected("face mismatch".into()))
        );
        assert!(camera.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_releases_camera() {
        let camera = Arc::new(FakeCamera::new(None));
        let mut backend = MockIdentityVerificationBackend::new();
        backend.expect_verify_face().never();

        let outcome = strategy(camera.clone(), backend)
            .capture(Some(Duration::from_millis(20)), &CancellationSignal::new())
            .await;
        assert!(matches!(outcome, Err(CertificationError::Timeout { .. })));
        assert!(camera.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_releases_camera() {
        let camera = Arc::new(FakeCamera::new(None));
        let mut backend = MockIdentityVerificationBackend::new();
        backend.expect_verify_face().never();
        let cancel = CancellationSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = strategy(camera.clone(), backend).capture(None, &cancel).await;
        assert_eq!(outcome, Err(CertificationError::UserCancelled(EvidenceMethod::Facial)));
        assert!(camera.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_camera_is_unavailable() {
        let camera = Arc::new(FakeCamera::new(Some(b"jpeg")));
        let facial = FacialStrategy::new(
            camera.clone(),
            Arc::new(StaticCapabilities::none()),
            Arc::new(MockIdentityVerificationBackend::new()),
        );

        let outcome = facial.capture(None, &CancellationSignal::new()).await;
        assert_eq!(outcome, Err(CertificationError::Unavailable(EvidenceMethod::Facial)));
        assert_eq!(camera.opened.load(Ordering::SeqCst), 0);
    }
}
