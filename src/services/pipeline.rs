// src/services/pipeline.rs
//! Certification pipeline: Upload -> Verify -> Sign -> Finalize.
//!
//! [`CertificationPipeline`] owns one [`CertificationSession`] and drives it
//! through its transitions. It adds what the value object cannot do alone:
//! calling the evidence collector and the persistence collaborator, entering
//! the busy stages around those calls, and telling the user about failures.
//!
//! Recoverable failures leave the session in its pre-transition stage and emit
//! a notification naming the stage. A persistence failure moves the session
//! into `Failed(Finalizing, ..)`, from which `finalize` may be retried.

use crate::errors::CertificationError;
use crate::identity::cancel::CancellationSignal;
use crate::identity::collector::IdentityEvidenceCollector;
use crate::models::document::DocumentReference;
use crate::models::evidence::{EvidenceMethod, IdentityEvidence};
use crate::models::session::{
    CertificationReceipt, CertificationSession, FailureReason, Stage, Step,
};
use crate::models::signature::SignatureArtifact;
use crate::services::notifier::{Notification, NotificationVariant, Notifier};
use crate::services::persistence::DocumentPersistence;
use crate::signature::capture::SignatureCapture;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

fn step_label(step: Step) -> &'static str {
    match step {
        Step::Uploading => "Document upload",
        Step::Verifying => "Identity verification",
        Step::Signing => "Signature",
        Step::Finalizing => "Certification",
    }
}

/// Holds a session in the busy stage of a step.
///
/// Dropping the guard without [`commit`](Self::commit) puts the session back
/// into the stage it was in, so a cancelled or panicking capture never leaves
/// it stuck in `Verifying`.
struct BusySession<'a> {
    slot: &'a mut CertificationSession,
    committed: bool,
}

impl<'a> BusySession<'a> {
    fn enter(slot: &'a mut CertificationSession, operation: &'static str) -> Result<Self, CertificationError> {
        *slot = slot.mark_busy(operation)?;
        Ok(Self { slot, committed: false })
    }

    fn session(&self) -> &CertificationSession {
        self.slot
    }

    fn commit(mut self, next: CertificationSession) {
        *self.slot = next;
        self.committed = true;
    }
}

impl Drop for BusySession<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.slot = self.slot.release_busy();
        }
    }
}

/// Drives a single certification session.
pub struct CertificationPipeline {
    session: CertificationSession,
    notifier: Arc<dyn Notifier>,
    /// Last recoverable failure, kept so an abandoned session records why.
    last_failure: Option<(Step, CertificationError)>,
}

impl CertificationPipeline {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::resume(CertificationSession::new(), notifier)
    }

    /// Wraps an existing session.
    pub fn resume(session: CertificationSession, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            session,
            notifier,
            last_failure: None,
        }
    }

    pub fn session(&self) -> &CertificationSession {
        &self.session
    }

    pub fn stage(&self) -> &Stage {
        self.session.stage()
    }

    /// Logs and notifies a failed operation, then hands the error back.
    ///
    /// Invalid transitions are wiring bugs and are only logged.
    fn report(&mut self, step: Step, err: CertificationError) -> CertificationError {
        if err.is_recoverable() {
            warn!("session {} stays {}: {}", self.session.id(), self.session.stage(), err);
            self.notifier.notify(Notification::new(
                format!("{} failed", step_label(step)),
                format!("{}. Please try again.", err),
                NotificationVariant::Destructive,
            ));
            self.last_failure = Some((step, err.clone()));
        } else if let CertificationError::Persistence(_) = err {
            error!("session {}: {}", self.session.id(), err);
            self.notifier.notify(Notification::new(
                format!("{} failed", step_label(step)),
                format!("{}. Your document, evidence and signature were kept; retry to finish.", err),
                NotificationVariant::Destructive,
            ));
        } else {
            error!("session {}: {}", self.session.id(), err);
        }
        err
    }

    /// Applies a synchronous transition, keeping the session on failure.
    fn transition<F>(&mut self, step: Step, apply: F) -> Result<(), CertificationError>
    where
        F: FnOnce(&CertificationSession) -> Result<CertificationSession, CertificationError>,
    {
        match apply(&self.session) {
            Ok(next) => {
                debug!("session {}: {} -> {}", next.id(), self.session.stage(), next.stage());
                self.session = next;
                self.last_failure = None;
                Ok(())
            }
            Err(e) => Err(self.report(step, e)),
        }
    }

    /// `Created -> AwaitingVerification`.
    pub fn attach_document(&mut self, document: DocumentReference) -> Result<(), CertificationError> {
        self.transition(Step::Uploading, |s| s.attach_document(document))?;
        info!("session {}: document attached", self.session.id());
        Ok(())
    }

    /// `AwaitingVerification -> AwaitingSignature` with evidence captured elsewhere.
    pub fn attach_evidence(&mut self, evidence: IdentityEvidence) -> Result<(), CertificationError> {
        self.transition(Step::Verifying, |s| s.attach_evidence(evidence))?;
        info!("session {}: identity evidence attached", self.session.id());
        Ok(())
    }

    /// Captures evidence with `collector` and attaches it.
    ///
    /// The session sits in `Verifying` while the capture runs and returns to
    /// `AwaitingVerification` if the capture fails or the returned future is
    /// dropped before completion.
    pub async fn verify_identity(
        &mut self,
        collector: &IdentityEvidenceCollector,
        method: EvidenceMethod,
        timeout: Option<Duration>,
        cancel: &CancellationSignal,
    ) -> Result<(), CertificationError> {
        if self.session.stage() != &Stage::AwaitingVerification {
            let err = CertificationError::invalid_transition(self.session.stage(), "verify identity");
            return Err(self.report(Step::Verifying, err));
        }
        let busy = BusySession::enter(&mut self.session, "verify identity")?;
        debug!("session {}: capturing {} evidence", busy.session().id(), method);

        let attached = match collector.capture(method, timeout, cancel).await {
            Ok(evidence) => busy.session().attach_evidence(evidence),
            Err(e) => Err(e),
        };
        match attached {
            Ok(next) => {
                busy.commit(next);
                self.last_failure = None;
                info!("session {}: identity verified by {}", self.session.id(), method);
                Ok(())
            }
            Err(e) => {
                drop(busy);
                Err(self.report(Step::Verifying, e))
            }
        }
    }

    /// `AwaitingSignature -> Finalizing`.
    pub fn attach_signature(&mut self, signature: SignatureArtifact) -> Result<(), CertificationError> {
        self.transition(Step::Signing, |s| s.attach_signature(signature))?;
        info!("session {}: signature attached", self.session.id());
        Ok(())
    }

    /// Exports the artifact drawn on `capture` and attaches it.
    ///
    /// The surface is disabled while the signature is attached and stays
    /// disabled once it is accepted; a rejected signature re-enables it so the
    /// user can draw again.
    pub fn sign_with(&mut self, capture: &mut SignatureCapture) -> Result<(), CertificationError> {
        // Out-of-order calls must be reported as such, not as an empty signature.
        if self.session.stage() != &Stage::AwaitingSignature {
            let err = CertificationError::invalid_transition(self.session.stage(), "attach signature");
            return Err(self.report(Step::Signing, err));
        }
        capture.set_disabled(true);
        debug!("session {}: signing with {} strokes", self.session.id(), capture.stroke_count());
        let attached = match capture.export_artifact() {
            Ok(artifact) => self.attach_signature(artifact),
            Err(e) => Err(self.report(Step::Signing, e)),
        };
        if attached.is_err() {
            capture.set_disabled(false);
        }
        attached
    }

    /// Persists the certification.
    ///
    /// Idempotent: on a `Completed` session the stored receipt is returned and
    /// `persistence` is not called. From `Failed(Finalizing, Persistence)` the
    /// call is a retry with the artifacts already captured.
    pub async fn finalize(
        &mut self,
        persistence: &dyn DocumentPersistence,
    ) -> Result<CertificationReceipt, CertificationError> {
        if let (Stage::Completed, Some(receipt)) = (self.session.stage(), self.session.receipt()) {
            debug!("session {} already completed, reusing receipt", self.session.id());
            return Ok(receipt.clone());
        }
        if self.session.can_retry_finalize() {
            info!("session {}: retrying finalize", self.session.id());
            self.session = self.session.retry_finalize()?;
        }
        let request = match self.session.certification_request() {
            Ok(request) => request,
            Err(e) => return Err(self.report(Step::Finalizing, e)),
        };

        match persistence.persist(&request).await {
            Ok(receipt) => {
                self.session = self.session.complete(receipt.clone())?;
                info!(
                    "session {}: document {} certified as {}",
                    self.session.id(),
                    request.document.id(),
                    receipt.certification_id
                );
                self.notifier.notify(Notification::new(
                    "Document certified",
                    format!("Certification {} recorded.", receipt.certification_id),
                    NotificationVariant::Success,
                ));
                Ok(receipt)
            }
            Err(e) => {
                let message = match e {
                    CertificationError::Persistence(message) => message,
                    other => other.to_string(),
                };
                self.session = self.session.fail(FailureReason::Persistence(message.clone()))?;
                Err(self.report(Step::Finalizing, CertificationError::Persistence(message)))
            }
        }
    }

    /// Gives up on the session, moving it into `Failed`.
    ///
    /// If the current step already failed recoverably, that failure becomes the
    /// recorded reason (`Failed(Uploading, InvalidDocument)` after a rejected
    /// upload). Otherwise the reason is `Abandoned`.
    pub fn abandon(&mut self) -> Result<(), CertificationError> {
        let step = self.session.stage().step().unwrap_or(Step::Finalizing);
        let reason = match &self.last_failure {
            Some((failed_step, err)) if *failed_step == step => FailureReason::for_error(err),
            _ => FailureReason::Abandoned,
        };
        match self.session.fail(reason) {
            Ok(next) => self.session = next,
            Err(e) => return Err(self.report(step, e)),
        }
        info!("session {} ended as {}", self.session.id(), self.session.stage());
        Ok(())
    }
}
