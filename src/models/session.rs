// src/models/session.rs
//! Certification session state machine.
//!
//! A [`CertificationSession`] is a value object: every transition borrows the
//! current session and returns a new one, leaving the original untouched when
//! the guard rejects the operation. The stage order is
//!
//! ```text
//! Created -> Uploading -> AwaitingVerification -> Verifying
//!         -> AwaitingSignature -> Signing -> Finalizing -> Completed
//! ```
//!
//! with `Failed { step, reason }` reachable from any non-terminal stage.
//! `Uploading`, `Verifying` and `Signing` are busy stages entered while the
//! matching transition is in flight.

use crate::errors::CertificationError;
use crate::models::document::DocumentReference;
use crate::models::evidence::IdentityEvidence;
use crate::models::signature::SignatureArtifact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pipeline step a failure is attributed to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Uploading,
    Verifying,
    Signing,
    Finalizing,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Uploading => "Uploading",
            Step::Verifying => "Verifying",
            Step::Signing => "Signing",
            Step::Finalizing => "Finalizing",
        };
        f.write_str(name)
    }
}

/// Why a session ended up in `Failed`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum FailureReason {
    InvalidDocument,
    Verification(String),
    EmptySignature,
    Persistence(String),
    /// The user walked away from the flow.
    Abandoned,
}

impl FailureReason {
    /// Reason recorded when a session is given up after `err`.
    pub fn for_error(err: &CertificationError) -> Self {
        match err {
            CertificationError::InvalidDocument(_) => FailureReason::InvalidDocument,
            CertificationError::EmptySignature => FailureReason::EmptySignature,
            CertificationError::Persistence(msg) => FailureReason::Persistence(msg.clone()),
            CertificationError::InvalidStateTransition { .. } => FailureReason::Abandoned,
            other => FailureReason::Verification(other.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidDocument => write!(f, "invalid document"),
            FailureReason::Verification(msg) => write!(f, "verification: {}", msg),
            FailureReason::EmptySignature => write!(f, "empty signature"),
            FailureReason::Persistence(msg) => write!(f, "persistence: {}", msg),
            FailureReason::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Stage of a certification session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum Stage {
    Created,
    Uploading,
    AwaitingVerification,
    Verifying,
    AwaitingSignature,
    Signing,
    Finalizing,
    Completed,
    Failed { step: Step, reason: FailureReason },
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed { .. })
    }

    /// Whether a transition is currently in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Stage::Uploading | Stage::Verifying | Stage::Signing)
    }

    /// The pipeline step this stage belongs to, `None` for `Completed`.
    pub fn step(&self) -> Option<Step> {
        match self {
            Stage::Created | Stage::Uploading => Some(Step::Uploading),
            Stage::AwaitingVerification | Stage::Verifying => Some(Step::Verifying),
            Stage::AwaitingSignature | Stage::Signing => Some(Step::Signing),
            Stage::Finalizing => Some(Step::Finalizing),
            Stage::Completed => None,
            Stage::Failed { step, .. } => Some(*step),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Created => write!(f, "Created"),
            Stage::Uploading => write!(f, "Uploading"),
            Stage::AwaitingVerification => write!(f, "AwaitingVerification"),
            Stage::Verifying => write!(f, "Verifying"),
            Stage::AwaitingSignature => write!(f, "AwaitingSignature"),
            Stage::Signing => write!(f, "Signing"),
            Stage::Finalizing => write!(f, "Finalizing"),
            Stage::Completed => write!(f, "Completed"),
            Stage::Failed { step, reason } => write!(f, "Failed({}, {})", step, reason),
        }
    }
}

/// Result handed back by the persistence collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificationReceipt {
    pub certification_id: String,
    pub verified_at: DateTime<Utc>,
}

/// The triple sent to the persistence collaborator on finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificationRequest {
    pub document: DocumentReference,
    pub evidence: IdentityEvidence,
    pub signature: SignatureArtifact,
}

/// Aggregate state of one certification flow.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificationSession {
    id: Uuid,
    stage: Stage,
    document: Option<DocumentReference>,
    evidence: Option<IdentityEvidence>,
    signature: Option<SignatureArtifact>,
    finalized_at: Option<DateTime<Utc>>,
    receipt: Option<CertificationReceipt>,
}

impl Default for CertificationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificationSession {
    /// Starts a new flow in `Created`.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: Stage::Created,
            document: None,
            evidence: None,
            signature: None,
            finalized_at: None,
            receipt: None,
        }
    }

    /// Random v4 id, used as the API path key.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Attached document. Present from `AwaitingVerification` onward.
    pub fn document(&self) -> Option<&DocumentReference> {
        self.document.as_ref()
    }

    /// Attached identity evidence. Present from `AwaitingSignature` onward.
    pub fn evidence(&self) -> Option<&IdentityEvidence> {
        self.evidence.as_ref()
    }

    pub fn signature(&self) -> Option<&SignatureArtifact> {
        self.signature.as_ref()
    }

    /// Set only once the session reaches `Completed`.
    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    pub fn receipt(&self) -> Option<&CertificationReceipt> {
        self.receipt.as_ref()
    }

    fn with_stage(&self, stage: Stage) -> Self {
        let mut next = self.clone();
        next.stage = stage;
        next
    }

    /// Enters the busy stage of the current step.
    ///
    /// # Errors
    /// [`CertificationError::InvalidStateTransition`] unless the session is
    /// `Created`, `AwaitingVerification` or `AwaitingSignature`.
    pub fn mark_busy(&self, operation: &'static str) -> Result<Self, CertificationError> {
        let busy = match self.stage {
            Stage::Created => Stage::Uploading,
            Stage::AwaitingVerification => Stage::Verifying,
            Stage::AwaitingSignature => Stage::Signing,
            ref other => return Err(CertificationError::invalid_transition(other, operation)),
        };
        Ok(self.with_stage(busy))
    }

    /// Leaves a busy stage after a recoverable failure. Other stages are kept.
    pub fn release_busy(&self) -> Self {
        match self.stage {
            Stage::Uploading => self.with_stage(Stage::Created),
            Stage::Verifying => self.with_stage(Stage::AwaitingVerification),
            Stage::Signing => self.with_stage(Stage::AwaitingSignature),
            _ => self.clone(),
        }
    }

    /// `Created -> AwaitingVerification`.
    ///
    /// # Errors
    /// - [`CertificationError::InvalidDocument`] if the reference fails its guard;
    ///   the session is unchanged
    /// - [`CertificationError::InvalidStateTransition`] outside `Created`/`Uploading`
    pub fn attach_document(&self, document: DocumentReference) -> Result<Self, CertificationError> {
        const OPERATION: &str = "attach document";
        match self.stage {
            Stage::Created | Stage::Uploading => {}
            ref other => return Err(CertificationError::invalid_transition(other, OPERATION)),
        }
        document.validate()?;

        let mut next = self.with_stage(Stage::AwaitingVerification);
        next.document = Some(document);
        Ok(next)
    }

    /// `AwaitingVerification -> AwaitingSignature`.
    ///
    /// At most one evidence value is ever attached: once the session has moved
    /// past verification this is an invalid transition.
    pub fn attach_evidence(&self, evidence: IdentityEvidence) -> Result<Self, CertificationError> {
        match self.stage {
            Stage::AwaitingVerification | Stage::Verifying => {}
            ref other => {
                return Err(CertificationError::invalid_transition(other, "attach evidence"))
            }
        }

        let mut next = self.with_stage(Stage::AwaitingSignature);
        next.evidence = Some(evidence);
        Ok(next)
    }

    /// `AwaitingSignature -> Finalizing`.
    ///
    /// # Errors
    /// [`CertificationError::EmptySignature`] when the artifact has no strokes.
    pub fn attach_signature(&self, signature: SignatureArtifact) -> Result<Self, CertificationError> {
        match self.stage {
            Stage::AwaitingSignature | Stage::Signing => {}
            ref other => {
                return Err(CertificationError::invalid_transition(other, "attach signature"))
            }
        }
        if signature.is_empty() {
            return Err(CertificationError::EmptySignature);
        }

        let mut next = self.with_stage(Stage::Finalizing);
        next.signature = Some(signature);
        Ok(next)
    }

    /// Whether `finalize` may be retried after a persistence failure.
    pub fn can_retry_finalize(&self) -> bool {
        matches!(
            self.stage,
            Stage::Failed {
                step: Step::Finalizing,
                reason: FailureReason::Persistence(_)
            }
        )
    }

    /// `Failed(Finalizing, Persistence) -> Finalizing`, keeping every artifact.
    pub fn retry_finalize(&self) -> Result<Self, CertificationError> {
        if !self.can_retry_finalize() {
            return Err(CertificationError::invalid_transition(&self.stage, "retry finalize"));
        }
        Ok(self.with_stage(Stage::Finalizing))
    }

    /// Collects the triple handed to the persistence collaborator.
    pub fn certification_request(&self) -> Result<CertificationRequest, CertificationError> {
        const OPERATION: &str = "finalize";
        if self.stage != Stage::Finalizing {
            return Err(CertificationError::invalid_transition(&self.stage, OPERATION));
        }
        match (&self.document, &self.evidence, &self.signature) {
            (Some(document), Some(evidence), Some(signature)) => Ok(CertificationRequest {
                document: document.clone(),
                evidence: evidence.clone(),
                signature: signature.clone(),
            }),
            _ => Err(CertificationError::invalid_transition(&self.stage, OPERATION)),
        }
    }

    /// `Finalizing -> Completed`, recording the persistence receipt.
    pub fn complete(&self, receipt: CertificationReceipt) -> Result<Self, CertificationError> {
        if self.stage != Stage::Finalizing {
            return Err(CertificationError::invalid_transition(&self.stage, "complete"));
        }

        let mut next = self.with_stage(Stage::Completed);
        next.finalized_at = Some(Utc::now());
        next.receipt = Some(receipt);
        Ok(next)
    }

    /// Moves a non-terminal session into `Failed`, attributing the failure to
    /// the current step. Captured artifacts are kept.
    pub fn fail(&self, reason: FailureReason) -> Result<Self, CertificationError> {
        if self.stage.is_terminal() {
            return Err(CertificationError::invalid_transition(&self.stage, "fail"));
        }
        let step = self.stage.step().unwrap_or(Step::Finalizing);
        Ok(self.with_stage(Stage::Failed { step, reason }))
    }
}
