// src/errors.rs
//! Error taxonomy for the certification pipeline.
//!
//! Every stage of the pipeline reports failures through [`CertificationError`].
//! Capture and validation errors are recoverable (the session keeps its stage and
//! the user retries), persistence errors move the session into a retryable
//! `Failed` stage, and invalid transitions signal a wiring bug in the caller.

use crate::models::evidence::EvidenceMethod;
use thiserror::Error;

/// Errors raised by the certification pipeline and its collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CertificationError {
    /// The document reference failed validation (empty title, zero size...).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The device or browser does not support the requested evidence method.
    #[error("{0} identity capture is not available on this device")]
    Unavailable(EvidenceMethod),

    /// No evidence was produced before the caller-supplied deadline.
    #[error("{method} identity capture timed out after {timeout_ms} ms")]
    Timeout {
        method: EvidenceMethod,
        timeout_ms: u64,
    },

    /// The user aborted the capture.
    #[error("{0} identity capture was cancelled by the user")]
    UserCancelled(EvidenceMethod),

    /// The capture produced data that could not be parsed into evidence.
    #[error("malformed identity evidence: {0}")]
    MalformedEvidence(String),

    /// The verification backend answered but did not confirm the identity.
    #[error("identity verification rejected: {0}")]
    VerificationRejected(String),

    /// The identity backend could not be reached or answered garbage.
    #[error("identity backend error: {0}")]
    Backend(String),

    /// A signature with no strokes was exported or attached.
    #[error("signature is empty, draw before continuing")]
    EmptySignature,

    /// A stroke was started on a disabled capture surface.
    #[error("signature surface is disabled")]
    SurfaceDisabled,

    /// Submitted strokes or display size cannot be mapped onto the surface.
    #[error("invalid signature input: {0}")]
    InvalidSignatureInput(String),

    /// The signature raster could not be encoded.
    #[error("signature encoding failed: {0}")]
    Encoding(String),

    /// The document persistence collaborator failed.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// An operation was invoked in a stage that does not accept it.
    #[error("cannot {operation} while session is {state}")]
    InvalidStateTransition {
        state: String,
        operation: &'static str,
    },
}

impl CertificationError {
    /// Whether the session may stay in its current stage and the user retry it.
    ///
    /// Persistence failures are retryable too, but only after the session has
    /// been moved into `Failed(Finalizing, ..)`, so they are not counted here.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CertificationError::Persistence(_) | CertificationError::InvalidStateTransition { .. }
        )
    }

    pub(crate) fn invalid_transition(state: impl ToString, operation: &'static str) -> Self {
        CertificationError::InvalidStateTransition {
            state: state.to_string(),
            operation,
        }
    }
}

impl From<reqwest::Error> for CertificationError {
    fn from(err: reqwest::Error) -> Self {
        CertificationError::Backend(err.to_string())
    }
}
