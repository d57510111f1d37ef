// src/identity/mod.rs
//! Identity evidence collection.
//!
//! Three interchangeable strategies (NFC chip read, facial capture, video
//! session) implement [`CaptureStrategy`]. Which ones are offered is decided at
//! runtime through a [`PlatformCapabilities`](capability::PlatformCapabilities), never by
//! matching platform strings.

pub mod cancel;
pub mod capability;
pub mod cedula;
pub mod collector;
pub mod facial;
pub mod nfc;
pub mod submitted;
pub mod video;

use crate::errors::CertificationError;
use crate::identity::cancel::CancellationSignal;
use crate::models::evidence::{EvidenceMethod, IdentityEvidence};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Common contract of every identity evidence strategy.
#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    /// Tag written into the evidence this strategy produces.
    fn method(&self) -> EvidenceMethod;

    /// Whether the current device supports this method. Never fails.
    async fn is_available(&self) -> bool;

    /// Produces evidence.
    ///
    /// # Errors
    /// - [`CertificationError::Unavailable`] if [`is_available`](Self::is_available) is false
    /// - [`CertificationError::Timeout`] if `timeout` elapses first
    /// - [`CertificationError::UserCancelled`] if `cancel` fires first
    /// - [`CertificationError::MalformedEvidence`] if the read succeeds but
    ///   cannot be parsed
    async fn capture(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationSignal,
    ) -> Result<IdentityEvidence, CertificationError>;
}

/// Runs `work` under an optional deadline and a cancellation signal.
///
/// Whichever finishes first wins; `work` is dropped otherwise, so anything it
/// owns is released on every exit path.
pub(crate) async fn bounded<T, F>(
    method: EvidenceMethod,
    timeout: Option<Duration>,
    cancel: &CancellationSignal,
    work: F,
) -> Result<T, CertificationError>
where
    F: Future<Output = Result<T, CertificationError>>,
{
    let deadline = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CertificationError::Timeout {
                    method,
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => work.await,
        }
    };

    tokio::select! {
        outcome = deadline => outcome,
        _ = cancel.cancelled() => Err(CertificationError::UserCancelled(method)),
    }
}
