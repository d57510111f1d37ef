// src/identity/collector.rs
//! Registry of the evidence strategies offered on the current device.

use crate::errors::CertificationError;
use crate::identity::cancel::CancellationSignal;
use crate::identity::facial::DEFAULT_FACIAL_TIMEOUT;
use crate::identity::CaptureStrategy;
use crate::models::evidence::{EvidenceMethod, IdentityEvidence};
use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Default capture deadline per method. `None` means no deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTimeouts {
    pub nfc: Option<Duration>,
    pub facial: Option<Duration>,
    pub video: Option<Duration>,
}

impl Default for CaptureTimeouts {
    /// NFC reads are user-driven and video sessions are bounded by their own
    /// scheduling, so only facial capture has a deadline.
    fn default() -> Self {
        Self {
            nfc: None,
            facial: Some(DEFAULT_FACIAL_TIMEOUT),
            video: None,
        }
    }
}

impl CaptureTimeouts {
    pub fn for_method(&self, method: EvidenceMethod) -> Option<Duration> {
        match method {
            EvidenceMethod::Nfc => self.nfc,
            EvidenceMethod::Facial => self.facial,
            EvidenceMethod::Video => self.video,
        }
    }
}

/// Dispatches capture requests to the registered strategy for a method.
#[derive(Clone, Default)]
pub struct IdentityEvidenceCollector {
    strategies: Vec<Arc<dyn CaptureStrategy>>,
    timeouts: CaptureTimeouts,
}

impl IdentityEvidenceCollector {
    pub fn new(timeouts: CaptureTimeouts) -> Self {
        Self {
            strategies: Vec::new(),
            timeouts,
        }
    }

    /// Adds a strategy, replacing any earlier one for the same method.
    pub fn register(&mut self, strategy: Arc<dyn CaptureStrategy>) {
        let method = strategy.method();
        self.strategies.retain(|s| s.method() != method);
        debug!("registered {} evidence strategy", method);
        self.strategies.push(strategy);
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn CaptureStrategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn timeouts(&self) -> &CaptureTimeouts {
        &self.timeouts
    }

    pub fn strategy(&self, method: EvidenceMethod) -> Option<&Arc<dyn CaptureStrategy>> {
        self.strategies.iter().find(|s| s.method() == method)
    }

    /// Methods whose strategy reports itself available, in registration order.
    pub async fn available_methods(&self) -> Vec<EvidenceMethod> {
        let checks = self.strategies.iter().map(|s| async move {
            let available = s.is_available().await;
            (s.method(), available)
        });
        join_all(checks)
            .await
            .into_iter()
            .filter_map(|(method, available)| available.then_some(method))
            .collect()
    }

    /// First available method from `preference`, if any.
    pub async fn preferred_method(&self, preference: &[EvidenceMethod]) -> Option<EvidenceMethod> {
        let available = self.available_methods().await;
        preference.iter().copied().find(|m| available.contains(m))
    }

    /// Runs the strategy for `method`.
    ///
    /// `timeout` overrides the per-method default when given.
    pub async fn capture(
        &self,
        method: EvidenceMethod,
        timeout: Option<Duration>,
        cancel: &CancellationSignal,
    ) -> Result<IdentityEvidence, CertificationError> {
        let Some(strategy) = self.strategy(method) else {
            warn!("no {} strategy registered", method);
            return Err(CertificationError::Unavailable(method));
        };
        let timeout = timeout.or_else(|| self.timeouts.for_method(method));
        info!("capturing {} evidence (timeout {:?})", method, timeout);
        strategy.capture(timeout, cancel).await
    }
}
