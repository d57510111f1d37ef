// src/storage/session_store.rs
//! In-memory registry of live certification sessions.
//!
//! Completed sessions are kept for a retention period so the client can read
//! the receipt again, then dropped on the next sweep.

use crate::identity::cancel::CancellationSignal;
use crate::identity::nfc::NfcProgress;
use crate::models::session::Stage;
use crate::services::notifier::Notifier;
use crate::services::pipeline::CertificationPipeline;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// How long a completed session stays readable by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

/// One session and the controls around it.
///
/// The pipeline sits behind an async mutex held for the whole transition, so
/// a second request on the same session finds it locked and is turned away.
pub struct SessionEntry {
    id: Uuid,
    pub pipeline: tokio::sync::Mutex<CertificationPipeline>,
    cancel: Mutex<CancellationSignal>,
    nfc_progress: NfcProgress,
}

impl SessionEntry {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn signal(&self) -> MutexGuard<'_, CancellationSignal> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh signal for a capture about to start.
    pub fn begin_capture(&self) -> CancellationSignal {
        let signal = CancellationSignal::new();
        *self.signal() = signal.clone();
        signal
    }

    /// Cancels the capture in flight, if any. Returns whether one was running.
    pub fn cancel_capture(&self) -> bool {
        let running = self.pipeline.try_lock().is_err();
        self.signal().cancel();
        running
    }

    /// Status of the session's latest NFC read. Readable while it runs.
    pub fn nfc_progress(&self) -> &NfcProgress {
        &self.nfc_progress
    }

    /// Whether the session completed more than `retention` before `now`.
    ///
    /// A session whose pipeline is locked is never expired.
    fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let Ok(pipeline) = self.pipeline.try_lock() else {
            return false;
        };
        match (pipeline.stage(), pipeline.session().finalized_at()) {
            (Stage::Completed, Some(finalized_at)) => now
                .signed_duration_since(finalized_at)
                .to_std()
                .map(|age| age >= retention)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Sessions keyed by id.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Arc<SessionEntry>>>,
    notifier: Arc<dyn Notifier>,
    retention: Duration,
}

impl SessionStore {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            notifier,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Sets how long completed sessions stay readable.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<SessionEntry>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a new session in `Created`, sweeping expired ones first.
    pub fn create(&self) -> Arc<SessionEntry> {
        self.evict_completed(Utc::now());
        let pipeline = CertificationPipeline::new(self.notifier.clone());
        let entry = Arc::new(SessionEntry {
            id: pipeline.session().id(),
            pipeline: tokio::sync::Mutex::new(pipeline),
            cancel: Mutex::new(CancellationSignal::new()),
            nfc_progress: NfcProgress::default(),
        });
        self.sessions().insert(entry.id, entry.clone());
        entry
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<SessionEntry>> {
        self.sessions().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<SessionEntry>> {
        self.sessions().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Drops sessions that completed more than the retention period ago.
    ///
    /// # Returns
    /// How many sessions were dropped.
    pub fn evict_completed(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.is_expired(now, self.retention));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("dropped {} completed sessions, {} open", evicted, sessions.len());
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::DocumentReference;
    use crate::models::evidence::{EvidenceMethod, IdentityEvidence};
    use crate::services::notifier::LogNotifier;
    use crate::signature::capture::{InputPoint, SignatureCapture, SurfaceConfig};
    use crate::storage::certification_store::CertificationStore;
    use serde_json::json;

    async fn complete(entry: &SessionEntry) {
        let mut pipeline = entry.pipeline.lock().await;
        pipeline
            .attach_document(DocumentReference::new("d1", "Poder", 512, "application/pdf"))
            .unwrap();
        pipeline
            .attach_evidence(IdentityEvidence::new(EvidenceMethod::Facial, json!({ "verificationId": "v" })))
            .unwrap();
        let mut capture = SignatureCapture::new(SurfaceConfig::default()).unwrap();
        capture
            .replay(&[vec![InputPoint::new(20.0, 20.0), InputPoint::new(80.0, 40.0)]])
            .unwrap();
        pipeline.sign_with(&mut capture).unwrap();
        pipeline.finalize(&CertificationStore::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let store = SessionStore::new(Arc::new(LogNotifier));
        let entry = store.create();

        let found = store.get(&entry.id()).unwrap();
        assert_eq!(found.pipeline.lock().await.stage(), &Stage::Created);
        assert_eq!(store.len(), 1);
        assert!(store.remove(&entry.id()).is_some());
        assert!(store.get(&entry.id()).is_none());
    }

    #[tokio::test]
    async fn test_cancel_reaches_current_capture() {
        let store = SessionStore::new(Arc::new(LogNotifier));
        let entry = store.create();

        let stale = entry.begin_capture();
        let current = entry.begin_capture();
        let guard = entry.pipeline.lock().await;
        assert!(entry.cancel_capture());
        drop(guard);

        assert!(current.is_cancelled());
        assert!(!stale.is_cancelled());
        assert!(!entry.cancel_capture());
    }

    #[tokio::test]
    async fn test_completed_sessions_expire_after_retention() {
        let store = SessionStore::new(Arc::new(LogNotifier)).with_retention(Duration::from_secs(60));
        let done = store.create();
        let open = store.create();
        complete(&done).await;

        assert_eq!(store.evict_completed(Utc::now()), 0);
        assert!(store.get(&done.id()).is_some());

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(store.evict_completed(later), 1);
        assert!(store.get(&done.id()).is_none());
        assert!(store.get(&open.id()).is_some());
    }

    #[tokio::test]
    async fn test_create_sweeps_expired_sessions() {
        let store = SessionStore::new(Arc::new(LogNotifier)).with_retention(Duration::ZERO);
        let done = store.create();
        complete(&done).await;

        let next = store.create();
        assert!(store.get(&done.id()).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.get(&next.id()).is_some());
    }

    #[tokio::test]
    async fn test_locked_session_is_not_evicted() {
        let store = SessionStore::new(Arc::new(LogNotifier)).with_retention(Duration::ZERO);
        let done = store.create();
        complete(&done).await;

        let guard = done.pipeline.lock().await;
        assert_eq!(store.evict_completed(Utc::now()), 0);
        drop(guard);
        assert_eq!(store.evict_completed(Utc::now()), 1);
    }
}
