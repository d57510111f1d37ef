// src/identity/nfc.rs
//! NFC chip read of the national identity card.
//!
//! The reader hardware reports events on a channel; [`NfcStrategy`] turns that
//! event stream into a single evidence value while publishing its progress as
//! `idle -> waiting -> reading -> {success | error}`.
//!
//! # Cancellation
//! Once a scan has started there is no way to stop it from here: Web NFC
//! offers no reliable stop primitive. Cancelling only detaches this strategy
//! from the event stream; the hardware scan may keep running until the page
//! context ends. This is a platform limitation and is logged, not hidden.

use crate::errors::CertificationError;
use crate::identity::cancel::CancellationSignal;
use crate::identity::cedula::{self, CedulaRecord};
use crate::identity::capability::{Capability, PlatformCapabilities};
use crate::identity::{bounded, CaptureStrategy};
use crate::models::evidence::{EvidenceMethod, IdentityEvidence};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Kind of NFC reader the scan goes through.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NfcReaderType {
    /// Web NFC in a mobile browser.
    WebNfc,
    /// External reader on a point-of-sale terminal.
    PosDevice,
    /// Native Android host bridge.
    AndroidHost,
}

impl NfcReaderType {
    /// Capability that must be present for this reader to work.
    pub fn capability(&self) -> Capability {
        match self {
            NfcReaderType::WebNfc => Capability::WebNfc,
            NfcReaderType::PosDevice => Capability::PosNfcReader,
            NfcReaderType::AndroidHost => Capability::AndroidNfcBridge,
        }
    }
}

/// Progress of an NFC read, for UI feedback.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NfcReadStatus {
    Idle,
    Waiting,
    Reading,
    Success,
    Error,
}

/// Shared view of an NFC read's progress.
///
/// Clones share one channel, so a session can hand the same progress to every
/// capture it runs and report the latest status between requests.
#[derive(Clone)]
pub struct NfcProgress {
    status: Arc<watch::Sender<NfcReadStatus>>,
}

impl Default for NfcProgress {
    fn default() -> Self {
        let (status, _) = watch::channel(NfcReadStatus::Idle);
        Self {
            status: Arc::new(status),
        }
    }
}

impl NfcProgress {
    pub fn current(&self) -> NfcReadStatus {
        *self.status.borrow()
    }

    /// Live view of the read progress.
    pub fn subscribe(&self) -> watch::Receiver<NfcReadStatus> {
        self.status.subscribe()
    }

    /// Waits until the status differs from `since`, for at most `limit`.
    ///
    /// # Returns
    /// The status at the time the wait ended.
    pub async fn changed_from(&self, since: NfcReadStatus, limit: Duration) -> NfcReadStatus {
        let mut updates = self.subscribe();
        let changed = tokio::time::timeout(limit, updates.wait_for(|status| *status != since))
            .await
            .is_ok();
        if !changed {
            debug!("NFC status still {:?} after {:?}", since, limit);
        }
        self.current()
    }

    fn set(&self, status: NfcReadStatus) {
        debug!("NFC read status: {:?}", status);
        self.status.send_replace(status);
    }
}

/// One NDEF record as exposed by the reader.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NdefRecord {
    pub record_type: String,
    pub data: Vec<u8>,
}

impl NdefRecord {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            record_type: "text".into(),
            data: data.into().into_bytes(),
        }
    }
}

/// Hardware events emitted during a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum NfcEvent {
    /// A tag entered the field.
    Proximity { serial_number: Option<String> },
    /// A complete NDEF message was read from the tag.
    Message {
        serial_number: Option<String>,
        records: Vec<NdefRecord>,
    },
    /// The reader reported a failure.
    ReadError(String),
}

/// Access to NFC hardware.
#[async_trait]
pub trait NfcReader: Send + Sync {
    fn reader_type(&self) -> NfcReaderType;

    /// Starts scanning and returns the event stream.
    ///
    /// Dropping the receiver detaches the listener; it does not stop the scan.
    async fn scan(&self) -> Result<mpsc::Receiver<NfcEvent>, CertificationError>;
}

/// Finds the first parseable cédula among the message records.
fn extract_cedula(records: &[NdefRecord]) -> Result<CedulaRecord, CertificationError> {
    let mut last_error = None;
    for record in records.iter().filter(|r| r.record_type == "text") {
        let Ok(text) = std::str::from_utf8(&record.data) else {
            continue;
        };
        if !cedula::is_candidate(text) {
            continue;
        }
        match cedula::parse(text) {
            Ok(cedula) => return Ok(cedula),
            Err(e) => {
                debug!("skipping unparseable identity record: {}", e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        CertificationError::MalformedEvidence("tag carried no identity record".into())
    }))
}

/// Evidence strategy reading the cédula chip over NFC.
pub struct NfcStrategy {
    reader: Arc<dyn NfcReader>,
    platform: Arc<dyn PlatformCapabilities>,
    progress: NfcProgress,
}

impl NfcStrategy {
    pub fn new(reader: Arc<dyn NfcReader>, platform: Arc<dyn PlatformCapabilities>) -> Self {
        Self {
            reader,
            platform,
            progress: NfcProgress::default(),
        }
    }

    /// Publishes progress on `progress` instead of a private channel.
    pub fn with_progress(mut self, progress: NfcProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &NfcProgress {
        &self.progress
    }

    fn set_status(&self, status: NfcReadStatus) {
        self.progress.set(status);
    }

    fn fail(&self, error: CertificationError) -> Result<IdentityEvidence, CertificationError> {
        self.set_status(NfcReadStatus::Error);
        Err(error)
    }

    async fn read(&self) -> Result<IdentityEvidence, CertificationError> {
        let mut events = self.reader.scan().await?;
        self.set_status(NfcReadStatus::Waiting);

        let mut serial = None;
        while let Some(event) = events.recv().await {
            match event {
                NfcEvent::Proximity { serial_number } => {
                    serial = serial_number.or(serial);
                    self.set_status(NfcReadStatus::Reading);
                }
                NfcEvent::Message {
                    serial_number,
                    records,
                } => {
                    self.set_status(NfcReadStatus::Reading);
                    let serial = serial_number.or(serial);
                    let cedula = match extract_cedula(&records) {
                        Ok(cedula) => cedula,
                        Err(e) => return self.fail(e),
                    };

                    self.set_status(NfcReadStatus::Success);
                    info!("NFC identity record read for RUT {}", cedula.rut);
                    let payload = json!({
                        "readerType": self.reader.reader_type(),
                        "serialNumber": serial,
                        "cedula": cedula,
                    });
                    return Ok(IdentityEvidence::new(EvidenceMethod::Nfc, payload));
                }
                NfcEvent::ReadError(message) => {
                    return self.fail(CertificationError::MalformedEvidence(format!(
                        "NFC read failed: {}",
                        message
                    )));
                }
            }
        }

        self.fail(CertificationError::MalformedEvidence(
            "NFC scan ended before an identity record was read".into(),
        ))
    }
}

#[async_trait]
impl CaptureStrategy for NfcStrategy {
    fn method(&self) -> EvidenceMethod {
        EvidenceMethod::Nfc
    }

    async fn is_available(&self) -> bool {
        self.platform
            .has_capability(self.reader.reader_type().capability())
            .await
    }

    async fn capture(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationSignal,
    ) -> Result<IdentityEvidence, CertificationError> {
        if !self.is_available().await {
            return Err(CertificationError::Unavailable(EvidenceMethod::Nfc));
        }

        let outcome = bounded(EvidenceMethod::Nfc, timeout, cancel, self.read()).await;
        match &outcome {
            Err(CertificationError::UserCancelled(_)) => {
                warn!(
                    "NFC capture cancelled; listener detached but the hardware scan \
                     may continue until the page context ends"
                );
                self.set_status(NfcReadStatus::Idle);
            }
            Err(CertificationError::Timeout { .. }) => self.set_status(NfcReadStatus::Error),
            _ => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::capability::StaticCapabilities;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const RECORD: &str =
        "RUN:12.345.678-5|JUAN PEDRO|GONZÁLEZ RODRÍGUEZ|1985-06-15|2018-03-22|2028-03-22|M|CHL";

    /// Replays a fixed event script; optionally keeps the stream open afterwards.
    struct ScriptedReader {
        events: Vec<NfcEvent>,
        keep_open: bool,
        scans: AtomicUsize,
        open_senders: Mutex<Vec<mpsc::Sender<NfcEvent>>>,
    }

    impl ScriptedReader {
        fn new(events: Vec<NfcEvent>) -> Self {
            Self {
                events,
                keep_open: false,
                scans: AtomicUsize::new(0),
                open_senders: Mutex::new(Vec::new()),
            }
        }

        fn held_open(events: Vec<NfcEvent>) -> Self {
            Self {
                keep_open: true,
                ..Self::new(events)
            }
        }
    }

    #[async_trait]
    impl NfcReader for ScriptedReader {
        fn reader_type(&self) -> NfcReaderType {
            NfcReaderType::WebNfc
        }

        async fn scan(&self) -> Result<mpsc::Receiver<NfcEvent>, CertificationError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(self.events.len() + 1);
            for event in &self.events {
                tx.try_send(event.clone()).unwrap();
            }
            if self.keep_open {
                self.open_senders.lock().unwrap().push(tx);
            }
            Ok(rx)
        }
    }

    fn strategy(reader: Arc<ScriptedReader>, platform: StaticCapabilities) -> NfcStrategy {
        NfcStrategy::new(reader, Arc::new(platform))
    }

    fn web_nfc() -> StaticCapabilities {
        StaticCapabilities::none().with(Capability::WebNfc)
    }

    #[tokio::test]
    async fn test_unavailable_never_touches_hardware() {
        let reader = Arc::new(ScriptedReader::new(vec![]));
        let nfc = strategy(reader.clone(), StaticCapabilities::none());

        let outcome = nfc.capture(None, &CancellationSignal::new()).await;
        assert_eq!(outcome, Err(CertificationError::Unavailable(EvidenceMethod::Nfc)));
        assert_eq!(reader.scans.load(Ordering::SeqCst), 0);
        assert_eq!(nfc.progress().current(), NfcReadStatus::Idle);
    }

    #[tokio::test]
    async fn test_reads_cedula_from_message() {
        let reader = Arc::new(ScriptedReader::new(vec![
            NfcEvent::Proximity {
                serial_number: Some("04:A2:19".into()),
            },
            NfcEvent::Message {
                serial_number: None,
                records: vec![
                    NdefRecord {
                        record_type: "url".into(),
                        data: b"https://example.cl".to_vec(),
                    },
                    NdefRecord::text(RECORD),
                ],
            },
        ]));
        let nfc = strategy(reader, web_nfc());
        let mut progress = nfc.progress().subscribe();

        let evidence = nfc.capture(None, &CancellationSignal::new()).await.unwrap();
        assert_eq!(evidence.method(), EvidenceMethod::Nfc);
        assert_eq!(evidence.payload()["serialNumber"], "04:A2:19");
        assert_eq!(evidence.payload()["readerType"], "web_nfc");
        assert_eq!(evidence.payload()["cedula"]["rut"], "12.345.678-5");
        assert_eq!(nfc.progress().current(), NfcReadStatus::Success);
        assert!(progress.has_changed().unwrap());
        assert_eq!(*progress.borrow_and_update(), NfcReadStatus::Success);
    }

    #[tokio::test]
    async fn test_tag_without_identity_record_is_malformed() {
        let reader = Arc::new(ScriptedReader::new(vec![NfcEvent::Message {
            serial_number: Some("01".into()),
            records: vec![NdefRecord::text("hello world")],
        }]));
        let nfc = strategy(reader, web_nfc());

        let outcome = nfc.capture(None, &CancellationSignal::new()).await;
        assert!(matches!(outcome, Err(CertificationError::MalformedEvidence(_))));
        assert_eq!(nfc.progress().current(), NfcReadStatus::Error);
    }

    #[tokio::test]
    async fn test_reader_error_is_malformed() {
        let reader = Arc::new(ScriptedReader::new(vec![NfcEvent::ReadError(
            "tag lost".into(),
        )]));
        let nfc = strategy(reader, web_nfc());

        let outcome = nfc.capture(None, &CancellationSignal::new()).await;
        assert_eq!(
            outcome,
            Err(CertificationError::MalformedEvidence("NFC read failed: tag lost".into()))
        );
    }

    #[tokio::test]
    async fn test_waiting_read_times_out() {
        let reader = Arc::new(ScriptedReader::held_open(vec![]));
        let nfc = strategy(reader, web_nfc());

        let outcome = nfc
            .capture(Some(Duration::from_millis(20)), &CancellationSignal::new())
            .await;
        assert!(matches!(outcome, Err(CertificationError::Timeout { .. })));
        assert_eq!(nfc.progress().current(), NfcReadStatus::Error);
    }

    #[tokio::test]
    async fn test_cancel_detaches_listener() {
        let reader = Arc::new(ScriptedReader::held_open(vec![NfcEvent::Proximity {
            serial_number: None,
        }]));
        let nfc = strategy(reader.clone(), web_nfc());
        let cancel = CancellationSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = nfc.capture(None, &cancel).await;
        assert_eq!(outcome, Err(CertificationError::UserCancelled(EvidenceMethod::Nfc)));
        assert_eq!(nfc.progress().current(), NfcReadStatus::Idle);
        // The scan itself is still "running": the reader's sender is alive but
        // nobody listens any more.
        let senders = reader.open_senders.lock().unwrap();
        assert!(senders[0].is_closed());
    }

    #[tokio::test]
    async fn test_status_moves_through_waiting_and_reading() {
        let reader = Arc::new(ScriptedReader::held_open(vec![]));
        let nfc = Arc::new(strategy(reader.clone(), web_nfc()));
        let mut progress = nfc.progress().subscribe();
        let mut seen = vec![*progress.borrow_and_update()];

        let running = nfc.clone();
        let task = tokio::spawn(async move { running.capture(None, &CancellationSignal::new()).await });

        progress.changed().await.unwrap();
        seen.push(*progress.borrow_and_update());
        let sender = reader.open_senders.lock().unwrap()[0].clone();

        sender
            .send(NfcEvent::Proximity {
                serial_number: Some("04:A2:19".into()),
            })
            .await
            .unwrap();
        progress.changed().await.unwrap();
        seen.push(*progress.borrow_and_update());

        sender
            .send(NfcEvent::Message {
                serial_number: None,
                records: vec![NdefRecord::text(RECORD)],
            })
            .await
            .unwrap();
        let evidence = task.await.unwrap().unwrap();
        seen.push(*progress.borrow_and_update());

        assert_eq!(evidence.payload()["serialNumber"], "04:A2:19");
        assert_eq!(
            seen,
            vec![
                NfcReadStatus::Idle,
                NfcReadStatus::Waiting,
                NfcReadStatus::Reading,
                NfcReadStatus::Success
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_progress_outlives_strategy() {
        let progress = NfcProgress::default();
        let reader = Arc::new(ScriptedReader::new(vec![NfcEvent::Message {
            serial_number: None,
            records: vec![NdefRecord::text(RECORD)],
        }]));
        strategy(reader, web_nfc())
            .with_progress(progress.clone())
            .capture(None, &CancellationSignal::new())
            .await
            .unwrap();

        assert_eq!(progress.current(), NfcReadStatus::Success);
        let status = progress
            .changed_from(NfcReadStatus::Success, Duration::from_millis(10))
            .await;
        assert_eq!(status, NfcReadStatus::Success);
        let status = progress
            .changed_from(NfcReadStatus::Waiting, Duration::from_millis(10))
            .await;
        assert_eq!(status, NfcReadStatus::Success);
    }
}
