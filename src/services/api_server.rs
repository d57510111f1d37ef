// src/services/api_server.rs
//! HTTP API over the certification pipeline.
//!
//! Each certification session is addressed by its UUID and walks through
//! Upload -> Verify -> Sign -> Finalize with one request per step:
//!
//! - `POST   /sessions`                       create a session
//! - `GET    /sessions/:id`                   current stage and artifacts
//! - `DELETE /sessions/:id`                   abandon and discard
//! - `POST   /sessions/:id/document`          attach the document reference
//! - `POST   /sessions/:id/evidence`          run an identity check on a submitted capture
//! - `POST   /sessions/:id/evidence/cancel`   cancel the identity check in flight
//! - `GET    /sessions/:id/evidence/status`   NFC read progress, `?since=` long-polls
//! - `POST   /sessions/:id/signature`         replay drawn strokes and attach the signature
//! - `POST   /sessions/:id/finalize`          persist the certification
//! - `GET    /evidence/methods`               evidence methods offered
//! - `GET    /verificar-documento/:code`      look up a locally stored certification
//!
//! A request that hits a session while another transition on it is still
//! running is answered with `409 Conflict`. Completed sessions are swept once
//! their retention period has passed.

use crate::errors::CertificationError;
use crate::identity::nfc::NfcReadStatus;
use crate::identity::submitted::{SubmittedCaptureFactory, SubmittedEvidence};
use crate::models::document::DocumentReference;
use crate::models::evidence::EvidenceMethod;
use crate::models::session::{CertificationReceipt, CertificationSession, Stage};
use crate::services::persistence::DocumentPersistence;
use crate::signature::capture::{InputPoint, SignatureCapture, SurfaceConfig};
use crate::storage::certification_store::CertificationStore;
use crate::storage::session_store::{SessionEntry, SessionStore};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

/// Upper bound on pointer samples accepted in one signature submission.
const MAX_SIGNATURE_SAMPLES: usize = 20_000;

/// Longest a status request waits for the NFC read to move on.
const STATUS_LONG_POLL: Duration = Duration::from_secs(10);

/// How often completed sessions are swept while the server runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// API request and response structures

/// Snapshot of a session returned by every session endpoint.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    session_id: Uuid,
    #[serde(flatten)]
    stage: Stage,
    document: Option<DocumentReference>,
    evidence_method: Option<EvidenceMethod>,
    signature_strokes: Option<u32>,
    receipt: Option<CertificationReceipt>,
    finalized_at: Option<DateTime<Utc>>,
}

impl From<&CertificationSession> for SessionView {
    fn from(session: &CertificationSession) -> Self {
        SessionView {
            session_id: session.id(),
            stage: session.stage().clone(),
            document: session.document().cloned(),
            evidence_method: session.evidence().map(|e| e.method()),
            signature_strokes: session.signature().map(|s| s.stroke_count()),
            receipt: session.receipt().cloned(),
            finalized_at: session.finalized_at(),
        }
    }
}

/// Strokes drawn on the client, in the coordinates of the displayed surface.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SignatureRequest {
    display_width: f32,
    display_height: f32,
    strokes: Vec<Vec<InputPoint>>,
}

/// `?since=` of the status endpoint.
#[derive(Deserialize, Debug)]
struct StatusQuery {
    since: Option<NfcReadStatus>,
}

/// Failure of an API call, rendered as `{message}`.
#[derive(Debug)]
enum ApiError {
    UnknownSession(Uuid),
    Busy(Uuid),
    NotFound(String),
    Certification(CertificationError),
}

impl From<CertificationError> for ApiError {
    fn from(err: CertificationError) -> Self {
        ApiError::Certification(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnknownSession(id) => (StatusCode::NOT_FOUND, format!("unknown session {}", id)),
            ApiError::Busy(id) => (
                StatusCode::CONFLICT,
                format!("session {} is busy with another operation", id),
            ),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Certification(err) => {
                let status = match err {
                    CertificationError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                    CertificationError::Persistence(_) | CertificationError::Backend(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    /// Live certification sessions
    sessions: Arc<SessionStore>,

    /// Builds identity strategies around submitted captures
    captures: SubmittedCaptureFactory,

    /// Collaborator called on finalize
    persistence: Arc<dyn DocumentPersistence>,

    /// Set when certifications are stored in-process
    certifications: Option<Arc<CertificationStore>>,

    /// Signature surface used to replay submitted strokes
    signature: SurfaceConfig,
}

impl ApiServer {
    /// Creates a server persisting through a remote document service.
    pub fn new(
        sessions: SessionStore,
        captures: SubmittedCaptureFactory,
        persistence: Arc<dyn DocumentPersistence>,
        signature: SurfaceConfig,
    ) -> Self {
        ApiServer {
            sessions: Arc::new(sessions),
            captures,
            persistence,
            certifications: None,
            signature,
        }
    }

    /// Creates a server persisting into `store`, which also answers
    /// verification code lookups.
    pub fn with_local_store(
        sessions: SessionStore,
        captures: SubmittedCaptureFactory,
        store: Arc<CertificationStore>,
        signature: SurfaceConfig,
    ) -> Self {
        ApiServer {
            sessions: Arc::new(sessions),
            captures,
            persistence: store.clone(),
            certifications: Some(store),
            signature,
        }
    }

    /// Builds the router with every route.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/sessions", post(Self::create_session_handler))
            .route(
                "/sessions/:id",
                get(Self::get_session_handler).delete(Self::delete_session_handler),
            )
            .route("/sessions/:id/document", post(Self::attach_document_handler))
            .route("/sessions/:id/evidence", post(Self::verify_identity_handler))
            .route("/sessions/:id/evidence/cancel", post(Self::cancel_capture_handler))
            .route("/sessions/:id/evidence/status", get(Self::capture_status_handler))
            .route("/sessions/:id/signature", post(Self::attach_signature_handler))
            .route("/sessions/:id/finalize", post(Self::finalize_handler))
            .route("/evidence/methods", get(Self::evidence_methods_handler))
            .route("/verificar-documento/:code", get(Self::verify_code_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::new(self.clone()))
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("certification API listening on {}", addr);

        let sessions = self.sessions.clone();
        let sweeper = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticks.tick().await;
                sessions.evict_completed(Utc::now());
            }
        });
        let served = axum::serve(listener, self.router()).await;
        sweeper.abort();
        served
    }

    fn entry(&self, id: Uuid) -> ApiResult<Arc<SessionEntry>> {
        self.sessions.get(&id).ok_or(ApiError::UnknownSession(id))
    }

    // =====================
    // Session lifecycle
    // =====================

    /// # Endpoint
    /// POST /sessions
    ///
    /// # Responses
    /// - 201 Created: the new session in `created`
    async fn create_session_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let entry = state.sessions.create();
        let pipeline = entry.pipeline.lock().await;
        info!("session {} created ({} open)", entry.id(), state.sessions.len());
        (StatusCode::CREATED, Json(SessionView::from(pipeline.session())))
    }

    /// # Endpoint
    /// GET /sessions/:id
    ///
    /// # Responses
    /// - 200 OK: session view
    /// - 404 Not Found: unknown session
    /// - 409 Conflict: a transition is running
    async fn get_session_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
    ) -> ApiResult<Json<SessionView>> {
        let entry = state.entry(id)?;
        let pipeline = entry.pipeline.try_lock().map_err(|_| ApiError::Busy(id))?;
        Ok(Json(SessionView::from(pipeline.session())))
    }

    /// Abandons the session and forgets it. A capture in flight is cancelled.
    ///
    /// # Endpoint
    /// DELETE /sessions/:id
    async fn delete_session_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
    ) -> ApiResult<StatusCode> {
        let entry = state.sessions.remove(&id).ok_or(ApiError::UnknownSession(id))?;
        entry.cancel_capture();
        match entry.pipeline.try_lock() {
            Ok(mut pipeline) if !pipeline.stage().is_terminal() => {
                pipeline.abandon()?;
            }
            Ok(_) => {}
            Err(_) => warn!("session {} discarded while a transition was running", id),
        }
        Ok(StatusCode::NO_CONTENT)
    }

    // =====================
    // Pipeline steps
    // =====================

    /// # Endpoint
    /// POST /sessions/:id/document
    ///
    /// # Request Body
    /// `{id, title, sizeBytes, mimeType}`
    async fn attach_document_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
        Json(document): Json<DocumentReference>,
    ) -> ApiResult<Json<SessionView>> {
        let entry = state.entry(id)?;
        let mut pipeline = entry.pipeline.try_lock().map_err(|_| ApiError::Busy(id))?;
        pipeline.attach_document(document)?;
        Ok(Json(SessionView::from(pipeline.session())))
    }

    /// Runs the identity strategy matching the submission's `method`.
    ///
    /// # Endpoint
    /// POST /sessions/:id/evidence
    ///
    /// # Responses
    /// - 200 OK: session now awaiting signature
    /// - 422 Unprocessable Entity: capture failed, the step can be retried
    /// - 502 Bad Gateway: identity backend unreachable
    async fn verify_identity_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
        Json(submission): Json<SubmittedEvidence>,
    ) -> ApiResult<Json<SessionView>> {
        let entry = state.entry(id)?;
        let mut pipeline = entry.pipeline.try_lock().map_err(|_| ApiError::Busy(id))?;
        let cancel = entry.begin_capture();

        let method = submission.method();
        let collector = state
            .captures
            .collector_for(submission, entry.nfc_progress())?;
        pipeline
            .verify_identity(&collector, method, None, &cancel)
            .await?;
        Ok(Json(SessionView::from(pipeline.session())))
    }

    /// # Endpoint
    /// POST /sessions/:id/evidence/cancel
    ///
    /// # Responses
    /// - 202 Accepted: `{cancelled}` tells whether a capture was running
    async fn cancel_capture_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
    ) -> ApiResult<impl IntoResponse> {
        let entry = state.entry(id)?;
        let cancelled = entry.cancel_capture();
        Ok((StatusCode::ACCEPTED, Json(json!({ "cancelled": cancelled }))))
    }

    /// Reports the NFC read status of the session.
    ///
    /// With `?since=<status>` the request waits (up to 10 s) until the status
    /// differs, so a UI can follow `waiting -> reading -> success` without
    /// polling. Answers while a capture holds the session.
    ///
    /// # Endpoint
    /// GET /sessions/:id/evidence/status
    ///
    /// # Responses
    /// - 200 OK: `{status}`
    async fn capture_status_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
        Query(query): Query<StatusQuery>,
    ) -> ApiResult<Json<serde_json::Value>> {
        let entry = state.entry(id)?;
        let status = match query.since {
            Some(since) => entry.nfc_progress().changed_from(since, STATUS_LONG_POLL).await,
            None => entry.nfc_progress().current(),
        };
        debug!("session {} NFC status {:?}", id, status);
        Ok(Json(json!({ "status": status })))
    }

    /// Replays the strokes on a fresh surface and attaches the result.
    ///
    /// # Endpoint
    /// POST /sessions/:id/signature
    ///
    /// # Request Body
    /// `{displayWidth, displayHeight, strokes: [[{x, y, pressure?}]]}`
    async fn attach_signature_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
        Json(request): Json<SignatureRequest>,
    ) -> ApiResult<Json<SessionView>> {
        let entry = state.entry(id)?;
        let mut pipeline = entry.pipeline.try_lock().map_err(|_| ApiError::Busy(id))?;

        let samples: usize = request.strokes.iter().map(Vec::len).sum();
        if samples > MAX_SIGNATURE_SAMPLES {
            return Err(CertificationError::InvalidSignatureInput(format!(
                "{} samples exceed the limit of {}",
                samples, MAX_SIGNATURE_SAMPLES
            ))
            .into());
        }

        let mut capture = SignatureCapture::new(state.signature.clone())?;
        capture.set_display_size(request.display_width, request.display_height)?;
        capture.replay(&request.strokes)?;
        pipeline.sign_with(&mut capture)?;
        Ok(Json(SessionView::from(pipeline.session())))
    }

    /// # Endpoint
    /// POST /sessions/:id/finalize
    ///
    /// # Responses
    /// - 200 OK: `{certificationId, verifiedAt}`; repeated calls return the same receipt
    /// - 502 Bad Gateway: persistence failed, retry later
    async fn finalize_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<Uuid>,
    ) -> ApiResult<Json<CertificationReceipt>> {
        let entry = state.entry(id)?;
        let mut pipeline = entry.pipeline.try_lock().map_err(|_| ApiError::Busy(id))?;
        let receipt = pipeline.finalize(state.persistence.as_ref()).await?;
        Ok(Json(receipt))
    }

    // =====================
    // Lookups
    // =====================

    /// Evidence methods whose strategy reports as available, and the one to
    /// offer first (NFC, then facial, then video).
    ///
    /// # Endpoint
    /// GET /evidence/methods
    ///
    /// # Responses
    /// - 200 OK: `{methods, preferred}`
    async fn evidence_methods_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let catalog = state.captures.catalog();
        let methods = catalog.available_methods().await;
        let preferred = catalog.preferred_method(&EvidenceMethod::ALL).await;
        Json(json!({ "methods": methods, "preferred": preferred }))
    }

    /// # Endpoint
    /// GET /verificar-documento/:code
    async fn verify_code_handler(
        State(state): State<Arc<ApiServer>>,
        Path(code): Path<String>,
    ) -> ApiResult<impl IntoResponse> {
        let certification = state
            .certifications
            .as_ref()
            .and_then(|store| store.find_by_code(&code))
            .ok_or_else(|| ApiError::NotFound(format!("no certification with code {}", code)))?;
        Ok(Json(json!({
            "documentId": certification.document_id,
            "title": certification.title,
            "certificationId": certification.receipt.certification_id,
            "verifiedAt": certification.receipt.verified_at,
            "evidenceMethod": certification.evidence_method,
        })))
    }
}
