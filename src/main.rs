// src/main.rs

//! # Notary Certification Service - Main Entry Point
//!
//! Drives documents through the certification pipeline
//! (Upload -> Verify identity -> Sign -> Finalize) over an HTTP API.
//!
//! ## Architecture Overview
//! 1. **Models**: `CertificationSession` state machine and its artifacts
//! 2. **Identity**: NFC, facial and video evidence strategies behind one contract
//! 3. **Signature**: freehand signature capture rendered to PNG
//! 4. **Services**: pipeline orchestration, HTTP API and external collaborators
//! 5. **Storage**: in-memory sessions and locally stored certifications
//!
//! ## Configuration
//! Read from the environment (and `.env`) with the `NOTARY_` prefix, see
//! [`config::AppConfig`]. `RUST_LOG` controls log output.

use crate::config::AppConfig;
use crate::identity::submitted::SubmittedCaptureFactory;
use crate::services::api_server::ApiServer;
use crate::services::identity_backend::HttpIdentityBackend;
use crate::services::notifier::LogNotifier;
use crate::services::persistence::HttpDocumentPersistence;
use crate::storage::certification_store::CertificationStore;
use crate::storage::session_store::SessionStore;
use anyhow::Context;
use log::info;
use std::sync::Arc;
use std::time::Duration;

// Module declarations (organized by functional domain)
mod config;        // Layered configuration
mod errors;        // Error taxonomy
mod identity;      // Identity evidence strategies
mod models;        // Session state machine and artifacts
mod services;      // Pipeline, API and collaborators
mod signature;     // Signature capture surface
mod storage;       // In-memory stores
mod utils;         // Helper functions

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load configuration and initialise logging
/// 2. Build the identity backend and persistence collaborators
/// 3. Start API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = AppConfig::load()?;

    let backend = HttpIdentityBackend::new(
        &config.identity.backend_url,
        Duration::from_secs(config.identity.request_timeout_secs),
    )
    .context("failed to build identity backend client")?;
    let captures = SubmittedCaptureFactory::new(
        Arc::new(backend),
        config.enabled_methods()?,
        config.capture_timeouts(),
    );
    let sessions = SessionStore::new(Arc::new(LogNotifier)).with_retention(config.session_retention());

    let api_server = match &config.persistence.base_url {
        Some(base_url) => {
            info!("persisting certifications to {}", base_url);
            let persistence = HttpDocumentPersistence::new(
                base_url,
                Duration::from_secs(config.persistence.request_timeout_secs),
            )
            .context("failed to build persistence client")?;
            ApiServer::new(sessions, captures, Arc::new(persistence), config.signature.clone())
        }
        None => {
            info!("no persistence service configured, storing certifications in memory");
            ApiServer::with_local_store(
                sessions,
                captures,
                Arc::new(CertificationStore::new()),
                config.signature.clone(),
            )
        }
    };

    let addr = config.socket_addr()?;
    info!(
        "identity backend at {}, evidence methods: {}",
        config.identity.backend_url, config.identity.enabled_methods
    );
    api_server.run(addr).await.context("API server failed")?;
    Ok(())
}
