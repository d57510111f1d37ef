// src/services/mod.rs
//! Pipeline orchestration, HTTP API and the external collaborators it calls.

pub mod api_server;
pub mod identity_backend;
pub mod notifier;
pub mod persistence;
pub mod pipeline;
