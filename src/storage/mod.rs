// src/storage/mod.rs
//! In-process storage for sessions and certified documents.

pub mod certification_store;
pub mod session_store;
