// src/models/mod.rs
//! Data structures shared across the certification pipeline.

pub mod document;
pub mod evidence;
pub mod session;
pub mod signature;
