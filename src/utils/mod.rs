// src/utils/mod.rs
//! Helper functions shared by the services.

pub mod rut;
pub mod serialization;
pub mod verification_code;
