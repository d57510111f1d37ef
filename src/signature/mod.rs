// src/signature/mod.rs
//! Handwritten signature capture and rasterization.

pub mod capture;
pub mod raster;
