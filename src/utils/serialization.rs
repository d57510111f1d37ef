// src/utils/serialization.rs
//! Serialization utilities for the certification service.
//!
//! Provides serialization and deserialization functions for:
//! - JSON data structures
//! - Base64 payloads submitted by browser clients (plain or `data:` URLs)

use serde::{Deserialize, Serialize};
use serde_json;

/// Serializes a value to a JSON string.
///
/// # Arguments
/// * `data` - The value to serialize (must implement `Serialize`)
///
/// # Returns
/// - `Ok(String)` with JSON representation on success
/// - `Err(serde_json::Error)` if serialization fails
pub fn serialize<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(data)
}

/// Deserializes a value from a JSON string.
///
/// # Arguments
/// * `data` - JSON string to deserialize
///
/// # Returns
/// - `Ok(T)` with deserialized value on success
/// - `Err(serde_json::Error)` if deserialization fails
pub fn deserialize<'a, T: Deserialize<'a>>(data: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}

/// Decodes base64 image data, accepting either raw base64 or a
/// `data:<mime>;base64,<payload>` URL such as the ones produced by
/// `canvas.toDataURL()`.
///
/// # Errors
/// Returns a message describing the decoding failure.
pub fn decode_base64_payload(data: &str) -> Result<Vec<u8>, String> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => data,
    };
    base64::decode(payload.trim()).map_err(|e| format!("Base64 decoding failed: {}", e))
}
