// src/utils/verification_code.rs
//! Human-readable certification codes.
//!
//! Codes look like `3F-A91C-07` and are printed on certified documents so a
//! third party can look the certification up at `/verificar-documento/{code}`.

use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

/// Generates a verification code for a document.
///
/// # Arguments
/// * `document_id` - Identifier of the certified document
/// * `title` - Document title
/// * `timestamp` - Certification time
///
/// # Returns
/// Uppercase `XX-XXXX-XX` code taken from the first 8 hex characters of
/// `SHA-256(documentId-title-millis-randomHex)`.
///
/// # Errors
/// Returns `Err` if the system RNG fails.
pub fn generate(
    document_id: &str,
    title: &str,
    timestamp: DateTime<Utc>,
) -> Result<String, ring::error::Unspecified> {
    let mut nonce = [0u8; 8];
    SystemRandom::new().fill(&mut nonce)?;
    Ok(from_seed(document_id, title, timestamp, &nonce))
}

/// Deterministic part of [`generate`].
fn from_seed(document_id: &str, title: &str, timestamp: DateTime<Utc>, nonce: &[u8]) -> String {
    let seed = format!(
        "{}-{}-{}-{}",
        document_id,
        title,
        timestamp.timestamp_millis(),
        to_hex(nonce)
    );
    let hash = to_hex(digest(&SHA256, seed.as_bytes()).as_ref());
    format!("{}-{}-{}", &hash[0..2], &hash[2..6], &hash[6..8]).to_uppercase()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Public lookup path for a code.
pub fn verification_url(code: &str) -> String {
    format!("/verificar-documento/{}", code)
}
