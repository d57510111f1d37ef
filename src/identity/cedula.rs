// src/identity/cedula.rs
//! Chilean identity card (cédula) records read over NFC.
//!
//! The chip exposes a text record of pipe-separated fields:
//!
//! ```text
//! RUN:12.345.678-5|JUAN PEDRO|GONZÁLEZ RODRÍGUEZ|1985-06-15|2018-03-22|2028-03-22|M|CHL
//! ```
//!
//! in the order RUT, given names, surnames, birth date, issue date, expiry
//! date, sex and an optional nationality (defaults to `CHL`).

use crate::errors::CertificationError;
use crate::utils::rut;
use serde::{Deserialize, Serialize};

const MIN_FIELDS: usize = 7;
const DEFAULT_NATIONALITY: &str = "CHL";
const MARKERS: [&str; 3] = ["CL", "RUN", "RUT"];

/// Holder data decoded from a cédula.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CedulaRecord {
    /// Canonically formatted RUT (`XX.XXX.XXX-X`).
    pub rut: String,
    pub given_names: String,
    pub surnames: String,
    pub birth_date: String,
    pub issue_date: String,
    pub expiry_date: String,
    pub sex: String,
    pub nationality: String,
}

/// Whether a text record looks like it carries cédula data at all.
pub fn is_candidate(text: &str) -> bool {
    MARKERS.iter().any(|marker| text.contains(marker))
}

/// Parses a cédula text record.
///
/// # Errors
/// [`CertificationError::MalformedEvidence`] if fewer than seven fields are
/// present or the RUT check digit does not match.
pub fn parse(text: &str) -> Result<CedulaRecord, CertificationError> {
    let fields: Vec<&str> = text.trim().split('|').map(str::trim).collect();
    if fields.len() < MIN_FIELDS {
        return Err(CertificationError::MalformedEvidence(format!(
            "identity record has {} fields, expected at least {}",
            fields.len(),
            MIN_FIELDS
        )));
    }

    let raw_rut = fields[0]
        .strip_prefix("RUN:")
        .or_else(|| fields[0].strip_prefix("RUT:"))
        .unwrap_or(fields[0])
        .trim();
    if !rut::is_valid(raw_rut) {
        return Err(CertificationError::MalformedEvidence(format!(
            "identity record carries an invalid RUT '{}'",
            raw_rut
        )));
    }

    let nationality = fields
        .get(7)
        .filter(|value| !value.is_empty())
        .copied()
        .unwrap_or(DEFAULT_NATIONALITY);

    Ok(CedulaRecord {
        rut: rut::format(raw_rut),
        given_names: fields[1].to_string(),
        surnames: fields[2].to_string(),
        birth_date: fields[3].to_string(),
        issue_date: fields[4].to_string(),
        expiry_date: fields[5].to_string(),
        sex: fields[6].to_string(),
        nationality: nationality.to_string(),
    })
}
