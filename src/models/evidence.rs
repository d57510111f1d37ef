// src/models/evidence.rs
//! Identity evidence produced by a capture strategy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The strategy that produced a piece of evidence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceMethod {
    /// Chip read of the national identity card.
    Nfc,
    /// Camera selfie checked by the verification backend.
    Facial,
    /// Snapshot taken during a video session with a certifier.
    Video,
}

impl EvidenceMethod {
    pub const ALL: [EvidenceMethod; 3] = [
        EvidenceMethod::Nfc,
        EvidenceMethod::Facial,
        EvidenceMethod::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceMethod::Nfc => "nfc",
            EvidenceMethod::Facial => "facial",
            EvidenceMethod::Video => "video",
        }
    }
}

impl fmt::Display for EvidenceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nfc" => Ok(EvidenceMethod::Nfc),
            "facial" => Ok(EvidenceMethod::Facial),
            "video" => Ok(EvidenceMethod::Video),
            other => Err(format!("unknown evidence method '{}'", other)),
        }
    }
}

/// Opaque proof that a person's identity was checked.
///
/// The payload is method-specific and never interpreted by the pipeline; it is
/// forwarded verbatim to the persistence collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityEvidence {
    method: EvidenceMethod,
    captured_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl IdentityEvidence {
    /// Wraps a strategy payload, stamping the capture time.
    pub fn new(method: EvidenceMethod, payload: serde_json::Value) -> Self {
        Self {
            method,
            captured_at: Utc::now(),
            payload,
        }
    }

    /// Strategy that produced the evidence.
    pub fn method(&self) -> EvidenceMethod {
        self.method
    }

    /// When the strategy returned, not when the user started it.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Method-specific data forwarded verbatim to the document service.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
