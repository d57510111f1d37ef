// src/config.rs
//! Application configuration.
//!
//! Compiled-in defaults are overridden by `NOTARY_`-prefixed environment
//! variables, with `__` between nested keys:
//!
//! ```text
//! NOTARY_SERVER__PORT=8080
//! NOTARY_PERSISTENCE__BASE_URL=https://docs.example.cl/api
//! NOTARY_IDENTITY__ENABLED_METHODS=nfc,facial
//! NOTARY_CAPTURE__NFC_TIMEOUT_MS=60000
//! NOTARY_SERVER__SESSION_RETENTION_SECS=300
//! ```

use crate::identity::collector::CaptureTimeouts;
use crate::models::evidence::EvidenceMethod;
use crate::signature::capture::SurfaceConfig;
use crate::signature::raster::parse_hex_color;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long a completed session stays readable before it is dropped.
    #[serde(default = "default_session_retention")]
    pub session_retention_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            session_retention_secs: default_session_retention(),
        }
    }
}

fn default_session_retention() -> u64 {
    600
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PersistenceConfig {
    /// Document service root. Unset means in-process storage.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IdentityConfig {
    pub backend_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Comma-separated evidence methods offered to users.
    pub enabled_methods: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".into(),
            request_timeout_secs: default_request_timeout(),
            enabled_methods: "nfc,facial,video".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    #[serde(default)]
    pub facial_timeout_ms: Option<u64>,
    #[serde(default)]
    pub nfc_timeout_ms: Option<u64>,
    #[serde(default)]
    pub video_timeout_ms: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facial_timeout_ms: Some(30_000),
            nfc_timeout_ms: None,
            video_timeout_ms: None,
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub signature: SurfaceConfig,
}

impl AppConfig {
    /// Loads `.env`, then defaults overridden by the process environment.
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_environment(::config::Environment::with_prefix("NOTARY"))
    }

    fn from_environment(environment: ::config::Environment) -> anyhow::Result<Self> {
        let defaults = ::config::Config::try_from(&AppConfig::default())
            .context("failed to build default configuration")?;
        let config: AppConfig = ::config::Config::builder()
            .add_source(defaults)
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.enabled_methods()?;
        parse_hex_color(&self.signature.stroke_color)
            .with_context(|| "signature.stroke_color".to_string())?;
        parse_hex_color(&self.signature.background_color)
            .with_context(|| "signature.background_color".to_string())?;
        if self.signature.width == 0 || self.signature.height == 0 {
            bail!("signature surface must have a non-zero size");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.server.host, self.server.port))
    }

    /// Evidence methods offered to users, in configured order.
    pub fn enabled_methods(&self) -> anyhow::Result<Vec<EvidenceMethod>> {
        let mut methods = Vec::new();
        for name in self.identity.enabled_methods.split(',').map(str::trim) {
            if name.is_empty() {
                continue;
            }
            let method: EvidenceMethod = name.parse().map_err(anyhow::Error::msg)?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        if methods.is_empty() {
            bail!("identity.enabled_methods lists no evidence method");
        }
        Ok(methods)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.server.session_retention_secs)
    }

    pub fn capture_timeouts(&self) -> CaptureTimeouts {
        CaptureTimeouts {
            nfc: self.capture.nfc_timeout_ms.map(Duration::from_millis),
            facial: self.capture.facial_timeout_ms.map(Duration::from_millis),
            video: self.capture.video_timeout_ms.map(Duration::from_millis),
        }
    }
}
