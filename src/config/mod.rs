//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The shared secret is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::time::Duration;

use crate::crypto;
use crate::error::{Error, Result};
use secrets::{ExposeSecret, SecretString};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug)]
pub struct Config {
    /// Shared secret: 32 raw bytes, or base64 of 32 bytes.
    pub secret: SecretString,
    /// Timeout applied to work when the caller does not choose one.
    pub default_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let default_timeout = match std::env::var("JOBGATE_DEFAULT_TIMEOUT_SECS") {
            Ok(raw) => parse_secs("JOBGATE_DEFAULT_TIMEOUT_SECS", &raw)?,
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            secret: SecretString::from(required_var("JOBGATE_SECRET")?),
            default_timeout,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Like [`Config::from_env`], but `Ok(None)` when `JOBGATE_SECRET` is not
    /// set at all. Any other problem is still an error.
    pub fn from_env_if_present() -> Result<Option<Self>> {
        if std::env::var_os("JOBGATE_SECRET").is_none() {
            return Ok(None);
        }
        Self::from_env().map(Some)
    }

    /// Key material decoded from `secret`.
    pub fn secret_bytes(&self) -> Vec<u8> {
        crypto::decode_secret(self.secret.expose_secret())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::Config(format!("{name}={raw:?} is not a number of seconds: {e}")))
}
