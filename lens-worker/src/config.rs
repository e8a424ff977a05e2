//! Worker configuration loaded from the environment

use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub port: u16,
    /// Secret shared with the dispatcher for task signatures
    pub hmac_secret: String,
    /// Progress store; the in-memory store is used when absent
    pub database_url: Option<String>,
    /// Upper bound on one request, unit executions included
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {name} value {raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

impl WorkerConfig {
    /// Environment variables:
    /// - `PORT` (default: 8080)
    /// - `LENS_HMAC_SECRET` (required)
    /// - `DATABASE_URL` (optional)
    /// - `LENS_REQUEST_TIMEOUT_SECS` (default: 1800)
    /// - `LENS_MAX_BODY_BYTES` (default: 1 MiB)
    pub fn from_env() -> Result<Self> {
        let hmac_secret = env::var("LENS_HMAC_SECRET")
            .context("LENS_HMAC_SECRET environment variable not set")?;

        let config = Self {
            port: parse_or("PORT", 8080)?,
            hmac_secret,
            database_url: env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty()),
            request_timeout: Duration::from_secs(parse_or("LENS_REQUEST_TIMEOUT_SECS", 1800)?),
            max_body_bytes: parse_or("LENS_MAX_BODY_BYTES", 1024 * 1024)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hmac_secret.len() < 16 {
            return Err(anyhow!("LENS_HMAC_SECRET must be at least 16 bytes"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("LENS_REQUEST_TIMEOUT_SECS must be positive"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("LENS_MAX_BODY_BYTES must be positive"));
        }
        Ok(())
    }
}

/// Mask the password in a database URL for logging
pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if colon_pos > url.find("://").map(|p| p + 2).unwrap_or(0) {
                let mut masked = url.to_string();
                masked.replace_range(colon_pos + 1..at_pos, "****");
                return masked;
            }
        }
    }
    url.to_string()
}
