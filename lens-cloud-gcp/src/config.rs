//! GCP configuration loading and validation.

use crate::{Error, Result};

/// Settings for the Cloud Tasks dispatcher and the BigQuery client.
#[derive(Debug, Clone)]
pub struct GcpConfig {
    /// Project that owns the queue and bills queries
    pub project_id: String,
    pub location: String,
    pub queue_name: String,
    /// Base URL of the worker service units are delivered to
    pub worker_url: String,
    /// Identity Cloud Tasks uses to call the worker
    pub service_account_email: String,
    /// Local development credentials; metadata server when absent
    pub service_account_key_json: Option<String>,
    pub hmac_secret: String,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::Configuration(format!("{name} not set")))
}

impl GcpConfig {
    /// Environment variables: `GCP_PROJECT_ID`, `GCP_LOCATION`,
    /// `GCP_QUEUE_NAME`, `GCP_WORKER_URL`, `GCP_SERVICE_ACCOUNT_EMAIL`,
    /// `LENS_HMAC_SECRET` and optionally `GCP_SERVICE_ACCOUNT_KEY_JSON`.
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            project_id: required("GCP_PROJECT_ID")?,
            location: required("GCP_LOCATION")?,
            queue_name: required("GCP_QUEUE_NAME")?,
            worker_url: required("GCP_WORKER_URL")?,
            service_account_email: required("GCP_SERVICE_ACCOUNT_EMAIL")?,
            service_account_key_json: std::env::var("GCP_SERVICE_ACCOUNT_KEY_JSON").ok(),
            hmac_secret: required("LENS_HMAC_SECRET")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("project_id", &self.project_id),
            ("location", &self.location),
            ("queue_name", &self.queue_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("{name} cannot be empty")));
            }
        }

        if !self.worker_url.starts_with("https://") && !self.worker_url.starts_with("http://") {
            return Err(Error::Configuration(
                "worker_url must be a valid HTTP(S) URL".into(),
            ));
        }
        if !self.service_account_email.contains('@') {
            return Err(Error::Configuration(
                "service_account_email must be a valid email".into(),
            ));
        }
        if let Some(json) = &self.service_account_key_json {
            serde_json::from_str::<serde_json::Value>(json).map_err(|e| {
                Error::Configuration(format!("service_account_key_json is not valid JSON: {e}"))
            })?;
        }
        if self.hmac_secret.is_empty() {
            return Err(Error::Configuration("hmac_secret cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GcpConfig {
        GcpConfig {
            project_id: "lens-host".to_string(),
            location: "us-central1".to_string(),
            queue_name: "lens-backfill".to_string(),
            worker_url: "https://worker.example.com".to_string(),
            service_account_email: "lens@lens-host.iam.gserviceaccount.com".to_string(),
            service_account_key_json: None,
            hmac_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_accepts_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_invalid_fields() {
        let cases = [
            GcpConfig { project_id: " ".into(), ..valid() },
            GcpConfig { worker_url: "worker.example.com".into(), ..valid() },
            GcpConfig { service_account_email: "lens".into(), ..valid() },
            GcpConfig { service_account_key_json: Some("not json".into()), ..valid() },
            GcpConfig { hmac_secret: String::new(), ..valid() },
        ];
        for cfg in cases {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }
}
