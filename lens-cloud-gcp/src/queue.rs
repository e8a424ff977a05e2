//! Cloud Tasks dispatcher for backfill units
//!
//! Each task is an HTTP POST to the worker. The body the worker receives is
//! base64 text of the JSON payload and carries an HMAC signature of that
//! text in [`SIGNATURE_HEADER`]. Cloud Tasks injects an OIDC token for the
//! configured service account.

use crate::auth::GcpAuth;
use crate::config::GcpConfig;
use crate::metrics::{ENQUEUE_DURATION, ENQUEUE_RETRIES, ENQUEUE_TOTAL};
use crate::signing::{SignedBody, SIGNATURE_HEADER};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use lens_core::{ExternalResult, TaskDispatcher, TaskRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const CLOUD_TASKS_BASE_URL: &str = "https://cloudtasks.googleapis.com";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

#[derive(Debug, Deserialize)]
struct CreatedTask {
    name: String,
}

pub struct CloudTasksQueue {
    project_id: String,
    location: String,
    queue_name: String,
    worker_url: String,
    service_account_email: String,
    hmac_secret: String,
    auth: Arc<GcpAuth>,
    http_client: reqwest::Client,
    base_url: String,
}

impl CloudTasksQueue {
    pub fn new(config: &GcpConfig, auth: Arc<GcpAuth>) -> Result<Self> {
        Self::with_base_url(config, auth, CLOUD_TASKS_BASE_URL)
    }

    pub fn with_base_url(config: &GcpConfig, auth: Arc<GcpAuth>, base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            queue_name: config.queue_name.clone(),
            worker_url: config.worker_url.trim_end_matches('/').to_string(),
            service_account_email: config.service_account_email.clone(),
            hmac_secret: config.hmac_secret.clone(),
            auth,
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue_name
        )
    }

    /// Build the Cloud Tasks `task` resource for one request
    fn task_body(&self, task: &TaskRequest) -> Result<serde_json::Value> {
        let engine = base64::engine::general_purpose::STANDARD;
        let sealed = SignedBody::seal(&task.body, &self.hmac_secret)?;

        Ok(serde_json::json!({
            "task": {
                "dispatchDeadline": format!("{}s", task.dispatch_deadline.as_secs()),
                "httpRequest": {
                    "url": format!("{}{}", self.worker_url, task.path),
                    "httpMethod": "POST",
                    "headers": {
                        "Content-Type": "text/plain",
                        SIGNATURE_HEADER: sealed.signature,
                    },
                    "body": engine.encode(sealed.wire.as_bytes()),
                    "oidcToken": {
                        "serviceAccountEmail": self.service_account_email,
                    }
                }
            }
        }))
    }

    /// Create one task, retrying 429 and 5xx with exponential backoff
    async fn create_task(&self, body: &serde_json::Value) -> Result<String> {
        let api_url = format!("{}/v2/{}/tasks", self.base_url, self.queue_path());
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            attempt += 1;
            let access_token = self.auth.access_token().await?;

            let api_timer = ENQUEUE_DURATION.with_label_values(&["api"]).start_timer();
            let response = self
                .http_client
                .post(&api_url)
                .bearer_auth(access_token)
                .json(body)
                .send()
                .await?;
            drop(api_timer);

            let status = response.status();
            if status.is_success() {
                let created: CreatedTask = response.json().await?;
                debug!(task_name = %created.name, attempt, "Cloud Tasks API call succeeded");
                return Ok(created.name);
            }

            if status.as_u16() == 429 {
                ENQUEUE_RETRIES.with_label_values(&["429"]).inc();
                let retry_after_ms = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|secs| secs * 1000);
                let message = response.text().await.unwrap_or_default();

                if attempt >= MAX_RETRIES {
                    return Err(Error::Api {
                        status: 429,
                        message: format!("rate limited after {MAX_RETRIES} attempts: {message}"),
                    });
                }

                let delay_ms = retry_after_ms.unwrap_or(backoff_ms);
                warn!(attempt, delay_ms, "Cloud Tasks API rate limit exceeded, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if retry_after_ms.is_none() {
                    backoff_ms *= 2;
                }
                continue;
            }

            if status.is_server_error() {
                ENQUEUE_RETRIES.with_label_values(&["5xx"]).inc();
                let message = response.text().await.unwrap_or_default();

                if attempt >= MAX_RETRIES {
                    return Err(Error::Api {
                        status: status.as_u16(),
                        message: format!("failed after {MAX_RETRIES} attempts: {message}"),
                    });
                }

                warn!(status = %status, attempt, backoff_ms, "Cloud Tasks API server error, retrying");
                let jitter = rand::random::<u64>() % (backoff_ms / 2).max(1);
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
                backoff_ms *= 2;
                continue;
            }

            // Other client errors are not retried
            return Err(crate::http::api_error(response).await);
        }
    }
}

#[async_trait]
impl TaskDispatcher for CloudTasksQueue {
    async fn enqueue(&self, task: TaskRequest) -> ExternalResult<String> {
        let _total_timer = ENQUEUE_DURATION.with_label_values(&["total"]).start_timer();

        let result = match self.task_body(&task) {
            Ok(body) => self.create_task(&body).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => ENQUEUE_TOTAL.with_label_values(&["success"]).inc(),
            Err(e) => {
                let status = if matches!(e, Error::Api { status: 429, .. }) {
                    "rate_limit"
                } else {
                    "failure"
                };
                ENQUEUE_TOTAL.with_label_values(&[status]).inc();
                error!(path = %task.path, queue = %self.queue_path(), error = %e, "Task enqueue failed");
            }
        }
        Ok(result?)
    }
}
