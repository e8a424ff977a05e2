//! OAuth2 access tokens for the Google APIs
//!
//! Two modes:
//! - **Workload Identity**: tokens come from the GCE metadata server
//! - **Service Account JSON**: a signed JWT assertion is exchanged at the
//!   account's token endpoint (local development)
//!
//! One [`GcpAuth`] is shared by every client. The cached token sits behind a
//! single async mutex, so concurrent callers wait for one refresh instead of
//! each fetching their own.

use crate::metrics::TOKEN_ACQUISITION_DURATION;
use crate::{Error, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Scope requested for every API call
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// GCE metadata server URL for Workload Identity
const METADATA_SERVER_URL: &str = "http://metadata.google.internal";

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR_VALUE: &str = "Google";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    #[serde(rename = "type")]
    account_type: String,
    private_key_id: String,
    private_key: String,
    client_email: String,
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    exp: u64,
    iat: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

impl AccessToken {
    fn from_response(response: TokenResponse) -> Self {
        let lifetime = response.expires_in.saturating_sub(EXPIRY_MARGIN_SECS);
        Self {
            token: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Clone)]
enum AuthMode {
    ServiceAccount(ServiceAccountCredentials),
    MetadataServer {
        base_url: String,
        service_account_email: String,
    },
}

/// Shared access token provider
pub struct GcpAuth {
    mode: AuthMode,
    http_client: reqwest::Client,
    cache: Mutex<Option<AccessToken>>,
}

impl GcpAuth {
    /// Authenticate with a service account key file's JSON
    pub fn from_service_account_json(json: &str) -> Result<Self> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)
            .map_err(|e| Error::Auth(format!("Failed to parse service account JSON: {e}")))?;

        if credentials.account_type != "service_account" {
            return Err(Error::Auth(format!(
                "Invalid account type: expected 'service_account', got '{}'",
                credentials.account_type
            )));
        }

        Self::with_mode(
            AuthMode::ServiceAccount(credentials),
            Duration::from_secs(30),
        )
    }

    /// Authenticate through the metadata server, discovering the account email
    pub async fn from_metadata_server() -> Result<Self> {
        let probe = Self::with_mode(
            AuthMode::MetadataServer {
                base_url: METADATA_SERVER_URL.to_string(),
                service_account_email: String::new(),
            },
            Duration::from_secs(5),
        )?;

        let url = format!(
            "{METADATA_SERVER_URL}/computeMetadata/v1/instance/service-accounts/default/email"
        );
        let response = probe
            .http_client
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)
            .send()
            .await
            .map_err(|e| {
                Error::Auth(format!(
                    "Failed to connect to metadata server (not running on GCP?): {e}"
                ))
            })?;
        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "Metadata server returned status {}",
                response.status()
            )));
        }
        let service_account_email = response
            .text()
            .await
            .map_err(|e| Error::Auth(format!("Failed to read service account email: {e}")))?;

        info!(
            service_account = %service_account_email,
            "Initialized GCP auth via metadata server"
        );
        Self::metadata(METADATA_SERVER_URL, &service_account_email)
    }

    /// Metadata-server mode against an explicit base URL
    pub fn metadata(base_url: &str, service_account_email: &str) -> Result<Self> {
        Self::with_mode(
            AuthMode::MetadataServer {
                base_url: base_url.trim_end_matches('/').to_string(),
                service_account_email: service_account_email.to_string(),
            },
            Duration::from_secs(5),
        )
    }

    /// Service account JSON when provided, the metadata server otherwise
    pub async fn auto(service_account_json: Option<&str>) -> Result<Self> {
        match service_account_json {
            Some(json) => {
                info!("Using GCP service account key");
                Self::from_service_account_json(json)
            }
            None => Self::from_metadata_server().await,
        }
    }

    fn with_mode(mode: AuthMode, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            mode,
            http_client,
            cache: Mutex::new(None),
        })
    }

    pub fn service_account_email(&self) -> &str {
        match &self.mode {
            AuthMode::ServiceAccount(creds) => &creds.client_email,
            AuthMode::MetadataServer {
                service_account_email,
                ..
            } => service_account_email,
        }
    }

    /// A bearer token for the cloud-platform scope, refreshed only when stale
    pub async fn access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref().filter(|t| t.is_fresh()) {
            let _timer = TOKEN_ACQUISITION_DURATION
                .with_label_values(&["true"])
                .start_timer();
            return Ok(token.token.clone());
        }

        let _timer = TOKEN_ACQUISITION_DURATION
            .with_label_values(&["false"])
            .start_timer();
        debug!("Fetching new OAuth2 access token");

        let token = match &self.mode {
            AuthMode::ServiceAccount(creds) => self.exchange_assertion(creds).await?,
            AuthMode::MetadataServer { base_url, .. } => self.fetch_from_metadata(base_url).await?,
        };
        let value = token.token.clone();
        *cache = Some(token);
        Ok(value)
    }

    async fn fetch_from_metadata(&self, base_url: &str) -> Result<AccessToken> {
        let url = format!("{base_url}/computeMetadata/v1/instance/service-accounts/default/token");
        let response = self
            .http_client
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Failed to fetch access token from metadata: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "Metadata server returned status {} for access token",
                response.status()
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Failed to parse metadata token response: {e}")))?;
        Ok(AccessToken::from_response(body))
    }

    async fn exchange_assertion(&self, creds: &ServiceAccountCredentials) -> Result<AccessToken> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Internal(format!("System time error: {e}")))?
            .as_secs();
        let claims = AssertionClaims {
            iss: creds.client_email.clone(),
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            aud: creds.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(creds.private_key_id.clone());
        let key = EncodingKey::from_rsa_pem(creds.private_key.as_bytes())
            .map_err(|e| Error::Auth(format!("Failed to parse private key: {e}")))?;
        let assertion = encode(&header, &claims, &key)
            .map_err(|e| Error::Auth(format!("Failed to encode JWT: {e}")))?;

        let response = self
            .http_client
            .post(&creds.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Token exchange failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Failed to parse token response: {e}")))?;
        Ok(AccessToken::from_response(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_service_account_json() {
        let json = r#"{
            "type": "authorized_user",
            "private_key_id": "k",
            "private_key": "pem",
            "client_email": "a@b.c",
            "token_uri": "https://oauth2.googleapis.com/token"
        }"#;
        assert!(matches!(
            GcpAuth::from_service_account_json(json),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn test_short_lived_token_is_never_fresh() {
        let token = AccessToken::from_response(TokenResponse {
            access_token: "t".to_string(),
            expires_in: 60,
        });
        assert!(!token.is_fresh());
    }
}
