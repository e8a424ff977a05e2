//! Authorized JSON calls shared by the REST clients

use crate::auth::GcpAuth;
use crate::{Error, Result};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Turn a non-success response into [`Error::Api`], keeping Google's message
pub(crate) async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(api_error(response).await)
}

pub(crate) async fn api_error(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

#[derive(Clone)]
pub(crate) struct ApiClient {
    http: reqwest::Client,
    auth: Arc<GcpAuth>,
    base_url: String,
}

impl ApiClient {
    pub(crate) fn new(auth: Arc<GcpAuth>, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            auth,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.auth.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        check(response).await
    }

    pub(crate) async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<R> {
        let request = self.http.get(format!("{}{}", self.base_url, path)).query(query);
        Ok(self.authorized(request).await?.json().await?)
    }

    pub(crate) async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        Ok(self.authorized(request).await?.json().await?)
    }
}
