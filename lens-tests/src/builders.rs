//! Builders for worker HTTP requests
//!
//! The execute route expects the queue's wire format: a base64 body holding
//! the JSON task unit, signed with HMAC-SHA256 in `X-Lens-Signature`.

use axum::body::Body;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use http::{header, Request};
use lens_core::BackfillTaskUnit;
use serde_json::Value;
use sha2::Sha256;

/// Hex HMAC-SHA256 of `body`, as the dispatcher computes it
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Builder for `POST /tasks/backfill/execute`
pub struct ExecuteRequestBuilder {
    payload: Vec<u8>,
    secret: Option<String>,
    signature: Option<String>,
    tamper: bool,
}

impl ExecuteRequestBuilder {
    pub fn new(unit: &BackfillTaskUnit) -> Self {
        Self {
            payload: serde_json::to_vec(unit).unwrap(),
            secret: None,
            signature: None,
            tamper: false,
        }
    }

    /// Raw JSON payload instead of a task unit
    pub fn raw(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            secret: None,
            signature: None,
            tamper: false,
        }
    }

    /// Sign the wire body with `secret`
    pub fn signed(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    /// Send an explicit signature header
    pub fn signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    /// Alter the body after signing
    pub fn tampered(mut self) -> Self {
        self.tamper = true;
        self
    }

    pub fn build(self) -> Request<Body> {
        let wire = STANDARD.encode(&self.payload);
        let signature = match (&self.signature, &self.secret) {
            (Some(sig), _) => Some(sig.clone()),
            (None, Some(secret)) => Some(sign(wire.as_bytes(), secret)),
            (None, None) => None,
        };
        let body = if self.tamper {
            STANDARD.encode(b"{\"tampered\":true}")
        } else {
            wire
        };

        let mut request = Request::builder()
            .method("POST")
            .uri("/tasks/backfill/execute")
            .header(header::CONTENT_TYPE, "application/octet-stream");
        if let Some(sig) = signature {
            request = request.header("X-Lens-Signature", sig);
        }
        request.body(Body::from(body)).unwrap()
    }
}

/// Plain JSON POST to `uri`
pub fn json_post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// JSON POST to `uri` carrying the body's signature
pub fn signed_json_post(uri: &str, body: &Value, secret: &str) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Lens-Signature", sign(&bytes, secret))
        .body(Body::from(bytes))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
