//! Inbound request signature verification.
//!
//! Three schemes, selected by the version header:
//!   v1: hex(SHA-256(secret ∥ body))
//!   v2: hex(SHA-256(secret ∥ method ∥ fullURI ∥ body))
//!   v3: base64(HMAC-SHA-256(secret, method ∥ fullURI ∥ body ∥ timestamp)),
//!       timestamp within ±300 s.
//!
//! The layer buffers the raw body bytes and verifies them before any JSON
//! parsing happens downstream. `fullURI` is built from the configured base
//! URL, never from the attacker-controlled Host header. Comparisons are
//! constant-time. Failure is the only HTTP-level error the service exposes
//! (401, no outputFields).

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hubspot-signature";
pub const SIGNATURE_VERSION_HEADER: &str = "x-hubspot-signature-version";
pub const TIMESTAMP_HEADER: &str = "x-hubspot-request-timestamp";

/// Maximum allowed clock skew for v3 timestamps, in milliseconds.
pub const MAX_TIMESTAMP_SKEW_MS: i64 = 300_000;

/// Inbound bodies larger than this are rejected before verification.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Pure verification state, unit-testable without the tower plumbing.
#[derive(Clone)]
pub struct SignatureVerifier {
    pub client_secret: String,
    pub base_url: String,
    /// Development-only bypass for unsigned requests; never set in
    /// production (config refuses it).
    pub allow_unsigned: bool,
}

impl SignatureVerifier {
    pub fn verify(
        &self,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: &[u8],
        now_ms: i64,
    ) -> Result<(), &'static str> {
        let Some(signature) = header_str(headers, SIGNATURE_HEADER) else {
            if self.allow_unsigned {
                return Ok(());
            }
            return Err("missing signature");
        };

        let version = header_str(headers, SIGNATURE_VERSION_HEADER).unwrap_or("v1");
        let full_uri = format!("{}{}", self.base_url, path_and_query);

        match version {
            "v1" => {
                let mut hasher = Sha256::new();
                hasher.update(self.client_secret.as_bytes());
                hasher.update(body);
                let expected = hex::encode(hasher.finalize());
                if constant_time_eq(&expected, &signature.to_ascii_lowercase()) {
                    Ok(())
                } else {
                    Err("signature mismatch")
                }
            }
            "v2" => {
                let mut hasher = Sha256::new();
                hasher.update(self.client_secret.as_bytes());
                hasher.update(method.as_str().as_bytes());
                hasher.update(full_uri.as_bytes());
                hasher.update(body);
                let expected = hex::encode(hasher.finalize());
                if constant_time_eq(&expected, &signature.to_ascii_lowercase()) {
                    Ok(())
                } else {
                    Err("signature mismatch")
                }
            }
            "v3" => {
                let timestamp = header_str(headers, TIMESTAMP_HEADER)
                    .and_then(|t| t.parse::<i64>().ok())
                    .ok_or("missing or malformed request timestamp")?;
                if (now_ms - timestamp).abs() > MAX_TIMESTAMP_SKEW_MS {
                    return Err("request timestamp outside the allowed window");
                }
                let mut mac = HmacSha256::new_from_slice(self.client_secret.as_bytes())
                    .map_err(|_| "signature mismatch")?;
                mac.update(method.as_str().as_bytes());
                mac.update(full_uri.as_bytes());
                mac.update(body);
                mac.update(timestamp.to_string().as_bytes());
                let decoded = STANDARD.decode(signature).map_err(|_| "signature mismatch")?;
                mac.verify_slice(&decoded).map_err(|_| "signature mismatch")
            }
            _ => Err("unsupported signature version"),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.len() != right_bytes.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (a, b) in left_bytes.iter().zip(right_bytes.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Layer that verifies signatures over the raw body bytes
#[derive(Clone)]
pub struct SignatureLayer {
    verifier: Arc<SignatureVerifier>,
}

impl SignatureLayer {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

impl<S> Layer<S> for SignatureLayer {
    type Service = SignatureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SignatureService {
            inner,
            verifier: self.verifier.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SignatureService<S> {
    inner: S,
    verifier: Arc<SignatureVerifier>,
}

impl<S> Service<Request<Body>> for SignatureService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let verifier = self.verifier.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();

            let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Ok(reject(StatusCode::PAYLOAD_TOO_LARGE, "body too large"));
                }
            };

            let path_and_query = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");

            if let Err(reason) =
                verifier.verify(&parts.method, path_and_query, &parts.headers, &bytes, now_ms())
            {
                tracing::warn!(reason = reason, path = path_and_query, "rejected unsigned or badly signed request");
                return Ok(reject(StatusCode::UNAUTHORIZED, reason));
            }

            // Parsing happens strictly after verification, on the same bytes.
            let req = Request::from_parts(parts, Body::from(bytes));
            inner.call(req).await
        })
    }
}

fn reject(status: StatusCode, reason: &str) -> Response {
    (status, Json(json!({ "error": reason }))).into_response()
}
