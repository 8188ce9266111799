//! Request correlation.
//!
//! Every inbound request carries a correlation id: the caller's
//! `x-request-id` when it sent one, a fresh uuid otherwise. The id lives in
//! the request extensions for handlers to log and is echoed on the
//! response so platform-side and service-side logs can be joined.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-request-id";

/// Caller-supplied ids longer than this are replaced, not trusted.
const MAX_CALLER_ID_LEN: usize = 128;

/// Correlation id attached to every request.
#[derive(Debug, Clone)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Middleware: adopt or mint the id on the way in, echo it on the way out.
pub async fn correlate_requests(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= MAX_CALLER_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
