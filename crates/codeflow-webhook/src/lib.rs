//! Webhook executor: template substitution, SSRF-guarded outbound HTTP with
//! DNS pinning, and bounded retry with jitter.

pub mod error;
pub mod executor;
pub mod guard;
pub mod retry;
pub mod template;

pub use error::{WebhookError, WebhookResult};
pub use executor::{execute, WebhookOutcome, WebhookRequest};
pub use guard::{validate_url, PinnedTarget, SsrfPolicy};
pub use retry::RetryPolicy;

/// Stable User-Agent identifying outbound calls from the service.
pub const USER_AGENT: &str = "codeflow-webhook/0.3";
/// Hard cap on a single outbound attempt.
pub const MAX_ATTEMPT_TIMEOUT_MS: u64 = 30_000;
/// Response body capture cap.
pub const MAX_RESPONSE_CAPTURE_BYTES: usize = 100 * 1024;
/// Audit snapshot truncation.
pub const MAX_SNAPSHOT_BYTES: usize = 10 * 1024;
/// Output-field excerpt truncation.
pub const MAX_EXCERPT_BYTES: usize = 500;
/// Redirect hops re-validated per request.
pub const MAX_REDIRECT_HOPS: usize = 5;
