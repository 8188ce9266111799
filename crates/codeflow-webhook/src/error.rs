use thiserror::Error;

pub type WebhookResult<T> = Result<T, WebhookError>;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Bad action configuration (missing URL, bad method, oversize body).
    #[error("invalid webhook configuration: {0}")]
    Config(String),

    /// SSRF guard rejection. Never retried.
    #[error("blocked url: {0}")]
    Blocked(String),

    /// Transport-level failure (reset, DNS, TLS). Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Per-attempt or overall deadline expiry. Retryable while budget lasts.
    #[error("request timed out")]
    Timeout,
}

impl WebhookError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Transport(_) | WebhookError::Timeout)
    }
}
