//! Outbound HTTP execution: request assembly, redirect re-validation,
//! capped response capture, retry loop, and snapshot shaping.

use crate::error::{WebhookError, WebhookResult};
use crate::guard::{validate_url, PinnedTarget, SsrfPolicy};
use crate::retry::{backoff_delay, is_retryable_status, RetryPolicy, RetryState};
use crate::{
    MAX_ATTEMPT_TIMEOUT_MS, MAX_EXCERPT_BYTES, MAX_REDIRECT_HOPS, MAX_RESPONSE_CAPTURE_BYTES,
    MAX_SNAPSHOT_BYTES, USER_AGENT,
};
use codeflow_core::{AttemptRecord, ExecutionStatus};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Request headers redacted in audit snapshots.
const REDACTED_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "api-key",
    "x-auth-token",
    "cookie",
];

/// A fully-templated outbound request.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub retry_on_failure: bool,
    pub policy: RetryPolicy,
    pub ssrf: SsrfPolicy,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub retries_used: u32,
    pub timed_out: bool,
    pub error: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub request_snapshot: String,
    pub response_snapshot: Option<String>,
    pub response_excerpt: Option<String>,
}

struct AttemptResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Execute one webhook action to completion.
pub async fn execute(request: WebhookRequest) -> WebhookOutcome {
    let deadline = Instant::now() + Duration::from_millis(request.deadline_ms);
    let request_snapshot = request_snapshot(&request);

    let method = match parse_method(&request.method) {
        Ok(m) => m,
        Err(e) => return config_failure(e, request_snapshot),
    };

    // Validated once per top-level request; retries reuse the pinned set.
    let target = match validate_url(&request.url, request.ssrf, deadline).await {
        Ok(t) => t,
        Err(e) => return config_failure(e, request_snapshot),
    };

    // GET promotes any supplied body to query parameters.
    let mut query = request.query.clone();
    let mut body = request.body.clone();
    if method == Method::GET {
        if let Some(text) = body.take() {
            if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(&text) {
                for (k, v) in map {
                    query.push((k, json_scalar(&v)));
                }
            }
        }
    }

    let mut target = target;
    if !query.is_empty() {
        target.url.query_pairs_mut().extend_pairs(query.iter());
    }

    let mut state = RetryState::new(&request.policy, Duration::from_millis(request.deadline_ms));

    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return deadline_failure(state, request_snapshot);
        };
        let per_attempt = remaining.min(Duration::from_millis(MAX_ATTEMPT_TIMEOUT_MS));

        let started = Instant::now();
        let result = tokio::time::timeout(
            per_attempt,
            perform_attempt(&target, &method, &request.headers, body.as_deref(), request.ssrf, deadline),
        )
        .await
        .unwrap_or(Err(WebhookError::Timeout));
        let attempt_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(response) => {
                let status = response.status.as_u16();
                let attempt_status = if response.status.is_success() {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Error
                };
                state.attempts.push(AttemptRecord {
                    attempt: state.attempt_index + 1,
                    status: attempt_status,
                    status_code: Some(status),
                    duration_ms: attempt_ms,
                    error: (!response.status.is_success())
                        .then(|| format!("upstream returned {}", status)),
                });

                if response.status.is_success() {
                    return success(state, status, &response, request_snapshot);
                }
                if !should_retry_status(status, &request, &state) {
                    return upstream_failure(state, status, &response, request_snapshot);
                }
            }
            Err(e @ WebhookError::Blocked(_)) | Err(e @ WebhookError::Config(_)) => {
                // SSRF rejections (including redirect targets) never retry.
                state.attempts.push(AttemptRecord {
                    attempt: state.attempt_index + 1,
                    status: ExecutionStatus::Error,
                    status_code: None,
                    duration_ms: attempt_ms,
                    error: Some(e.to_string()),
                });
                return hard_failure(state, e, request_snapshot);
            }
            Err(e) => {
                let attempt_status = if matches!(e, WebhookError::Timeout) {
                    ExecutionStatus::Timeout
                } else {
                    ExecutionStatus::Error
                };
                state.attempts.push(AttemptRecord {
                    attempt: state.attempt_index + 1,
                    status: attempt_status,
                    status_code: None,
                    duration_ms: attempt_ms,
                    error: Some(e.to_string()),
                });
                if !request.retry_on_failure
                    || !e.is_retryable()
                    || state.attempt_index >= request.policy.max_retries
                {
                    return transport_failure(state, e, request_snapshot);
                }
            }
        }

        // Backoff, charged against the deadline; stop when the budget cannot
        // cover the next delay.
        let delay = backoff_delay(&request.policy, state.attempt_index);
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return deadline_failure(state, request_snapshot);
        };
        if remaining < delay {
            return deadline_failure(state, request_snapshot);
        }
        tracing::debug!(
            attempt = state.attempt_index + 1,
            delay_ms = delay.as_millis() as u64,
            "retrying webhook request after backoff"
        );
        tokio::time::sleep(delay).await;
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO);
        state.advance(&request.policy, remaining);
    }
}

fn should_retry_status(status: u16, request: &WebhookRequest, state: &RetryState) -> bool {
    request.retry_on_failure
        && is_retryable_status(status)
        && state.attempt_index < request.policy.max_retries
}

/// One network attempt, following redirects manually so every hop passes
/// the full guard with a fresh pin.
async fn perform_attempt(
    target: &PinnedTarget,
    method: &Method,
    headers: &[(String, String)],
    body: Option<&str>,
    ssrf: SsrfPolicy,
    deadline: Instant,
) -> WebhookResult<AttemptResponse> {
    let mut current = target.clone();
    let mut method = method.clone();
    let mut body = body.map(|s| s.to_string());

    for _hop in 0..=MAX_REDIRECT_HOPS {
        let client = build_client(&current)?;
        let mut builder = client.request(method.clone(), current.url.clone());

        let mut has_content_type = false;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            let name = HeaderName::from_str(name)
                .map_err(|e| WebhookError::Config(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| WebhookError::Config(format!("invalid header value: {}", e)))?;
            builder = builder.header(name, value);
        }
        if let Some(text) = &body {
            if !has_content_type {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(text.clone());
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        if response.status().is_redirection() {
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return read_response(response).await;
            };
            let next_url = current
                .url
                .join(location)
                .map_err(|e| WebhookError::Blocked(format!("unparseable redirect target: {}", e)))?;
            // Full re-validation, including DNS pinning, on every hop.
            current = validate_url(next_url.as_str(), ssrf, deadline).await?;
            if matches!(
                response.status(),
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            ) {
                method = Method::GET;
                body = None;
            }
            continue;
        }

        return read_response(response).await;
    }

    Err(WebhookError::Blocked(format!(
        "redirect limit of {} exceeded",
        MAX_REDIRECT_HOPS
    )))
}

fn build_client(target: &PinnedTarget) -> WebhookResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none());
    if !target.host_is_ip {
        // The pinned set is the only thing the client may dial.
        builder = builder.resolve_to_addrs(&target.host, &target.addrs);
    }
    builder
        .build()
        .map_err(|e| WebhookError::Config(format!("client build failed: {}", e)))
}

async fn read_response(response: reqwest::Response) -> WebhookResult<AttemptResponse> {
    let status = response.status();
    let headers = response.headers().clone();
    let mut body = Vec::new();
    let mut response = response;
    while let Some(chunk) = response.chunk().await.map_err(classify_reqwest_error)? {
        let room = MAX_RESPONSE_CAPTURE_BYTES - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(AttemptResponse {
        status,
        headers,
        body,
    })
}

fn classify_reqwest_error(e: reqwest::Error) -> WebhookError {
    if e.is_timeout() {
        WebhookError::Timeout
    } else {
        WebhookError::Transport(e.to_string())
    }
}

fn parse_method(raw: &str) -> WebhookResult<Method> {
    let method = Method::from_str(&raw.trim().to_uppercase())
        .map_err(|_| WebhookError::Config(format!("invalid http method '{}'", raw)))?;
    match method {
        Method::GET | Method::POST | Method::PUT | Method::PATCH | Method::DELETE => Ok(method),
        other => Err(WebhookError::Config(format!(
            "method '{}' is not allowed",
            other
        ))),
    }
}

fn json_scalar(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn request_snapshot(request: &WebhookRequest) -> String {
    let headers: serde_json::Map<String, JsonValue> = request
        .headers
        .iter()
        .map(|(k, v)| {
            let value = if REDACTED_HEADERS.contains(&k.to_ascii_lowercase().as_str()) {
                "***".to_string()
            } else {
                v.clone()
            };
            (k.clone(), JsonValue::String(value))
        })
        .collect();
    let snapshot = json!({
        "url": request.url,
        "method": request.method,
        "headers": headers,
        "body": request.body,
    })
    .to_string();
    truncate_utf8(&snapshot, MAX_SNAPSHOT_BYTES)
}

fn response_snapshot(response: &AttemptResponse) -> String {
    let headers: serde_json::Map<String, JsonValue> = response
        .headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.to_string(), JsonValue::String(v.to_string())))
        })
        .collect();
    let snapshot = json!({
        "status": response.status.as_u16(),
        "headers": headers,
        "body": String::from_utf8_lossy(&response.body),
    })
    .to_string();
    truncate_utf8(&snapshot, MAX_SNAPSHOT_BYTES)
}

fn truncate_utf8(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn success(
    state: RetryState,
    status: u16,
    response: &AttemptResponse,
    request_snapshot: String,
) -> WebhookOutcome {
    WebhookOutcome {
        success: true,
        status_code: Some(status),
        retries_used: state.attempts.len().saturating_sub(1) as u32,
        timed_out: false,
        error: None,
        attempts: state.attempts,
        request_snapshot,
        response_snapshot: Some(response_snapshot(response)),
        response_excerpt: Some(truncate_utf8(
            &String::from_utf8_lossy(&response.body),
            MAX_EXCERPT_BYTES,
        )),
    }
}

fn upstream_failure(
    state: RetryState,
    status: u16,
    response: &AttemptResponse,
    request_snapshot: String,
) -> WebhookOutcome {
    WebhookOutcome {
        success: false,
        status_code: Some(status),
        retries_used: state.attempts.len().saturating_sub(1) as u32,
        timed_out: false,
        error: Some(format!("upstream returned {}", status)),
        attempts: state.attempts,
        request_snapshot,
        response_snapshot: Some(response_snapshot(response)),
        response_excerpt: Some(truncate_utf8(
            &String::from_utf8_lossy(&response.body),
            MAX_EXCERPT_BYTES,
        )),
    }
}

fn config_failure(error: WebhookError, request_snapshot: String) -> WebhookOutcome {
    WebhookOutcome {
        success: false,
        status_code: None,
        retries_used: 0,
        timed_out: false,
        error: Some(error.to_string()),
        attempts: Vec::new(),
        request_snapshot,
        response_snapshot: None,
        response_excerpt: None,
    }
}

fn hard_failure(state: RetryState, error: WebhookError, request_snapshot: String) -> WebhookOutcome {
    WebhookOutcome {
        success: false,
        status_code: None,
        retries_used: state.attempts.len().saturating_sub(1) as u32,
        timed_out: false,
        error: Some(error.to_string()),
        attempts: state.attempts,
        request_snapshot,
        response_snapshot: None,
        response_excerpt: None,
    }
}

fn transport_failure(
    state: RetryState,
    error: WebhookError,
    request_snapshot: String,
) -> WebhookOutcome {
    let timed_out = matches!(error, WebhookError::Timeout);
    WebhookOutcome {
        success: false,
        status_code: None,
        retries_used: state.attempts.len().saturating_sub(1) as u32,
        timed_out,
        error: Some(error.to_string()),
        attempts: state.attempts,
        request_snapshot,
        response_snapshot: None,
        response_excerpt: None,
    }
}

fn deadline_failure(state: RetryState, request_snapshot: String) -> WebhookOutcome {
    WebhookOutcome {
        success: false,
        status_code: None,
        retries_used: state.attempts.len().saturating_sub(1) as u32,
        timed_out: true,
        error: Some("execution deadline exceeded".to_string()),
        attempts: state.attempts,
        request_snapshot,
        response_snapshot: None,
        response_excerpt: None,
    }
}
