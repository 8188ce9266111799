//! Action dispatch: the single place the always-200 contract is enforced.
//!
//! Handler failures become structured `{<prefix>_success: false, ...}`
//! output fields so the calling workflow can branch on the error instead of
//! retrying on HTTP 5xx. The only HTTP-level rejection in the service is
//! the signature check upstream of these handlers.

use crate::app_state::AppState;
use crate::config::Environment;
use crate::dto::{ActionRequest, ActionResponse};
use crate::middleware::CorrelationId;
use crate::recorder::{expiry_for, record_execution};
use axum::extract::{Extension, State};
use axum::response::Json;
use codeflow_core::sanitization::sanitize_error;
use codeflow_core::types::MAX_SNIPPET_SOURCE_BYTES;
use codeflow_core::{
    ActionKind, ActionResult, AttemptRecord, ExecutionRecord, PortalId, TenantRecord,
};
use codeflow_formula::FormulaOutput;
use codeflow_sandbox::{referenced_secret_names, SandboxJob, SandboxOutcome, SandboxStatus};
use codeflow_webhook::template::substitute;
use codeflow_webhook::{RetryPolicy, SsrfPolicy, WebhookOutcome, WebhookRequest};
use serde_json::{json, Map, Value as JsonValue};
use std::time::Instant;
use uuid::Uuid;

/// Input-field keys that are configuration, not user script inputs.
const CODE_RESERVED_FIELDS: &[&str] = &["code", "snippetId", "timeoutMs"];

const SNAPSHOT_LIMIT: usize = 10 * 1024;

pub async fn webhook_action(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(req): Json<ActionRequest>,
) -> Json<ActionResponse> {
    dispatch(state, ActionKind::Webhook, correlation, req).await
}

pub async fn code_action(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(req): Json<ActionRequest>,
) -> Json<ActionResponse> {
    dispatch(state, ActionKind::Code, correlation, req).await
}

pub async fn format_action(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(req): Json<ActionRequest>,
) -> Json<ActionResponse> {
    dispatch(state, ActionKind::Format, correlation, req).await
}

/// Everything a handler produces besides the caller-visible fields.
struct HandlerOutcome {
    result: ActionResult,
    attempts: Vec<AttemptRecord>,
    request_snapshot: Option<String>,
    response_snapshot: Option<String>,
}

impl HandlerOutcome {
    fn bare(result: ActionResult) -> Self {
        Self {
            result,
            attempts: Vec::new(),
            request_snapshot: None,
            response_snapshot: None,
        }
    }
}

async fn dispatch(
    state: AppState,
    kind: ActionKind,
    correlation: CorrelationId,
    req: ActionRequest,
) -> Json<ActionResponse> {
    let started = Instant::now();
    let now = now_ms();
    let execution_id = Uuid::new_v4().to_string();
    let prefix = state.prefix().to_string();

    tracing::info!(
        request_id = %correlation.as_str(),
        action_kind = %kind,
        callback_id = req.callback_id.as_deref().unwrap_or(""),
        "dispatching action"
    );

    // Tenant resolution failures are caller-visible but still HTTP 200.
    let (tenant, outcome) = match resolve_tenant(&state, &req).await {
        Ok(tenant) => {
            let outcome = match kind {
                ActionKind::Webhook => run_webhook(&state, &tenant, &req).await,
                ActionKind::Code => run_code(&state, &tenant, &req).await,
                ActionKind::Format => run_format(&req),
            };
            (Some(tenant), outcome)
        }
        Err(message) => (
            None,
            HandlerOutcome::bare(ActionResult::UserError {
                message,
                outputs: Vec::new(),
            }),
        ),
    };

    let duration_ms = started.elapsed().as_millis() as i64;
    let status = outcome.result.status();

    // One record per dispatch, for every request that names a portal, even
    // when the tenant is missing or suspended.
    if let Some(portal_id) = req.portal_id() {
        let record = ExecutionRecord {
            id: execution_id.clone(),
            portal_id: PortalId(portal_id),
            action_kind: kind,
            workflow_id: req.workflow_id(),
            object_ref: req.object_ref(),
            status,
            duration_ms,
            request_snapshot: outcome.request_snapshot.clone(),
            response_snapshot: outcome.response_snapshot.clone(),
            attempts: outcome.attempts.clone(),
            error: result_error(&outcome.result),
            created_at: now,
            expires_at: expiry_for(now),
        };
        // Best-effort: a record-write failure never masks the result.
        record_execution(&state, record).await;
    }

    if let Some(tenant) = &tenant {
        if let Err(e) = state.tenants.touch_activity(tenant.portal_id, now).await {
            tracing::debug!(portal_id = %tenant.portal_id, error = %e, "activity touch failed");
        }
    }

    tracing::info!(
        request_id = %correlation.as_str(),
        execution_id = %execution_id,
        action_kind = %kind,
        status = status.as_str(),
        duration_ms,
        "action finished"
    );

    Json(ActionResponse::new(shape_fields(&prefix, kind, outcome.result)))
}

async fn resolve_tenant(state: &AppState, req: &ActionRequest) -> Result<TenantRecord, String> {
    let Some(portal_id) = req.portal_id() else {
        return Err("request origin is missing a portal id".to_string());
    };
    match state.tenants.find(PortalId(portal_id)).await {
        Ok(Some(tenant)) if tenant.is_active() => Ok(tenant),
        Ok(Some(_)) => Err(format!("portal {} is suspended", portal_id)),
        Ok(None) => Err(format!("portal {} is not installed", portal_id)),
        Err(e) => {
            tracing::error!(portal_id, error = %e, "tenant lookup failed");
            Err("temporary storage failure".to_string())
        }
    }
}

/// Map the result variant onto the fixed per-kind output-field names.
fn shape_fields(prefix: &str, kind: ActionKind, result: ActionResult) -> Map<String, JsonValue> {
    let mut fields = Map::new();
    let success = matches!(result, ActionResult::Success { .. });
    fields.insert(format!("{}_success", prefix), JsonValue::Bool(success));

    match result {
        ActionResult::Success { outputs } | ActionResult::Timeout { outputs } => {
            for (name, value) in outputs {
                fields.insert(name, value);
            }
        }
        ActionResult::UserError { message, outputs } => {
            for (name, value) in outputs {
                fields.insert(name, value);
            }
            fields.insert(format!("{}_error", prefix), JsonValue::String(message));
        }
        ActionResult::Internal { message } => {
            tracing::error!(error = %message, action_kind = %kind, "internal failure");
            fields.insert(
                format!("{}_error", prefix),
                JsonValue::String("internal error".to_string()),
            );
        }
    }
    fields
}

fn result_error(result: &ActionResult) -> Option<String> {
    match result {
        ActionResult::Success { .. } => None,
        ActionResult::UserError { message, .. } => Some(message.clone()),
        ActionResult::Timeout { .. } => Some("execution deadline exceeded".to_string()),
        ActionResult::Internal { message } => Some(sanitize_error(message)),
    }
}

// ---------------------------------------------------------------- webhook

async fn run_webhook(
    state: &AppState,
    tenant: &TenantRecord,
    req: &ActionRequest,
) -> HandlerOutcome {
    let properties = req.properties();
    let inputs = &req.input_fields;

    let Some(raw_url) = req.input_str("webhookUrl") else {
        return HandlerOutcome::bare(ActionResult::UserError {
            message: "missing required input: webhookUrl".to_string(),
            outputs: Vec::new(),
        });
    };

    let url = substitute(&raw_url, &properties, inputs);
    let method = req.input_str("method").unwrap_or_else(|| "POST".to_string());
    let body = req
        .input_str("body")
        .map(|b| substitute(&b, &properties, inputs));
    let headers = templated_pairs(req.input_fields.get("headers"), &properties, inputs);
    let query = templated_pairs(req.input_fields.get("queryParams"), &properties, inputs);

    let mut policy = RetryPolicy::default();
    if let Some(max_retries) = req.input_i64("maxRetries") {
        policy.max_retries = max_retries.clamp(0, 10) as u32;
    }

    let deadline_ms = effective_deadline(req.input_i64("timeoutMs"), tenant.caps.webhook_timeout_ms);

    let outcome = codeflow_webhook::execute(WebhookRequest {
        url,
        method,
        headers,
        query,
        body,
        retry_on_failure: req.input_bool("retryOnFailure"),
        policy,
        ssrf: SsrfPolicy {
            allow_loopback: state.config.environment == Environment::Development,
        },
        deadline_ms: deadline_ms as u64,
    })
    .await;

    webhook_outcome_to_result(state.prefix(), outcome)
}

fn webhook_outcome_to_result(prefix: &str, outcome: WebhookOutcome) -> HandlerOutcome {
    let mut outputs: Vec<(String, JsonValue)> = Vec::new();
    if let Some(code) = outcome.status_code {
        outputs.push((format!("{}_status_code", prefix), json!(code)));
    }
    outputs.push((format!("{}_retries_used", prefix), json!(outcome.retries_used)));

    let result = if outcome.success {
        ActionResult::Success { outputs }
    } else if outcome.timed_out {
        outputs.push((
            format!("{}_error", prefix),
            json!("execution deadline exceeded"),
        ));
        ActionResult::Timeout { outputs }
    } else {
        ActionResult::UserError {
            message: sanitize_error(&outcome.error.unwrap_or_else(|| "request failed".to_string())),
            outputs,
        }
    };

    HandlerOutcome {
        result,
        attempts: outcome.attempts,
        request_snapshot: Some(outcome.request_snapshot),
        response_snapshot: outcome.response_snapshot,
    }
}

/// Header / query inputs arrive as a JSON object or a JSON-encoded string;
/// values are templated, names are not.
fn templated_pairs(
    input: Option<&JsonValue>,
    properties: &JsonValue,
    inputs: &Map<String, JsonValue>,
) -> Vec<(String, String)> {
    let map = match input {
        Some(JsonValue::Object(map)) => map.clone(),
        Some(JsonValue::String(raw)) => match serde_json::from_str::<JsonValue>(raw) {
            Ok(JsonValue::Object(map)) => map,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    map.into_iter()
        .map(|(k, v)| {
            let value = match v {
                JsonValue::String(s) => s,
                other => other.to_string(),
            };
            (k, substitute(&value, properties, inputs))
        })
        .collect()
}

// ------------------------------------------------------------------- code

async fn run_code(state: &AppState, tenant: &TenantRecord, req: &ActionRequest) -> HandlerOutcome {
    let portal_id = tenant.portal_id;

    // Inline source or a stored snippet.
    let source = if let Some(code) = req.input_str("code") {
        code
    } else if let Some(snippet_id) = req.input_i64("snippetId") {
        match state.snippets.get(portal_id, snippet_id).await {
            Ok(Some(snippet)) => {
                if let Err(e) = state
                    .snippets
                    .increment_usage(portal_id, snippet_id, now_ms())
                    .await
                {
                    tracing::warn!(portal_id = %portal_id, snippet_id, error = %e, "snippet usage bump failed");
                }
                snippet.source
            }
            Ok(None) => {
                return HandlerOutcome::bare(ActionResult::UserError {
                    message: format!("snippet {} not found", snippet_id),
                    outputs: Vec::new(),
                })
            }
            Err(e) => {
                return HandlerOutcome::bare(ActionResult::Internal {
                    message: format!("snippet lookup failed: {}", e),
                })
            }
        }
    } else {
        return HandlerOutcome::bare(ActionResult::UserError {
            message: "missing required input: code or snippetId".to_string(),
            outputs: Vec::new(),
        });
    };

    if source.len() > MAX_SNIPPET_SOURCE_BYTES {
        return HandlerOutcome::bare(ActionResult::UserError {
            message: format!("source exceeds {} bytes", MAX_SNIPPET_SOURCE_BYTES),
            outputs: Vec::new(),
        });
    }

    // Decrypt only the secrets the source textually references; count their
    // use in one bulk update.
    let referenced = referenced_secret_names(&source);
    let mut secrets = Map::new();
    if !referenced.is_empty() {
        let stored = match state.secrets.list(portal_id).await {
            Ok(stored) => stored,
            Err(e) => {
                return HandlerOutcome::bare(ActionResult::Internal {
                    message: format!("secret listing failed: {}", e),
                })
            }
        };
        let mut used_ids = Vec::new();
        for secret in stored {
            if !referenced.contains(&secret.name) {
                continue;
            }
            match state.crypto.decrypt_string(&secret.value) {
                Ok(plaintext) => {
                    secrets.insert(secret.name.clone(), JsonValue::String(plaintext));
                    used_ids.push(secret.id);
                }
                Err(e) => {
                    return HandlerOutcome::bare(ActionResult::Internal {
                        message: format!("secret decryption failed: {}", e),
                    })
                }
            }
        }
        if !used_ids.is_empty() {
            if let Err(e) = state
                .secrets
                .bulk_increment_usage(portal_id, &used_ids, now_ms())
                .await
            {
                tracing::warn!(portal_id = %portal_id, error = %e, "secret usage bump failed");
            }
        }
    }

    let mut inputs = Map::new();
    for (k, v) in &req.input_fields {
        if !CODE_RESERVED_FIELDS.contains(&k.as_str()) {
            inputs.insert(k.clone(), v.clone());
        }
    }

    let object = req.object.clone().unwrap_or_default();
    let context = json!({
        "workflowId": req.workflow_id(),
        "callbackId": req.callback_id,
        "object": {
            "type": object.object_type,
            "id": object.object_id,
            "properties": object.properties,
        },
    });

    let deadline_ms = effective_deadline(req.input_i64("timeoutMs"), tenant.caps.code_timeout_ms);

    let request_snapshot = json!({
        "source": truncate(&source, SNAPSHOT_LIMIT),
        "inputs": inputs,
    })
    .to_string();

    let job = SandboxJob {
        source,
        inputs: JsonValue::Object(inputs),
        secrets,
        context,
        deadline_ms: deadline_ms as u64,
    };

    match state.sandbox.execute(job).await {
        Ok(outcome) => sandbox_outcome_to_result(state.prefix(), outcome, request_snapshot),
        Err(e) => HandlerOutcome {
            result: ActionResult::Internal {
                message: format!("sandbox worker failed: {}", e),
            },
            attempts: Vec::new(),
            request_snapshot: Some(request_snapshot),
            response_snapshot: None,
        },
    }
}

fn sandbox_outcome_to_result(
    prefix: &str,
    outcome: SandboxOutcome,
    request_snapshot: String,
) -> HandlerOutcome {
    let mut outputs: Vec<(String, JsonValue)> = Vec::new();
    let execution_status = match outcome.status {
        SandboxStatus::Success => "success",
        SandboxStatus::Error => "error",
        SandboxStatus::Timeout => "timeout",
    };
    outputs.push(("execution_status".to_string(), json!(execution_status)));

    let output_names: Vec<&str> = outcome.outputs.iter().map(|(n, _)| n.as_str()).collect();
    // Values stay out of the audit record; only shape metadata is kept.
    let response_snapshot = json!({
        "execution_status": execution_status,
        "output_fields": output_names,
        "console_lines": outcome.console.len(),
    })
    .to_string();

    for (i, (_, value)) in outcome.outputs.iter().enumerate() {
        outputs.push((format!("output_{}", i + 1), json!(value)));
    }

    let result = match outcome.status {
        SandboxStatus::Success => ActionResult::Success { outputs },
        SandboxStatus::Timeout => ActionResult::Timeout { outputs },
        SandboxStatus::Error => ActionResult::UserError {
            message: sanitize_error(&outcome.error.unwrap_or_else(|| "script failed".to_string())),
            outputs,
        },
    };

    HandlerOutcome {
        result,
        attempts: Vec::new(),
        request_snapshot: Some(request_snapshot),
        response_snapshot: Some(response_snapshot),
    }
}

// ----------------------------------------------------------------- format

fn run_format(req: &ActionRequest) -> HandlerOutcome {
    let Some(formula) = req.input_str("formula") else {
        return HandlerOutcome::bare(ActionResult::UserError {
            message: "missing required input: formula".to_string(),
            outputs: Vec::new(),
        });
    };

    let properties = req.properties();
    let request_snapshot = json!({ "formula": truncate(&formula, SNAPSHOT_LIMIT) }).to_string();

    match codeflow_formula::evaluate(&formula, &properties, &req.input_fields) {
        Ok(FormulaOutput {
            result,
            result_number,
        }) => {
            let response_snapshot = json!({ "result": truncate(&result, SNAPSHOT_LIMIT) }).to_string();
            HandlerOutcome {
                result: ActionResult::Success {
                    outputs: vec![
                        ("result".to_string(), json!(result)),
                        ("result_number".to_string(), json!(result_number)),
                    ],
                },
                attempts: Vec::new(),
                request_snapshot: Some(request_snapshot),
                response_snapshot: Some(response_snapshot),
            }
        }
        Err(e) => HandlerOutcome {
            result: ActionResult::UserError {
                message: sanitize_error(&e.to_string()),
                outputs: Vec::new(),
            },
            attempts: Vec::new(),
            request_snapshot: Some(request_snapshot),
            response_snapshot: None,
        },
    }
}

// ---------------------------------------------------------------- helpers

/// Deadline = min(input-requested, tenant cap).
fn effective_deadline(requested_ms: Option<i64>, cap_ms: i64) -> i64 {
    match requested_ms {
        Some(requested) if requested > 0 => requested.min(cap_ms),
        _ => cap_ms,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_min_of_request_and_cap() {
        assert_eq!(effective_deadline(Some(5_000), 30_000), 5_000);
        assert_eq!(effective_deadline(Some(60_000), 30_000), 30_000);
        assert_eq!(effective_deadline(None, 30_000), 30_000);
        assert_eq!(effective_deadline(Some(0), 30_000), 30_000);
        assert_eq!(effective_deadline(Some(-5), 30_000), 30_000);
    }

    #[test]
    fn shape_fields_always_carries_success() {
        let fields = shape_fields(
            "codeflow",
            ActionKind::Format,
            ActionResult::UserError {
                message: "bad formula".to_string(),
                outputs: Vec::new(),
            },
        );
        assert_eq!(fields["codeflow_success"], json!(false));
        assert_eq!(fields["codeflow_error"], json!("bad formula"));

        let fields = shape_fields(
            "codeflow",
            ActionKind::Format,
            ActionResult::Success {
                outputs: vec![("result".to_string(), json!("42"))],
            },
        );
        assert_eq!(fields["codeflow_success"], json!(true));
        assert_eq!(fields["result"], json!("42"));
    }

    #[test]
    fn internal_errors_surface_generically() {
        let fields = shape_fields(
            "codeflow",
            ActionKind::Code,
            ActionResult::Internal {
                message: "sqlite://user:pw@host broke at /srv/db".to_string(),
            },
        );
        assert_eq!(fields["codeflow_error"], json!("internal error"));
    }
}
