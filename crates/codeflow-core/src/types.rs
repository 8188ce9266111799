use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Identifier of one installation of the integration ("portal" upstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalId(pub i64);

impl PortalId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PortalId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// The three extension action kinds the service executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Webhook,
    Code,
    Format,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Webhook => "webhook",
            ActionKind::Code => "code",
            ActionKind::Format => "format",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AES-256-GCM ciphertext with its nonce and authentication tag, all base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// Per-tenant execution caps. Values are milliseconds / counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCaps {
    pub webhook_timeout_ms: i64,
    pub code_timeout_ms: i64,
    pub max_snippets: i64,
    pub max_secrets: i64,
}

impl Default for TenantCaps {
    fn default() -> Self {
        Self {
            webhook_timeout_ms: 30_000,
            code_timeout_ms: 20_000,
            max_snippets: 25,
            max_secrets: 25,
        }
    }
}

/// One installation of the integration. Created by the OAuth collaborator;
/// the execution core only reads it, refreshes tokens and touches activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub portal_id: PortalId,
    pub status: TenantStatus,
    pub access_token: EncryptedBlob,
    pub refresh_token: EncryptedBlob,
    pub token_expires_at: i64,
    pub caps: TenantCaps,
    pub last_activity_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TenantRecord {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Stored user source code, scoped to a tenant. Source is capped at 50 KiB
/// at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetRecord {
    pub id: i64,
    pub portal_id: PortalId,
    pub name: String,
    pub source: String,
    pub execution_count: i64,
    pub last_executed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub const MAX_SNIPPET_SOURCE_BYTES: usize = 50 * 1024;

/// Name-addressable encrypted string. Plaintext exists only transiently in
/// the sandbox job for secrets the source actually references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: i64,
    pub portal_id: PortalId,
    pub name: String,
    pub value: EncryptedBlob,
    pub usage_count: i64,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

pub const MAX_SECRET_NAME_LEN: usize = 128;

/// Secret names are SCREAMING_SNAKE identifiers: `^[A-Z][A-Z0-9_]*$`.
pub fn is_valid_secret_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_SECRET_NAME_LEN {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
        }
    }
}

/// One outbound HTTP attempt inside a webhook execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const EXECUTION_TTL_DAYS: i64 = 30;
pub const USAGE_TTL_DAYS: i64 = 90;

/// Audit record written after every dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub portal_id: PortalId,
    pub action_kind: ActionKind,
    pub workflow_id: Option<String>,
    pub object_ref: Option<String>,
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    pub request_snapshot: Option<String>,
    pub response_snapshot: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub error: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Increment applied to a tenant's daily usage counter for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageDelta {
    pub action_kind: ActionKind,
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    pub workflow_id: Option<String>,
}

/// Aggregated daily usage for one tenant; derived fields are recomputed
/// inside the same atomic upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageDay {
    pub total_count: i64,
    pub webhook_count: i64,
    pub code_count: i64,
    pub format_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub timeout_count: i64,
    pub total_duration_ms: i64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
    pub workflow_ids: Vec<String>,
}

/// Day bucket key for usage counters: `yyyy-mm-dd` in UTC.
pub fn day_bucket(now_ms: i64) -> String {
    let dt = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap());
    dt.format("%Y-%m-%d").to_string()
}

/// Outcome of one action dispatch. The dispatcher maps the variant onto
/// output fields; there is no polymorphic action hierarchy.
#[derive(Debug, Clone)]
pub enum ActionResult {
    /// Fully-shaped output fields, ready to serialize.
    Success { outputs: Vec<(String, JsonValue)> },
    /// The user's configuration or code failed; message is already sanitized.
    UserError {
        message: String,
        outputs: Vec<(String, JsonValue)>,
    },
    /// Deadline exceeded at some layer.
    Timeout { outputs: Vec<(String, JsonValue)> },
    /// Failure on our side; message is logged, a generic string is surfaced.
    Internal { message: String },
}

impl ActionResult {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ActionResult::Success { .. } => ExecutionStatus::Success,
            ActionResult::UserError { .. } | ActionResult::Internal { .. } => {
                ExecutionStatus::Error
            }
            ActionResult::Timeout { .. } => ExecutionStatus::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_name_validation() {
        assert!(is_valid_secret_name("API_KEY"));
        assert!(is_valid_secret_name("A"));
        assert!(is_valid_secret_name("TOKEN_2"));
        assert!(!is_valid_secret_name(""));
        assert!(!is_valid_secret_name("api_key"));
        assert!(!is_valid_secret_name("2FA_KEY"));
        assert!(!is_valid_secret_name("BAD-NAME"));
        assert!(!is_valid_secret_name(&"A".repeat(129)));
    }

    #[test]
    fn day_bucket_is_utc_date() {
        // 2024-03-10T12:30:00Z
        assert_eq!(day_bucket(1_710_073_800_000), "2024-03-10");
        // Epoch boundary
        assert_eq!(day_bucket(0), "1970-01-01");
    }

    #[test]
    fn action_result_status_mapping() {
        let ok = ActionResult::Success { outputs: vec![] };
        assert_eq!(ok.status(), ExecutionStatus::Success);
        let user = ActionResult::UserError {
            message: "bad".into(),
            outputs: vec![],
        };
        assert_eq!(user.status(), ExecutionStatus::Error);
        let to = ActionResult::Timeout { outputs: vec![] };
        assert_eq!(to.status(), ExecutionStatus::Timeout);
    }
}
