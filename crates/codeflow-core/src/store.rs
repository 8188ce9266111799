//! Store traits the execution core consumes.
//!
//! The core never talks to storage directly; it goes through these traits.
//! `codeflow-store` provides the SQLite and in-memory implementations.

use crate::error::CoreResult;
use crate::types::{
    EncryptedBlob, ExecutionRecord, PortalId, SecretRecord, SnippetRecord, TenantRecord, UsageDay,
    UsageDelta,
};
use async_trait::async_trait;

/// Minimum interval between `last_activity_at` writes for one tenant.
pub const ACTIVITY_WRITE_INTERVAL_MS: i64 = 5 * 60 * 1000;

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find(&self, portal_id: PortalId) -> CoreResult<Option<TenantRecord>>;

    async fn update_tokens(
        &self,
        portal_id: PortalId,
        access_token: EncryptedBlob,
        refresh_token: EncryptedBlob,
        token_expires_at: i64,
    ) -> CoreResult<()>;

    /// Throttled activity touch: writes only if the previous write is at
    /// least [`ACTIVITY_WRITE_INTERVAL_MS`] old. Returns whether a write
    /// happened.
    async fn touch_activity(&self, portal_id: PortalId, now_ms: i64) -> CoreResult<bool>;
}

#[async_trait]
pub trait SnippetStore: Send + Sync {
    async fn get(&self, portal_id: PortalId, snippet_id: i64) -> CoreResult<Option<SnippetRecord>>;

    /// Creation enforces the tenant's `max_snippets` cap and the source size
    /// limit (caps apply at creation time, not at execution time).
    async fn create(
        &self,
        portal_id: PortalId,
        name: &str,
        source: &str,
        now_ms: i64,
    ) -> CoreResult<SnippetRecord>;

    /// Atomic `execution_count` increment.
    async fn increment_usage(&self, portal_id: PortalId, snippet_id: i64, now_ms: i64)
        -> CoreResult<()>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn list(&self, portal_id: PortalId) -> CoreResult<Vec<SecretRecord>>;

    /// Creation validates the name shape and enforces `max_secrets`.
    async fn create(
        &self,
        portal_id: PortalId,
        name: &str,
        value: EncryptedBlob,
        now_ms: i64,
    ) -> CoreResult<SecretRecord>;

    /// One bulk update for all secrets an execution touched, not one write
    /// per secret.
    async fn bulk_increment_usage(
        &self,
        portal_id: PortalId,
        secret_ids: &[i64],
        now_ms: i64,
    ) -> CoreResult<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Idempotent per execution id.
    async fn insert_execution(&self, record: &ExecutionRecord) -> CoreResult<()>;

    async fn get_execution(&self, id: &str) -> CoreResult<Option<ExecutionRecord>>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomic read-modify-write upsert for the `(portal, day)` bucket.
    /// Derived fields (average, distinct workflow set, max) are recomputed
    /// inside the same update.
    async fn upsert_usage(&self, portal_id: PortalId, day: &str, delta: &UsageDelta)
        -> CoreResult<()>;

    async fn get_day(&self, portal_id: PortalId, day: &str) -> CoreResult<Option<UsageDay>>;
}
