//! In-memory store used by unit and integration tests. Mirrors the SQLite
//! store's semantics, including cap enforcement and the atomic usage upsert.

use async_trait::async_trait;
use codeflow_core::{
    store::{
        ExecutionStore, SecretStore, SnippetStore, TenantStore, UsageStore,
        ACTIVITY_WRITE_INTERVAL_MS,
    },
    types::{is_valid_secret_name, MAX_SNIPPET_SOURCE_BYTES},
    CoreError, CoreResult, EncryptedBlob, ExecutionRecord, PortalId, SecretRecord, SnippetRecord,
    TenantRecord, UsageDay, UsageDelta,
};
use codeflow_core::types::ActionKind;
use codeflow_core::ExecutionStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    tenants: HashMap<i64, TenantRecord>,
    snippets: HashMap<(i64, i64), SnippetRecord>,
    secrets: HashMap<(i64, i64), SecretRecord>,
    executions: HashMap<String, ExecutionRecord>,
    usage: HashMap<(i64, String), UsageDay>,
    next_id: i64,
}

/// In-memory implementation of all store traits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tenant directly (stands in for the OAuth collaborator).
    pub async fn put_tenant(&self, tenant: TenantRecord) {
        let mut inner = self.inner.write().await;
        inner.tenants.insert(tenant.portal_id.as_i64(), tenant);
    }

    pub async fn execution_count(&self) -> usize {
        self.inner.read().await.executions.len()
    }

    /// Most recently created execution record, for test assertions.
    pub async fn latest_execution(&self) -> Option<ExecutionRecord> {
        let inner = self.inner.read().await;
        inner
            .executions
            .values()
            .max_by_key(|r| r.created_at)
            .cloned()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn find(&self, portal_id: PortalId) -> CoreResult<Option<TenantRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.tenants.get(&portal_id.as_i64()).cloned())
    }

    async fn update_tokens(
        &self,
        portal_id: PortalId,
        access_token: EncryptedBlob,
        refresh_token: EncryptedBlob,
        token_expires_at: i64,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let tenant = inner
            .tenants
            .get_mut(&portal_id.as_i64())
            .ok_or_else(|| CoreError::NotFound(format!("tenant {}", portal_id)))?;
        tenant.access_token = access_token;
        tenant.refresh_token = refresh_token;
        tenant.token_expires_at = token_expires_at;
        tenant.updated_at = token_expires_at;
        Ok(())
    }

    async fn touch_activity(&self, portal_id: PortalId, now_ms: i64) -> CoreResult<bool> {
        let mut inner = self.inner.write().await;
        let tenant = inner
            .tenants
            .get_mut(&portal_id.as_i64())
            .ok_or_else(|| CoreError::NotFound(format!("tenant {}", portal_id)))?;
        let due = match tenant.last_activity_at {
            None => true,
            Some(prev) => now_ms - prev >= ACTIVITY_WRITE_INTERVAL_MS,
        };
        if due {
            tenant.last_activity_at = Some(now_ms);
        }
        Ok(due)
    }
}

#[async_trait]
impl SnippetStore for MemoryStore {
    async fn get(&self, portal_id: PortalId, snippet_id: i64) -> CoreResult<Option<SnippetRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.snippets.get(&(portal_id.as_i64(), snippet_id)).cloned())
    }

    async fn create(
        &self,
        portal_id: PortalId,
        name: &str,
        source: &str,
        now_ms: i64,
    ) -> CoreResult<SnippetRecord> {
        if source.len() > MAX_SNIPPET_SOURCE_BYTES {
            return Err(CoreError::Invalid(format!(
                "snippet source exceeds {} bytes",
                MAX_SNIPPET_SOURCE_BYTES
            )));
        }
        let mut inner = self.inner.write().await;
        let caps = inner
            .tenants
            .get(&portal_id.as_i64())
            .ok_or_else(|| CoreError::NotFound(format!("tenant {}", portal_id)))?
            .caps;
        let count = inner
            .snippets
            .keys()
            .filter(|(p, _)| *p == portal_id.as_i64())
            .count() as i64;
        if count >= caps.max_snippets {
            return Err(CoreError::LimitExceeded(format!(
                "snippet cap of {} reached",
                caps.max_snippets
            )));
        }
        if inner
            .snippets
            .values()
            .any(|s| s.portal_id == portal_id && s.name == name)
        {
            return Err(CoreError::Conflict(format!("snippet name '{}' exists", name)));
        }
        inner.next_id += 1;
        let record = SnippetRecord {
            id: inner.next_id,
            portal_id,
            name: name.to_string(),
            source: source.to_string(),
            execution_count: 0,
            last_executed_at: None,
            created_at: now_ms,
            updated_at: now_ms,
        };
        inner
            .snippets
            .insert((portal_id.as_i64(), record.id), record.clone());
        Ok(record)
    }

    async fn increment_usage(
        &self,
        portal_id: PortalId,
        snippet_id: i64,
        now_ms: i64,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(snippet) = inner.snippets.get_mut(&(portal_id.as_i64(), snippet_id)) {
            snippet.execution_count += 1;
            snippet.last_executed_at = Some(now_ms);
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn list(&self, portal_id: PortalId) -> CoreResult<Vec<SecretRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<SecretRecord> = inner
            .secrets
            .values()
            .filter(|s| s.portal_id == portal_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn create(
        &self,
        portal_id: PortalId,
        name: &str,
        value: EncryptedBlob,
        now_ms: i64,
    ) -> CoreResult<SecretRecord> {
        if !is_valid_secret_name(name) {
            return Err(CoreError::Invalid(format!("invalid secret name '{}'", name)));
        }
        let mut inner = self.inner.write().await;
        let caps = inner
            .tenants
            .get(&portal_id.as_i64())
            .ok_or_else(|| CoreError::NotFound(format!("tenant {}", portal_id)))?
            .caps;
        let count = inner
            .secrets
            .values()
            .filter(|s| s.portal_id == portal_id)
            .count() as i64;
        if count >= caps.max_secrets {
            return Err(CoreError::LimitExceeded(format!(
                "secret cap of {} reached",
                caps.max_secrets
            )));
        }
        if inner
            .secrets
            .values()
            .any(|s| s.portal_id == portal_id && s.name == name)
        {
            return Err(CoreError::Conflict(format!("secret name '{}' exists", name)));
        }
        inner.next_id += 1;
        let record = SecretRecord {
            id: inner.next_id,
            portal_id,
            name: name.to_string(),
            value,
            usage_count: 0,
            last_used_at: None,
            created_at: now_ms,
        };
        inner
            .secrets
            .insert((portal_id.as_i64(), record.id), record.clone());
        Ok(record)
    }

    async fn bulk_increment_usage(
        &self,
        portal_id: PortalId,
        secret_ids: &[i64],
        now_ms: i64,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        for id in secret_ids {
            if let Some(secret) = inner.secrets.get_mut(&(portal_id.as_i64(), *id)) {
                secret.usage_count += 1;
                secret.last_used_at = Some(now_ms);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        // Idempotent per execution id.
        inner
            .executions
            .entry(record.id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> CoreResult<Option<ExecutionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.executions.get(id).cloned())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn upsert_usage(
        &self,
        portal_id: PortalId,
        day: &str,
        delta: &UsageDelta,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .usage
            .entry((portal_id.as_i64(), day.to_string()))
            .or_default();
        apply_delta(entry, delta);
        Ok(())
    }

    async fn get_day(&self, portal_id: PortalId, day: &str) -> CoreResult<Option<UsageDay>> {
        let inner = self.inner.read().await;
        Ok(inner.usage.get(&(portal_id.as_i64(), day.to_string())).cloned())
    }
}

fn apply_delta(entry: &mut UsageDay, delta: &UsageDelta) {
    entry.total_count += 1;
    match delta.action_kind {
        ActionKind::Webhook => entry.webhook_count += 1,
        ActionKind::Code => entry.code_count += 1,
        ActionKind::Format => entry.format_count += 1,
    }
    match delta.status {
        ExecutionStatus::Success => entry.success_count += 1,
        ExecutionStatus::Error => entry.error_count += 1,
        ExecutionStatus::Timeout => entry.timeout_count += 1,
    }
    entry.total_duration_ms += delta.duration_ms;
    entry.avg_duration_ms = entry.total_duration_ms as f64 / entry.total_count as f64;
    entry.max_duration_ms = entry.max_duration_ms.max(delta.duration_ms);
    if let Some(wf) = &delta.workflow_id {
        if !entry.workflow_ids.contains(wf) {
            entry.workflow_ids.push(wf.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeflow_core::types::{TenantCaps, TenantStatus};

    fn tenant(portal: i64) -> TenantRecord {
        let blob = EncryptedBlob {
            ciphertext: "ct".into(),
            iv: "iv".into(),
            tag: "tag".into(),
        };
        TenantRecord {
            portal_id: PortalId(portal),
            status: TenantStatus::Active,
            access_token: blob.clone(),
            refresh_token: blob,
            token_expires_at: 0,
            caps: TenantCaps {
                max_snippets: 2,
                max_secrets: 2,
                ..TenantCaps::default()
            },
            last_activity_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn snippet_cap_enforced_at_creation() {
        let store = MemoryStore::new();
        store.put_tenant(tenant(1)).await;
        SnippetStore::create(&store, PortalId(1), "a", "x", 0).await.unwrap();
        SnippetStore::create(&store, PortalId(1), "b", "x", 0).await.unwrap();
        let err = SnippetStore::create(&store, PortalId(1), "c", "x", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn activity_touch_is_throttled() {
        let store = MemoryStore::new();
        store.put_tenant(tenant(1)).await;
        assert!(store.touch_activity(PortalId(1), 1_000).await.unwrap());
        assert!(!store.touch_activity(PortalId(1), 2_000).await.unwrap());
        assert!(store
            .touch_activity(PortalId(1), 1_000 + ACTIVITY_WRITE_INTERVAL_MS)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn usage_upsert_computes_derived_fields() {
        let store = MemoryStore::new();
        for (duration, wf) in [(100, "wf-1"), (200, "wf-2"), (300, "wf-1")] {
            store
                .upsert_usage(
                    PortalId(1),
                    "2024-01-01",
                    &UsageDelta {
                        action_kind: ActionKind::Webhook,
                        status: ExecutionStatus::Success,
                        duration_ms: duration,
                        workflow_id: Some(wf.to_string()),
                    },
                )
                .await
                .unwrap();
        }
        let day = store.get_day(PortalId(1), "2024-01-01").await.unwrap().unwrap();
        assert_eq!(day.total_count, 3);
        assert_eq!(day.total_duration_ms, 600);
        assert!((day.avg_duration_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(day.max_duration_ms, 300);
        assert_eq!(day.workflow_ids.len(), 2);
    }

    #[tokio::test]
    async fn execution_insert_is_idempotent() {
        let store = MemoryStore::new();
        let rec = ExecutionRecord {
            id: "exec-1".into(),
            portal_id: PortalId(1),
            action_kind: ActionKind::Code,
            workflow_id: None,
            object_ref: None,
            status: ExecutionStatus::Success,
            duration_ms: 5,
            request_snapshot: None,
            response_snapshot: None,
            attempts: vec![],
            error: None,
            created_at: 0,
            expires_at: 0,
        };
        store.insert_execution(&rec).await.unwrap();
        let mut again = rec.clone();
        again.duration_ms = 99;
        store.insert_execution(&again).await.unwrap();
        let stored = store.get_execution("exec-1").await.unwrap().unwrap();
        assert_eq!(stored.duration_ms, 5);
    }
}
