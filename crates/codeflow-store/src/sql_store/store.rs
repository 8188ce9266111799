use crate::error::{StoreError, StoreResult};
use crate::sql_store::migrations::MigrationRunner;
use async_trait::async_trait;
use codeflow_core::{
    store::{
        ExecutionStore, SecretStore, SnippetStore, TenantStore, UsageStore,
        ACTIVITY_WRITE_INTERVAL_MS,
    },
    types::{is_valid_secret_name, TenantCaps, MAX_SNIPPET_SOURCE_BYTES, USAGE_TTL_DAYS},
    CoreError, CoreResult, EncryptedBlob, ExecutionRecord, ExecutionStatus, PortalId,
    SecretRecord, SnippetRecord, TenantRecord, TenantStatus, UsageDay, UsageDelta,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

/// SQLite-based store implementation
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::new_with_config(database_url, None).await
    }

    pub async fn new_with_config(
        database_url: &str,
        max_connections: Option<u32>,
    ) -> StoreResult<Self> {
        let max_conn = max_connections.unwrap_or(10);

        // Robust handling for sqlite file URLs; enable create_if_missing
        let pool = if let Some(path_str) = database_url.strip_prefix("sqlite://") {
            let path = PathBuf::from(path_str);
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(max_conn)
                .connect_with(options)
                .await?
        } else {
            let mut options = SqliteConnectOptions::from_str(database_url)?;
            options = options.create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(max_conn)
                .connect_with(options)
                .await?
        };

        sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;
        sqlx::query("PRAGMA journal_mode = WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL;").execute(&pool).await?;

        let store = Self { pool };

        let migration_runner = MigrationRunner::new(store.pool.clone());
        migration_runner.migrate().await?;

        Ok(store)
    }

    /// Create SqlStore from existing pool (for testing)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Seed a tenant row (stands in for the OAuth collaborator).
    pub async fn put_tenant(&self, tenant: &TenantRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (
                portal_id, status,
                access_token_ct, access_token_iv, access_token_tag,
                refresh_token_ct, refresh_token_iv, refresh_token_tag,
                token_expires_at, webhook_timeout_ms, code_timeout_ms,
                max_snippets, max_secrets, last_activity_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(portal_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant.portal_id.as_i64())
        .bind(status_str(tenant.status))
        .bind(&tenant.access_token.ciphertext)
        .bind(&tenant.access_token.iv)
        .bind(&tenant.access_token.tag)
        .bind(&tenant.refresh_token.ciphertext)
        .bind(&tenant.refresh_token.iv)
        .bind(&tenant.refresh_token.tag)
        .bind(tenant.token_expires_at)
        .bind(tenant.caps.webhook_timeout_ms)
        .bind(tenant.caps.code_timeout_ms)
        .bind(tenant.caps.max_snippets)
        .bind(tenant.caps.max_secrets)
        .bind(tenant.last_activity_at)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn status_str(status: TenantStatus) -> &'static str {
    match status {
        TenantStatus::Active => "active",
        TenantStatus::Suspended => "suspended",
    }
}

fn parse_status(s: &str) -> TenantStatus {
    match s {
        "suspended" => TenantStatus::Suspended,
        _ => TenantStatus::Active,
    }
}

fn exec_status_str(status: ExecutionStatus) -> &'static str {
    status.as_str()
}

fn parse_exec_status(s: &str) -> ExecutionStatus {
    match s {
        "success" => ExecutionStatus::Success,
        "timeout" => ExecutionStatus::Timeout,
        _ => ExecutionStatus::Error,
    }
}

#[async_trait]
impl TenantStore for SqlStore {
    async fn find(&self, portal_id: PortalId) -> CoreResult<Option<TenantRecord>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE portal_id = ?")
            .bind(portal_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(row.map(|row| TenantRecord {
            portal_id: PortalId(row.get("portal_id")),
            status: parse_status(row.get("status")),
            access_token: EncryptedBlob {
                ciphertext: row.get("access_token_ct"),
                iv: row.get("access_token_iv"),
                tag: row.get("access_token_tag"),
            },
            refresh_token: EncryptedBlob {
                ciphertext: row.get("refresh_token_ct"),
                iv: row.get("refresh_token_iv"),
                tag: row.get("refresh_token_tag"),
            },
            token_expires_at: row.get("token_expires_at"),
            caps: TenantCaps {
                webhook_timeout_ms: row.get("webhook_timeout_ms"),
                code_timeout_ms: row.get("code_timeout_ms"),
                max_snippets: row.get("max_snippets"),
                max_secrets: row.get("max_secrets"),
            },
            last_activity_at: row.get("last_activity_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn update_tokens(
        &self,
        portal_id: PortalId,
        access_token: EncryptedBlob,
        refresh_token: EncryptedBlob,
        token_expires_at: i64,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants SET
                access_token_ct = ?, access_token_iv = ?, access_token_tag = ?,
                refresh_token_ct = ?, refresh_token_iv = ?, refresh_token_tag = ?,
                token_expires_at = ?, updated_at = ?
            WHERE portal_id = ?
            "#,
        )
        .bind(&access_token.ciphertext)
        .bind(&access_token.iv)
        .bind(&access_token.tag)
        .bind(&refresh_token.ciphertext)
        .bind(&refresh_token.iv)
        .bind(&refresh_token.tag)
        .bind(token_expires_at)
        .bind(token_expires_at)
        .bind(portal_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("tenant {}", portal_id)));
        }
        Ok(())
    }

    async fn touch_activity(&self, portal_id: PortalId, now_ms: i64) -> CoreResult<bool> {
        // Throttled: a write happens at most once per interval per tenant.
        let result = sqlx::query(
            r#"
            UPDATE tenants SET last_activity_at = ?
            WHERE portal_id = ?
              AND (last_activity_at IS NULL OR ? - last_activity_at >= ?)
            "#,
        )
        .bind(now_ms)
        .bind(portal_id.as_i64())
        .bind(now_ms)
        .bind(ACTIVITY_WRITE_INTERVAL_MS)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SnippetStore for SqlStore {
    async fn get(&self, portal_id: PortalId, snippet_id: i64) -> CoreResult<Option<SnippetRecord>> {
        let row = sqlx::query("SELECT * FROM snippets WHERE portal_id = ? AND id = ?")
            .bind(portal_id.as_i64())
            .bind(snippet_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(row.map(snippet_from_row))
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

        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        let cap: Option<i64> = sqlx::query_scalar("SELECT max_snippets FROM tenants WHERE portal_id = ?")
            .bind(portal_id.as_i64())
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::Database)?;
        let cap = cap.ok_or_else(|| CoreError::NotFound(format!("tenant {}", portal_id)))?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snippets WHERE portal_id = ?")
            .bind(portal_id.as_i64())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::Database)?;
        if count >= cap {
            return Err(CoreError::LimitExceeded(format!("snippet cap of {} reached", cap)));
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO snippets (portal_id, name, source, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(portal_id.as_i64())
        .bind(name)
        .bind(source)
        .bind(now_ms)
        .bind(now_ms)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::Database)?;

        tx.commit().await.map_err(StoreError::Database)?;

        Ok(SnippetRecord {
            id,
            portal_id,
            name: name.to_string(),
            source: source.to_string(),
            execution_count: 0,
            last_executed_at: None,
            created_at: now_ms,
            updated_at: now_ms,
        })
    }

    async fn increment_usage(
        &self,
        portal_id: PortalId,
        snippet_id: i64,
        now_ms: i64,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE snippets
            SET execution_count = execution_count + 1, last_executed_at = ?
            WHERE portal_id = ? AND id = ?
            "#,
        )
        .bind(now_ms)
        .bind(portal_id.as_i64())
        .bind(snippet_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }
}

fn snippet_from_row(row: sqlx::sqlite::SqliteRow) -> SnippetRecord {
    SnippetRecord {
        id: row.get("id"),
        portal_id: PortalId(row.get("portal_id")),
        name: row.get("name"),
        source: row.get("source"),
        execution_count: row.get("execution_count"),
        last_executed_at: row.get("last_executed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl SecretStore for SqlStore {
    async fn list(&self, portal_id: PortalId) -> CoreResult<Vec<SecretRecord>> {
        let rows = sqlx::query("SELECT * FROM secrets WHERE portal_id = ? ORDER BY name")
            .bind(portal_id.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SecretRecord {
                id: row.get("id"),
                portal_id: PortalId(row.get("portal_id")),
                name: row.get("name"),
                value: EncryptedBlob {
                    ciphertext: row.get("ciphertext"),
                    iv: row.get("iv"),
                    tag: row.get("tag"),
                },
                usage_count: row.get("usage_count"),
                last_used_at: row.get("last_used_at"),
                created_at: row.get("created_at"),
            })
            .collect())
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

        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        let cap: Option<i64> = sqlx::query_scalar("SELECT max_secrets FROM tenants WHERE portal_id = ?")
            .bind(portal_id.as_i64())
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::Database)?;
        let cap = cap.ok_or_else(|| CoreError::NotFound(format!("tenant {}", portal_id)))?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM secrets WHERE portal_id = ?")
            .bind(portal_id.as_i64())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::Database)?;
        if count >= cap {
            return Err(CoreError::LimitExceeded(format!("secret cap of {} reached", cap)));
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO secrets (portal_id, name, ciphertext, iv, tag, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(portal_id.as_i64())
        .bind(name)
        .bind(&value.ciphertext)
        .bind(&value.iv)
        .bind(&value.tag)
        .bind(now_ms)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::Database)?;

        tx.commit().await.map_err(StoreError::Database)?;

        Ok(SecretRecord {
            id,
            portal_id,
            name: name.to_string(),
            value,
            usage_count: 0,
            last_used_at: None,
            created_at: now_ms,
        })
    }

    async fn bulk_increment_usage(
        &self,
        portal_id: PortalId,
        secret_ids: &[i64],
        now_ms: i64,
    ) -> CoreResult<()> {
        if secret_ids.is_empty() {
            return Ok(());
        }
        // One statement for the whole batch, not one write per secret.
        let placeholders = vec!["?"; secret_ids.len()].join(", ");
        let sql = format!(
            "UPDATE secrets SET usage_count = usage_count + 1, last_used_at = ?
             WHERE portal_id = ? AND id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(now_ms).bind(portal_id.as_i64());
        for id in secret_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(StoreError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for SqlStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> CoreResult<()> {
        let attempts_json =
            serde_json::to_string(&record.attempts).map_err(StoreError::Serialization)?;

        // Lazy TTL sweep piggybacks on the write path.
        sqlx::query("DELETE FROM executions WHERE expires_at < ?")
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO executions (
                id, portal_id, action_kind, workflow_id, object_ref, status,
                duration_ms, request_snapshot, response_snapshot, attempts_json,
                error, created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.portal_id.as_i64())
        .bind(record.action_kind.as_str())
        .bind(&record.workflow_id)
        .bind(&record.object_ref)
        .bind(exec_status_str(record.status))
        .bind(record.duration_ms)
        .bind(&record.request_snapshot)
        .bind(&record.response_snapshot)
        .bind(attempts_json)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> CoreResult<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        row.map(|row| {
            let attempts_json: String = row.get("attempts_json");
            let attempts =
                serde_json::from_str(&attempts_json).map_err(StoreError::Serialization)?;
            let kind: String = row.get("action_kind");
            Ok(ExecutionRecord {
                id: row.get("id"),
                portal_id: PortalId(row.get("portal_id")),
                action_kind: match kind.as_str() {
                    "webhook" => codeflow_core::ActionKind::Webhook,
                    "code" => codeflow_core::ActionKind::Code,
                    _ => codeflow_core::ActionKind::Format,
                },
                workflow_id: row.get("workflow_id"),
                object_ref: row.get("object_ref"),
                status: parse_exec_status(row.get("status")),
                duration_ms: row.get("duration_ms"),
                request_snapshot: row.get("request_snapshot"),
                response_snapshot: row.get("response_snapshot"),
                attempts,
                error: row.get("error"),
                created_at: row.get("created_at"),
                expires_at: row.get("expires_at"),
            })
        })
        .transpose()
        .map_err(|e: StoreError| e.into())
    }
}

#[async_trait]
impl UsageStore for SqlStore {
    async fn upsert_usage(
        &self,
        portal_id: PortalId,
        day: &str,
        delta: &UsageDelta,
    ) -> CoreResult<()> {
        let workflow_ids = match &delta.workflow_id {
            Some(wf) => serde_json::to_string(&[wf]).map_err(StoreError::Serialization)?,
            None => "[]".to_string(),
        };
        let (webhook, code, format) = match delta.action_kind {
            codeflow_core::ActionKind::Webhook => (1i64, 0i64, 0i64),
            codeflow_core::ActionKind::Code => (0, 1, 0),
            codeflow_core::ActionKind::Format => (0, 0, 1),
        };
        let (success, error, timeout) = match delta.status {
            ExecutionStatus::Success => (1i64, 0i64, 0i64),
            ExecutionStatus::Error => (0, 1, 0),
            ExecutionStatus::Timeout => (0, 0, 1),
        };
        let expires_at = now_plus_days(USAGE_TTL_DAYS);

        // Single-statement read-modify-write: count, duration sum, average,
        // max and the distinct workflow-id set are all recomputed inside the
        // same upsert, so concurrent executions cannot lose updates.
        sqlx::query(
            r#"
            INSERT INTO usage_daily (
                portal_id, day, total_count,
                webhook_count, code_count, format_count,
                success_count, error_count, timeout_count,
                total_duration_ms, avg_duration_ms, max_duration_ms,
                workflow_ids_json, expires_at
            ) VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9, ?10, ?11)
            ON CONFLICT(portal_id, day) DO UPDATE SET
                total_count = usage_daily.total_count + 1,
                webhook_count = usage_daily.webhook_count + excluded.webhook_count,
                code_count = usage_daily.code_count + excluded.code_count,
                format_count = usage_daily.format_count + excluded.format_count,
                success_count = usage_daily.success_count + excluded.success_count,
                error_count = usage_daily.error_count + excluded.error_count,
                timeout_count = usage_daily.timeout_count + excluded.timeout_count,
                total_duration_ms = usage_daily.total_duration_ms + excluded.total_duration_ms,
                avg_duration_ms = CAST(usage_daily.total_duration_ms + excluded.total_duration_ms AS REAL)
                    / (usage_daily.total_count + 1),
                max_duration_ms = MAX(usage_daily.max_duration_ms, excluded.max_duration_ms),
                workflow_ids_json = (
                    SELECT json_group_array(value) FROM (
                        SELECT value FROM json_each(usage_daily.workflow_ids_json)
                        UNION
                        SELECT value FROM json_each(excluded.workflow_ids_json)
                    )
                ),
                expires_at = excluded.expires_at
            "#,
        )
        .bind(portal_id.as_i64())
        .bind(day)
        .bind(webhook)
        .bind(code)
        .bind(format)
        .bind(success)
        .bind(error)
        .bind(timeout)
        .bind(delta.duration_ms)
        .bind(workflow_ids)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn get_day(&self, portal_id: PortalId, day: &str) -> CoreResult<Option<UsageDay>> {
        let row = sqlx::query("SELECT * FROM usage_daily WHERE portal_id = ? AND day = ?")
            .bind(portal_id.as_i64())
            .bind(day)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        row.map(|row| {
            let wf_json: String = row.get("workflow_ids_json");
            let workflow_ids =
                serde_json::from_str(&wf_json).map_err(StoreError::Serialization)?;
            Ok(UsageDay {
                total_count: row.get("total_count"),
                webhook_count: row.get("webhook_count"),
                code_count: row.get("code_count"),
                format_count: row.get("format_count"),
                success_count: row.get("success_count"),
                error_count: row.get("error_count"),
                timeout_count: row.get("timeout_count"),
                total_duration_ms: row.get("total_duration_ms"),
                avg_duration_ms: row.get("avg_duration_ms"),
                max_duration_ms: row.get("max_duration_ms"),
                workflow_ids,
            })
        })
        .transpose()
        .map_err(|e: StoreError| e.into())
    }
}

fn now_plus_days(days: i64) -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    now + days * 24 * 60 * 60 * 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeflow_core::ActionKind;

    async fn test_store() -> SqlStore {
        SqlStore::new("sqlite::memory:").await.unwrap()
    }

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
            caps: TenantCaps::default(),
            last_activity_at: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn tenant_roundtrip() {
        let store = test_store().await;
        store.put_tenant(&tenant(42)).await.unwrap();
        let loaded = store.find(PortalId(42)).await.unwrap().unwrap();
        assert_eq!(loaded.portal_id, PortalId(42));
        assert!(loaded.is_active());
        assert!(store.find(PortalId(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn token_refresh_rewrites_both_blobs() {
        let store = test_store().await;
        store.put_tenant(&tenant(1)).await.unwrap();
        let fresh = EncryptedBlob {
            ciphertext: "new-ct".into(),
            iv: "new-iv".into(),
            tag: "new-tag".into(),
        };
        store
            .update_tokens(PortalId(1), fresh.clone(), fresh.clone(), 99_000)
            .await
            .unwrap();
        let loaded = store.find(PortalId(1)).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, fresh);
        assert_eq!(loaded.refresh_token, fresh);
        assert_eq!(loaded.token_expires_at, 99_000);

        let err = store
            .update_tokens(PortalId(404), fresh.clone(), fresh, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn activity_touch_throttles() {
        let store = test_store().await;
        store.put_tenant(&tenant(1)).await.unwrap();
        assert!(store.touch_activity(PortalId(1), 10_000).await.unwrap());
        assert!(!store.touch_activity(PortalId(1), 20_000).await.unwrap());
        assert!(store
            .touch_activity(PortalId(1), 10_000 + ACTIVITY_WRITE_INTERVAL_MS)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn snippet_create_and_usage() {
        let store = test_store().await;
        store.put_tenant(&tenant(1)).await.unwrap();
        let snip = SnippetStore::create(&store, PortalId(1), "sum", "output.n = 1;", 1_000)
            .await
            .unwrap();
        store.increment_usage(PortalId(1), snip.id, 2_000).await.unwrap();
        store.increment_usage(PortalId(1), snip.id, 3_000).await.unwrap();
        let loaded = SnippetStore::get(&store, PortalId(1), snip.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.execution_count, 2);
        assert_eq!(loaded.last_executed_at, Some(3_000));
    }

    #[tokio::test]
    async fn secret_name_and_bulk_usage() {
        let store = test_store().await;
        store.put_tenant(&tenant(1)).await.unwrap();
        let blob = EncryptedBlob {
            ciphertext: "c".into(),
            iv: "i".into(),
            tag: "t".into(),
        };
        let err = SecretStore::create(&store, PortalId(1), "lower", blob.clone(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Invalid(_)));

        let a = SecretStore::create(&store, PortalId(1), "API_KEY", blob.clone(), 0)
            .await
            .unwrap();
        let b = SecretStore::create(&store, PortalId(1), "TOKEN", blob, 0)
            .await
            .unwrap();
        store
            .bulk_increment_usage(PortalId(1), &[a.id, b.id], 5_000)
            .await
            .unwrap();
        let listed = store.list(PortalId(1)).await.unwrap();
        assert!(listed.iter().all(|s| s.usage_count == 1));
        assert!(listed.iter().all(|s| s.last_used_at == Some(5_000)));
    }

    #[tokio::test]
    async fn execution_insert_idempotent() {
        let store = test_store().await;
        let rec = ExecutionRecord {
            id: "e-1".into(),
            portal_id: PortalId(1),
            action_kind: ActionKind::Webhook,
            workflow_id: Some("wf".into()),
            object_ref: Some("contact:1".into()),
            status: ExecutionStatus::Success,
            duration_ms: 12,
            request_snapshot: Some("{}".into()),
            response_snapshot: None,
            attempts: vec![],
            error: None,
            created_at: 1,
            expires_at: i64::MAX,
        };
        store.insert_execution(&rec).await.unwrap();
        let mut dup = rec.clone();
        dup.duration_ms = 99;
        store.insert_execution(&dup).await.unwrap();
        let loaded = store.get_execution("e-1").await.unwrap().unwrap();
        assert_eq!(loaded.duration_ms, 12);
    }

    #[tokio::test]
    async fn usage_upsert_atomic_derived_fields() {
        let store = test_store().await;
        let deltas = [(100, "wf-a"), (300, "wf-b"), (200, "wf-a")];
        for (duration_ms, wf) in deltas {
            store
                .upsert_usage(
                    PortalId(9),
                    "2024-06-01",
                    &UsageDelta {
                        action_kind: ActionKind::Code,
                        status: ExecutionStatus::Success,
                        duration_ms,
                        workflow_id: Some(wf.to_string()),
                    },
                )
                .await
                .unwrap();
        }
        let day = store.get_day(PortalId(9), "2024-06-01").await.unwrap().unwrap();
        assert_eq!(day.total_count, 3);
        assert_eq!(day.code_count, 3);
        assert_eq!(day.total_duration_ms, 600);
        assert!((day.avg_duration_ms - 200.0).abs() < 1e-9);
        assert_eq!(day.max_duration_ms, 300);
        assert_eq!(day.workflow_ids.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_usage_upserts_do_not_lose_updates() {
        let store = test_store().await;
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_usage(
                        PortalId(3),
                        "2024-06-02",
                        &UsageDelta {
                            action_kind: ActionKind::Webhook,
                            status: ExecutionStatus::Success,
                            duration_ms: 50,
                            workflow_id: Some(format!("wf-{}", i % 4)),
                        },
                    )
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let day = store.get_day(PortalId(3), "2024-06-02").await.unwrap().unwrap();
        assert_eq!(day.total_count, 20);
        assert_eq!(day.total_duration_ms, 1000);
        assert!((day.avg_duration_ms - 50.0).abs() < 1e-9);
        assert_eq!(day.workflow_ids.len(), 4);
    }
}
