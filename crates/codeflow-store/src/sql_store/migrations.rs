use crate::error::StoreResult;
use sqlx::SqlitePool;

/// Database migration manager
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied_versions: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await?;

        if !applied_versions.contains(&1) {
            self.run_migration_001().await?;
            sqlx::query("INSERT INTO _migrations (version, name) VALUES (1, '001_initial_schema')")
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn run_migration_001(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                portal_id INTEGER PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                access_token_ct TEXT NOT NULL,
                access_token_iv TEXT NOT NULL,
                access_token_tag TEXT NOT NULL,
                refresh_token_ct TEXT NOT NULL,
                refresh_token_iv TEXT NOT NULL,
                refresh_token_tag TEXT NOT NULL,
                token_expires_at INTEGER NOT NULL DEFAULT 0,
                webhook_timeout_ms INTEGER NOT NULL DEFAULT 30000,
                code_timeout_ms INTEGER NOT NULL DEFAULT 20000,
                max_snippets INTEGER NOT NULL DEFAULT 25,
                max_secrets INTEGER NOT NULL DEFAULT 25,
                last_activity_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snippets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portal_id INTEGER NOT NULL REFERENCES tenants(portal_id),
                name TEXT NOT NULL,
                source TEXT NOT NULL,
                execution_count INTEGER NOT NULL DEFAULT 0,
                last_executed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(portal_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portal_id INTEGER NOT NULL REFERENCES tenants(portal_id),
                name TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                iv TEXT NOT NULL,
                tag TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                last_used_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE(portal_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                portal_id INTEGER NOT NULL,
                action_kind TEXT NOT NULL,
                workflow_id TEXT,
                object_ref TEXT,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                request_snapshot TEXT,
                response_snapshot TEXT,
                attempts_json TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_executions_portal_created
             ON executions(portal_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_daily (
                portal_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                total_count INTEGER NOT NULL DEFAULT 0,
                webhook_count INTEGER NOT NULL DEFAULT 0,
                code_count INTEGER NOT NULL DEFAULT 0,
                format_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                timeout_count INTEGER NOT NULL DEFAULT 0,
                total_duration_ms INTEGER NOT NULL DEFAULT 0,
                avg_duration_ms REAL NOT NULL DEFAULT 0,
                max_duration_ms INTEGER NOT NULL DEFAULT 0,
                workflow_ids_json TEXT NOT NULL DEFAULT '[]',
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (portal_id, day)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
