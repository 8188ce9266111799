//! Application state shared by every handler: the frozen configuration,
//! the store handles, the crypto, and the sandbox worker pool.

use crate::config::AppConfig;
use codeflow_core::store::{ExecutionStore, SecretStore, SnippetStore, TenantStore, UsageStore};
use codeflow_sandbox::SandboxHost;
use codeflow_store::{Crypto, SqlStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub crypto: Arc<Crypto>,
    pub tenants: Arc<dyn TenantStore>,
    pub snippets: Arc<dyn SnippetStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub usage: Arc<dyn UsageStore>,
    pub sandbox: SandboxHost,
}

impl AppState {
    /// Production wiring: SQLite store, workers spawned from this binary.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let crypto = Crypto::from_hex_key(&config.encryption_key)
            .map_err(|e| anyhow::anyhow!("encryption key rejected: {}", e))?;
        let store = Arc::new(SqlStore::new(&config.database_url).await?);
        let sandbox = SandboxHost::new(config.sandbox_workers)?;
        Ok(Self::assemble(config, crypto, store, sandbox))
    }

    /// Wire explicit parts; used by tests with the in-memory store.
    pub fn assemble<S>(config: AppConfig, crypto: Crypto, store: Arc<S>, sandbox: SandboxHost) -> Self
    where
        S: TenantStore + SnippetStore + SecretStore + ExecutionStore + UsageStore + 'static,
    {
        Self {
            config: Arc::new(config),
            crypto: Arc::new(crypto),
            tenants: store.clone(),
            snippets: store.clone(),
            secrets: store.clone(),
            executions: store.clone(),
            usage: store,
            sandbox,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.config.output_prefix
    }
}
