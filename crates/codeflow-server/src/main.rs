use codeflow_server::{serve, AppConfig, AppState};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Sandbox workers are this same binary re-invoked with the marker arg;
    // the check runs before any runtime or config setup.
    if std::env::args().nth(1).as_deref() == Some(codeflow_sandbox::WORKER_ARG) {
        std::process::exit(codeflow_sandbox::worker_main());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let addr = config.bind_addr.clone();
        let state = AppState::from_config(config).await?;
        serve(state, &addr).await
    })
}
