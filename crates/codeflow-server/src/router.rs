//! Route table and server loop.

use crate::app_state::AppState;
use crate::handlers;
use crate::middleware::{correlate_requests, SignatureLayer, SignatureVerifier};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;

/// Build the service router. The signature layer wraps only the action
/// endpoints; the health probe stays unsigned.
pub fn create_router(state: AppState) -> Router {
    let verifier = SignatureVerifier {
        client_secret: state.config.client_secret.clone(),
        base_url: state.config.base_url.clone(),
        allow_unsigned: state.config.allow_unsigned,
    };

    Router::new()
        .route("/v1/actions/webhook", post(handlers::actions::webhook_action))
        .route("/v1/actions/code", post(handlers::actions::code_action))
        .route("/v1/actions/format", post(handlers::actions::format_action))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(correlate_requests))
                .layer(SignatureLayer::new(verifier)),
        )
        .route("/healthz", get(handlers::health::health_check))
        .with_state(state)
}

/// Serve until SIGTERM / ctrl-c.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "codeflow action service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
