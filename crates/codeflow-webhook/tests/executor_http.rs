//! Executor tests against a local mock upstream. The guard's loopback
//! allowance is a test-only policy; every other range stays forbidden.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use codeflow_core::ExecutionStatus;
use codeflow_webhook::{execute, RetryPolicy, SsrfPolicy, WebhookRequest};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct Hits(Arc<AtomicU32>);

async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn request(url: String) -> WebhookRequest {
    WebhookRequest {
        url,
        method: "POST".to_string(),
        headers: Vec::new(),
        query: Vec::new(),
        body: None,
        retry_on_failure: false,
        policy: RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            multiplier: 2.0,
        },
        ssrf: SsrfPolicy {
            allow_loopback: true,
        },
        deadline_ms: 10_000,
    }
}

#[tokio::test]
async fn success_on_first_attempt() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            "/hook",
            any(|State(hits): State<Hits>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                axum::Json(serde_json::json!({"ok": true}))
            }),
        )
        .with_state(hits.clone());
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/hook", addr.port()));
    req.body = Some(r#"{"n":"Ada"}"#.to_string());
    let outcome = execute(req).await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.status_code, Some(200));
    assert_eq!(outcome.retries_used, 0);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    assert!(outcome.response_excerpt.unwrap().contains("ok"));
}

#[tokio::test]
async fn retryable_status_exhausts_retries() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            "/flaky",
            any(|State(hits): State<Hits>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                StatusCode::SERVICE_UNAVAILABLE
            }),
        )
        .with_state(hits.clone());
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/flaky", addr.port()));
    req.retry_on_failure = true;
    let outcome = execute(req).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, Some(503));
    // max_retries + 1 total attempts.
    assert_eq!(outcome.attempts.len(), 4);
    assert_eq!(outcome.retries_used, 3);
    assert_eq!(hits.0.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn status_429_retries_then_gives_up() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            "/limited",
            any(|State(hits): State<Hits>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                StatusCode::TOO_MANY_REQUESTS
            }),
        )
        .with_state(hits.clone());
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/limited", addr.port()));
    req.retry_on_failure = true;
    let outcome = execute(req).await;

    assert_eq!(outcome.attempts.len(), 4);
    assert_eq!(hits.0.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn non_retryable_status_is_single_attempt() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            "/bad",
            any(|State(hits): State<Hits>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                StatusCode::BAD_REQUEST
            }),
        )
        .with_state(hits.clone());
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/bad", addr.port()));
    req.retry_on_failure = true;
    let outcome = execute(req).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, Some(400));
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            "/recover",
            any(|State(hits): State<Hits>| async move {
                if hits.0.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                } else {
                    "fine".into_response()
                }
            }),
        )
        .with_state(hits.clone());
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/recover", addr.port()));
    req.retry_on_failure = true;
    let outcome = execute(req).await;

    assert!(outcome.success);
    assert_eq!(outcome.retries_used, 2);
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(outcome.attempts[0].status, ExecutionStatus::Error);
    assert_eq!(outcome.attempts[2].status, ExecutionStatus::Success);
}

#[tokio::test]
async fn deadline_expiry_is_a_timeout() {
    let app = Router::new().route(
        "/slow",
        any(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    );
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/slow", addr.port()));
    req.deadline_ms = 300;
    let started = Instant::now();
    let outcome = execute(req).await;

    assert!(!outcome.success);
    assert!(outcome.timed_out);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.attempts[0].status, ExecutionStatus::Timeout);
}

#[tokio::test]
async fn redirect_to_private_address_is_blocked() {
    let app = Router::new().route(
        "/hop",
        any(|| async {
            (
                StatusCode::FOUND,
                [("location", "http://10.255.0.1/internal")],
            )
        }),
    );
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/hop", addr.port()));
    req.retry_on_failure = true;
    let outcome = execute(req).await;

    assert!(!outcome.success);
    // SSRF rejections are final, never retried.
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.error.unwrap().contains("blocked"));
}

#[tokio::test]
async fn redirect_to_public_host_is_revalidated_and_followed() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            "/start",
            any(|| async { (StatusCode::FOUND, [("location", "/final")]) }),
        )
        .route(
            "/final",
            any(|State(hits): State<Hits>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                "landed"
            }),
        )
        .with_state(hits.clone());
    let addr = spawn_server(app).await;

    let outcome = execute(request(format!("http://127.0.0.1:{}/start", addr.port()))).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_body_promotes_to_query_parameters() {
    let app = Router::new().route(
        "/echo",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            axum::Json(serde_json::json!({ "echo": params }))
        }),
    );
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/echo", addr.port()));
    req.method = "GET".to_string();
    req.body = Some(r#"{"a": "1", "b": 2}"#.to_string());
    let outcome = execute(req).await;

    assert!(outcome.success);
    let excerpt = outcome.response_excerpt.unwrap();
    assert!(excerpt.contains(r#""a":"1""#), "excerpt: {}", excerpt);
    assert!(excerpt.contains(r#""b":"2""#), "excerpt: {}", excerpt);
}

#[tokio::test]
async fn authorization_header_is_redacted_in_snapshot() {
    let app = Router::new().route("/hook", any(|| async { "ok" }));
    let addr = spawn_server(app).await;

    let mut req = request(format!("http://127.0.0.1:{}/hook", addr.port()));
    req.headers = vec![
        ("Authorization".to_string(), "Bearer sekrit-token".to_string()),
        ("X-Custom".to_string(), "visible".to_string()),
    ];
    let outcome = execute(req).await;

    assert!(outcome.success);
    assert!(!outcome.request_snapshot.contains("sekrit-token"));
    assert!(outcome.request_snapshot.contains("***"));
    assert!(outcome.request_snapshot.contains("visible"));
}

#[tokio::test]
async fn oversized_response_is_capped() {
    let app = Router::new().route(
        "/big",
        any(|| async { "x".repeat(1024 * 1024) }),
    );
    let addr = spawn_server(app).await;

    let outcome = execute(request(format!("http://127.0.0.1:{}/big", addr.port()))).await;
    assert!(outcome.success);
    let snapshot = outcome.response_snapshot.unwrap();
    assert!(snapshot.len() <= codeflow_webhook::MAX_SNAPSHOT_BYTES);
    assert!(outcome.response_excerpt.unwrap().len() <= codeflow_webhook::MAX_EXCERPT_BYTES);
}

#[tokio::test]
async fn headers_echo_includes_user_agent() {
    let app = Router::new().route(
        "/ua",
        any(|headers: HeaderMap| async move {
            headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        }),
    );
    let addr = spawn_server(app).await;

    let outcome = execute(request(format!("http://127.0.0.1:{}/ua", addr.port()))).await;
    assert!(outcome
        .response_excerpt
        .unwrap()
        .contains("codeflow-webhook"));
}
