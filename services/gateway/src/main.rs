//! Key router gateway
//!
//! Single-binary HTTP service that:
//! 1. Loads a pool of API keys from a file or a provisioning endpoint
//! 2. Routes each generation request to the best available key
//! 3. Fails over across keys on quota and transient errors
//! 4. Exposes redacted pool stats, health and Prometheus metrics

mod api;
mod config;
mod error;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backend::{GeminiBackend, GeminiConfig};
use common::Secret;
use key_pool::{
    CredentialPool, FileKeySource, HttpKeySource, KeySource, RequestRouter, RouterConfig,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::{Config, SourceKind};

/// Time allowed for in-flight requests to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    router: Arc<RequestRouter>,
    pool: Arc<CredentialPool>,
    source: Arc<dyn KeySource>,
    admin_token: Option<Arc<Secret<String>>>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/generate", post(api::generate))
        .route("/stats", get(api::stats))
        .route("/admin/reload", post(api::admin_reload))
        .route("/admin/credentials/active", post(api::admin_set_active))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Record request count and latency per matched route.
/// Installed with `route_layer`, so only matched routes reach it.
async fn track_requests(matched: MatchedPath, request: Request, next: Next) -> Response {
    let route = matched.as_str().to_owned();
    let start = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

fn build_source(config: &Config, client: reqwest::Client) -> Result<Arc<dyn KeySource>> {
    let source: Arc<dyn KeySource> = match config.source.kind {
        SourceKind::File => {
            let path = config
                .source
                .path
                .clone()
                .context("source kind \"file\" requires path")?;
            Arc::new(FileKeySource::new(path))
        }
        SourceKind::Http => {
            let url = config
                .source
                .url
                .clone()
                .context("source kind \"http\" requires url")?;
            Arc::new(HttpKeySource::new(client, url))
        }
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting key-router");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.backend.base_url,
        model = %config.backend.model,
        source = ?config.source.kind,
        admin_enabled = config.admin.token.is_some(),
        "configuration loaded"
    );

    let client = reqwest::Client::new();
    let timeout = Duration::from_secs(config.backend.timeout_secs);
    let backend = Arc::new(GeminiBackend::new(
        client.clone(),
        GeminiConfig {
            base_url: config.backend.base_url.clone(),
            model: config.backend.model.clone(),
            timeout,
        },
    ));

    let source = build_source(&config, client)?;
    let pool = Arc::new(CredentialPool::new());

    // A failing source at startup leaves the pool empty; /health reports it
    // and the next reload can recover.
    match key_pool::reload(&pool, source.as_ref()).await {
        Ok(n) => info!(source = %source.describe(), credentials = n, "initial credential load"),
        Err(e) => warn!(source = %source.describe(), error = %e, "initial credential load failed"),
    }

    let reload_task = config
        .source
        .reload_interval()
        .map(|interval| key_pool::spawn_reload_task(pool.clone(), source.clone(), interval));

    let router = RequestRouter::new(
        pool.clone(),
        backend,
        RouterConfig {
            passes: config.router.passes,
            transient_backoff: Duration::from_millis(config.router.transient_backoff_ms),
            attempt_timeout: timeout,
        },
    );

    let app_state = AppState {
        router: Arc::new(router),
        pool,
        source,
        admin_token: config.admin.token.map(Arc::new),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    if let Some(task) = reload_task {
        task.abort();
    }
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 while at least one credential is eligible, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pool.stats();
    let status_code = if stats.has_eligible() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": stats.status,
        "credentials_total": stats.credentials_total,
        "credentials_active": stats.credentials_active,
        "credentials_cooling": stats.credentials_cooling,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    const ADMIN_TOKEN: &str = "test-admin-token";

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    /// Start a mock generateContent upstream.
    ///
    /// Keys starting with "bad" get a 429, every other key gets a candidate
    /// echoing the key and the prompt.
    async fn start_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|request: Request<Body>| async move {
                let key = request
                    .headers()
                    .get("x-goog-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                    .await
                    .unwrap();
                let sent: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                let prompt = sent["contents"][0]["parts"][0]["text"]
                    .as_str()
                    .unwrap_or("")
                    .to_string();

                if key.starts_with("bad") {
                    return (
                        StatusCode::TOO_MANY_REQUESTS,
                        axum::Json(serde_json::json!({
                            "error": { "code": 429, "status": "RESOURCE_EXHAUSTED" }
                        })),
                    );
                }
                (
                    StatusCode::OK,
                    axum::Json(serde_json::json!({
                        "candidates": [{
                            "content": { "parts": [{ "text": format!("{key}:{prompt}") }] }
                        }]
                    })),
                )
            });
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    struct TestApp {
        state: AppState,
        _dir: tempfile::TempDir,
        keys_path: std::path::PathBuf,
    }

    /// App state over a file source seeded with `keys`, talking to `upstream_url`.
    async fn test_app(upstream_url: &str, keys: &[&str], admin: bool) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let keys_path = dir.path().join("keys.json");
        std::fs::write(&keys_path, serde_json::to_string(keys).unwrap()).unwrap();

        let source: Arc<dyn KeySource> = Arc::new(FileKeySource::new(&keys_path));
        let pool = Arc::new(CredentialPool::new());
        key_pool::reload(&pool, source.as_ref()).await.unwrap();

        let backend = Arc::new(GeminiBackend::new(
            reqwest::Client::new(),
            GeminiConfig {
                base_url: upstream_url.to_string(),
                model: "gemini-pro".into(),
                timeout: Duration::from_secs(5),
            },
        ));
        let router = RequestRouter::new(
            pool.clone(),
            backend,
            RouterConfig {
                transient_backoff: Duration::from_millis(1),
                ..RouterConfig::default()
            },
        );

        TestApp {
            state: AppState {
                router: Arc::new(router),
                pool,
                source,
                admin_token: admin.then(|| Arc::new(Secret::new(ADMIN_TOKEN.to_string()))),
                prometheus: test_prometheus_handle(),
                started_at: Instant::now(),
            },
            _dir: dir,
            keys_path,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn generate_request(body: &str) -> Request<Body> {
        Request::builder()
            .uri("/v1/generate")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn reload_request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/admin/reload").method("POST");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn set_active_request(token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/admin/credentials/active")
            .method("POST")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn generate_returns_text_and_request_id() {
        let upstream = start_upstream().await;
        let app = test_app(&upstream, &["good-key-1"], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(generate_request(r#"{"prompt":"Hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["text"], "good-key-1:Hello");
        assert!(json["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(app.state.pool.record("good-key-1").unwrap().usage_count(), 1);
    }

    #[tokio::test]
    async fn generate_fails_over_from_rate_limited_key() {
        let upstream = start_upstream().await;
        let app = test_app(&upstream, &["bad-key", "good-key"], false).await;

        for _ in 0..2 {
            let response = build_router(app.state.clone(), 1000)
                .oneshot(generate_request(r#"{"prompt":"p"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["text"], "good-key:p");
        }
        assert_eq!(app.state.pool.record("good-key").unwrap().usage_count(), 2);
        assert!(app.state.pool.record("bad-key").unwrap().consecutive_errors() >= 1);
    }

    #[tokio::test]
    async fn generate_all_rate_limited_returns_503() {
        let upstream = start_upstream().await;
        let app = test_app(&upstream, &["bad-1", "bad-2"], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(generate_request(r#"{"prompt":"p"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "pool_exhausted");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
        assert!(!json["error"]["message"].as_str().unwrap().contains("bad-1"));
    }

    #[tokio::test]
    async fn generate_with_empty_pool_returns_503() {
        let app = test_app("http://127.0.0.1:1", &[], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(generate_request(r#"{"prompt":"p"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["type"], "empty_pool");
    }

    #[tokio::test]
    async fn generate_rejects_empty_prompt() {
        let app = test_app("http://127.0.0.1:1", &["k"], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(generate_request(r#"{"prompt":"   "}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["type"], "invalid_request");
        assert!(app.state.pool.record("k").unwrap().last_used().is_none());
    }

    #[tokio::test]
    async fn generate_rejects_malformed_json() {
        let app = test_app("http://127.0.0.1:1", &["k"], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(generate_request("not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn stats_endpoint_redacts_keys() {
        let app = test_app(
            "http://127.0.0.1:1",
            &["AIzaSyA-full-secret-key-0001", "AIzaSyB-full-secret-key-0002"],
            false,
        )
        .await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["credentials_total"], 2);
        let rendered = json.to_string();
        assert!(!rendered.contains("full-secret"), "stats leaked a key: {rendered}");
        let previews: Vec<&str> = json["credentials"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["key_preview"].as_str().unwrap())
            .collect();
        assert!(previews.contains(&"AIzaSyA-fu..."));
    }

    #[tokio::test]
    async fn health_ok_with_eligible_credentials() {
        let app = test_app("http://127.0.0.1:1", &["k1", "k2"], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["credentials_active"], 2);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn health_unavailable_when_pool_empty() {
        let app = test_app("http://127.0.0.1:1", &[], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "unhealthy");
    }

    #[tokio::test]
    async fn health_degraded_when_some_cooling() {
        let app = test_app("http://127.0.0.1:1", &["k1", "k2"], false).await;
        app.state.pool.record_failure("k1");

        let response = build_router(app.state.clone(), 1000)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "degraded");
    }

    #[tokio::test]
    async fn admin_reload_merges_new_keys() {
        let app = test_app("http://127.0.0.1:1", &["k1"], true).await;
        app.state.pool.record_success("k1");
        std::fs::write(&app.keys_path, r#"["k1","k2","k3"]"#).unwrap();

        let response = build_router(app.state.clone(), 1000)
            .oneshot(reload_request(Some(ADMIN_TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["credentials"], 3);
        assert_eq!(app.state.pool.record("k1").unwrap().usage_count(), 1);
    }

    #[tokio::test]
    async fn admin_reload_rejects_bad_token() {
        let app = test_app("http://127.0.0.1:1", &["k1"], true).await;

        for token in [None, Some("wrong-token")] {
            let response = build_router(app.state.clone(), 1000)
                .oneshot(reload_request(token))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn admin_reload_disabled_without_token() {
        let app = test_app("http://127.0.0.1:1", &["k1"], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(reload_request(Some(ADMIN_TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_reload_source_failure_returns_502() {
        let app = test_app("http://127.0.0.1:1", &["k1"], true).await;
        std::fs::write(&app.keys_path, "{ not a list").unwrap();

        let response = build_router(app.state.clone(), 1000)
            .oneshot(reload_request(Some(ADMIN_TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"]["type"], "source_error");
        assert_eq!(app.state.pool.len(), 1, "pool untouched on source failure");
    }

    #[tokio::test]
    async fn deactivated_credential_is_never_routed_to() {
        let upstream = start_upstream().await;
        let app = test_app(&upstream, &["alpha-key-1", "beta-key-22"], true).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(set_active_request(
                Some(ADMIN_TOKEN),
                serde_json::json!({ "key": "alpha-key-1", "active": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["credential"], "alpha-key-...");
        assert_eq!(json["active"], false);
        assert_eq!(json["credentials_active"], 1);

        for _ in 0..4 {
            let response = build_router(app.state.clone(), 1000)
                .oneshot(generate_request(r#"{"prompt":"p"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["text"], "beta-key-22:p");
        }
        let alpha = app.state.pool.record("alpha-key-1").unwrap();
        assert!(!alpha.active());
        assert_eq!(alpha.usage_count(), 0);

        let response = build_router(app.state.clone(), 1000)
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats = body_json(response).await.to_string();
        assert!(stats.contains("alpha-key-..."), "inactive credential still listed");

        let response = build_router(app.state.clone(), 1000)
            .oneshot(set_active_request(
                Some(ADMIN_TOKEN),
                serde_json::json!({ "preview": "alpha-key-...", "active": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.state.pool.active_len(), 2);
    }

    #[tokio::test]
    async fn set_active_with_only_inactive_credentials_empties_selection() {
        let upstream = start_upstream().await;
        let app = test_app(&upstream, &["only-key-1"], true).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(set_active_request(
                Some(ADMIN_TOKEN),
                serde_json::json!({ "key": "only-key-1", "active": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = build_router(app.state.clone(), 1000)
            .oneshot(generate_request(r#"{"prompt":"p"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["type"], "empty_pool");
    }

    #[tokio::test]
    async fn set_active_rejects_bad_requests() {
        let app = test_app(
            "http://127.0.0.1:1",
            &["shared-prefix-1", "shared-prefix-2"],
            true,
        )
        .await;

        let cases = [
            (
                Some("wrong-token"),
                serde_json::json!({ "key": "shared-prefix-1", "active": false }),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Some(ADMIN_TOKEN),
                serde_json::json!({ "key": "missing-key", "active": false }),
                StatusCode::NOT_FOUND,
            ),
            (
                Some(ADMIN_TOKEN),
                serde_json::json!({ "preview": "shared-pre...", "active": false }),
                StatusCode::CONFLICT,
            ),
            (
                Some(ADMIN_TOKEN),
                serde_json::json!({ "active": false }),
                StatusCode::BAD_REQUEST,
            ),
            (
                Some(ADMIN_TOKEN),
                serde_json::json!({ "key": "shared-prefix-1" }),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (token, body, expected) in cases {
            let response = build_router(app.state.clone(), 1000)
                .oneshot(set_active_request(token, body.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "body: {body}");
        }
        assert_eq!(app.state.pool.active_len(), 2);
    }

    #[tokio::test]
    async fn set_active_disabled_without_token() {
        let app = test_app("http://127.0.0.1:1", &["k1"], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(set_active_request(
                Some(ADMIN_TOKEN),
                serde_json::json!({ "key": "k1", "active": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(app.state.pool.active_len(), 1);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let app = test_app("http://127.0.0.1:1", &[], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = test_app("http://127.0.0.1:1", &[], false).await;

        let response = build_router(app.state.clone(), 1000)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn build_source_picks_kind() {
        let config: Config = toml::from_str(
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[source]
kind = "http"
url = "http://provisioner/keys"
"#,
        )
        .unwrap();
        let source = build_source(&config, reqwest::Client::new()).unwrap();
        assert_eq!(source.describe(), "http://provisioner/keys");
    }
}
