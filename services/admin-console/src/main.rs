//! Member console
//!
//! Single-binary service that fronts the member API for browser operators:
//! 1. Holds the upstream token pair in HttpOnly cookies (`/api/auth/*`)
//! 2. Gates the console pages on a verified access-token cookie
//! 3. Relays member API calls with the cookie turned into a bearer header
//! 4. Renders the spreadsheet export and per-member QR downloads

mod config;
mod cookies;
mod error;
mod export;
mod gate;
mod gateway;
mod metrics;
mod pages;
mod proxy;
mod qr;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use member_api::UpstreamClient;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::cookies::CookiePolicy;
use crate::gate::GateConfig;
use crate::metrics::ServiceMetrics;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) upstream: UpstreamClient,
    pub(crate) cookies: CookiePolicy,
    pub(crate) gate: Arc<GateConfig>,
    /// Public site encoded into member QR codes.
    pub(crate) front_url: String,
    pub(crate) timeout: Duration,
    pub(crate) metrics: ServiceMetrics,
    pub(crate) prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The gate runs inside request tracking so redirects are counted, and the
/// concurrency limit wraps everything.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(pages::root))
        .route("/login", get(pages::login_page))
        .route("/members", get(pages::member_list_page))
        .route("/members/new", get(pages::new_member_page))
        .route("/members/{id}", get(pages::member_detail_page))
        .route("/members/{id}/edit", get(pages::edit_member_page))
        .route("/api/auth/login", post(gateway::login))
        .route("/api/auth/logout", post(gateway::logout))
        .route("/api/auth/refresh", post(gateway::refresh))
        .route("/api/proxy", any(proxy::proxy_handler))
        .route("/api/members/export", get(export::export_handler))
        .route("/api/members/{id}/qr", get(qr::member_qr_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate::require_session,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
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

    info!("starting member-console");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

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
        api_url = %config.upstream.api_url,
        front_url = %config.upstream.front_url,
        production = config.server.production,
        protected_prefixes = ?config.auth.protected_prefixes,
        "configuration loaded"
    );
    if config.auth.jwt_secret.is_none() {
        warn!("no JWT secret configured, every protected page will redirect to login");
    }

    let timeout = Duration::from_secs(config.server.timeout_secs);
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build upstream HTTP client")?;

    let service_metrics = ServiceMetrics::new();
    let app_state = AppState {
        upstream: UpstreamClient::new(http, config.upstream.api_url.clone()),
        cookies: CookiePolicy::new(config.server.production),
        gate: Arc::new(GateConfig {
            secret: config.auth.jwt_secret.clone(),
            protected_prefixes: config.auth.protected_prefixes.clone(),
        }),
        front_url: config.upstream.front_url.clone(),
        timeout,
        metrics: service_metrics.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Clone in_flight counter for drain observability after shutdown
    let in_flight = service_metrics.in_flight.clone();

    // The drain timer starts at signal receipt, not at server start: the
    // server is told to stop accepting, then the drain races DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
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
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Count every request and record it against its route template.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let _in_flight = state.metrics.begin();
    let start = Instant::now();

    let response = next.run(request).await;

    metrics::record_request(
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Liveness plus the counters kept in [`ServiceMetrics`].
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
    });
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics in text exposition format.
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

/// Wait for SIGTERM or SIGINT. A handler that cannot be installed never
/// fires, leaving the other one in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
