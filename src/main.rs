use anyhow::{anyhow, Context, Result};
use api_metrics_gatherer::config::AppConfig;
use api_metrics_gatherer::monitoring::{discovery, metrics_router, Monitoring};
use api_metrics_gatherer::{server, MetricLabels};
use axum::{extract::Path, http::StatusCode, response::Json, routing::get, Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal metrics gatherer error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration from environment")?;
    let buckets = config.bucket_config().context("resolve histogram buckets")?;
    let monitoring_config = config
        .monitoring()
        .context("load monitoring configuration")?;

    let monitoring = Arc::new(
        Monitoring::new(&config.service_name, monitoring_config)
            .context("initialize monitoring")?,
    );
    let api_layer = monitoring
        .api_metrics_layer(&buckets)
        .context("register api metrics")?;

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let metrics_app = metrics_router(monitoring.clone()).layer(TraceLayer::new_for_http());
    spawn_plain_server("metrics", metrics_addr, metrics_app).await?;

    let discovery_addr = SocketAddr::from(([0, 0, 0, 0], config.discovery_port));
    let discovery_app = discovery::discovery_router(monitoring.clone(), config.dashboards_dir.clone())
        .layer(TraceLayer::new_for_http());
    spawn_plain_server("discovery", discovery_addr, discovery_app).await?;

    let api = api_router().layer(api_layer);
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.service_port));
    let listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("bind api server address {api_addr}"))?;

    info!(
        service = %monitoring.name(),
        api = %api_addr,
        metrics = %metrics_addr,
        discovery = %discovery_addr,
        "metrics gatherer online"
    );

    server::serve(listener, api, shutdown_signal())
        .await
        .context("api server")?;
    Ok(())
}

async fn spawn_plain_server(name: &'static str, addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {name} server address {addr}"))?;
    info!(server = name, address = %addr, "serving");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(server = name, error = %e, "server error");
        }
    });
    Ok(())
}

fn api_router() -> Router {
    Router::new()
        .route("/ping", get(|| async { StatusCode::OK }))
        .route("/ready", get(|| async { StatusCode::OK }))
        .route("/queue/:name", get(enqueue))
}

/// Example handler that tags its request with the queue it targets.
async fn enqueue(
    Path(name): Path<String>,
    Extension(labels): Extension<MetricLabels>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    labels
        .set("queue_name", name.clone())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::json!({ "queued": name })))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl_c listener error");
    }
    info!("Shutdown signal received, exiting");
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
