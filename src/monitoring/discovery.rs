// Monitoring discovery endpoints
// Lets the monitoring stack pull dashboards and rule files from the service
//
// Numan Thabit 2025 Nov

use super::Monitoring;
use crate::errors::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
struct DiscoveryState {
    monitoring: Arc<Monitoring>,
    dashboards_dir: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Router serving `/dashboards`, `/alerting-rules` and `/recording-rules`.
pub fn discovery_router(monitoring: Arc<Monitoring>, dashboards_dir: PathBuf) -> Router {
    Router::new()
        .route("/dashboards", get(serve_dashboards))
        .route("/alerting-rules", get(serve_alerting_rules))
        .route("/recording-rules", get(serve_recording_rules))
        .with_state(DiscoveryState {
            monitoring,
            dashboards_dir: Arc::new(dashboards_dir),
        })
}

/// Parse every `*.json` file in `dir`, ordered by file name. A missing
/// directory has no dashboards.
pub async fn load_dashboards(dir: &Path) -> Result<Vec<serde_json::Value>> {
    if !tokio::fs::try_exists(dir).await? {
        debug!(dir = %dir.display(), "dashboards directory missing");
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut dashboards = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = tokio::fs::read(&path).await?;
        dashboards.push(serde_json::from_slice(&raw)?);
    }
    Ok(dashboards)
}

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

async fn serve_dashboards(
    State(state): State<DiscoveryState>,
) -> Result<Json<Vec<serde_json::Value>>, (StatusCode, Json<ErrorResponse>)> {
    load_dashboards(&state.dashboards_dir)
        .await
        .map(Json)
        .map_err(|err| {
            warn!(dir = %state.dashboards_dir.display(), error = %err, "failed to load dashboards");
            internal_error(err)
        })
}

fn yaml_response(yaml: Result<String>) -> Response {
    match yaml {
        Ok(body) => ([(header::CONTENT_TYPE, "application/yaml")], body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to render rules");
            internal_error(err).into_response()
        }
    }
}

async fn serve_alerting_rules(State(state): State<DiscoveryState>) -> Response {
    yaml_response(state.monitoring.alerting_rules_yaml())
}

async fn serve_recording_rules(State(state): State<DiscoveryState>) -> Response {
    yaml_response(state.monitoring.recording_rules_yaml())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MonitoringConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn monitoring() -> Arc<Monitoring> {
        let cfg = MonitoringConfig::from_yaml(
            r#"
alerting_rules:
  HighLatency:
    expr: histogram_quantile(0.99, rate(api_latency_seconds_bucket[5m])) > 1
    annotations: { summary: slow, description: p99 above one second }
"#,
        )
        .unwrap();
        Arc::new(Monitoring::new("gateway", cfg).unwrap())
    }

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn dashboards_are_loaded_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"title":"second"}"#).unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"title":"first"}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let router = discovery_router(monitoring(), dir.path().to_path_buf());
        let (status, body) = get_body(router, "/dashboards").await;
        assert_eq!(status, StatusCode::OK);
        let titles: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(titles[0]["title"], "first");
        assert_eq!(titles[1]["title"], "second");
        assert_eq!(titles.len(), 2);
    }

    #[tokio::test]
    async fn missing_dashboards_dir_serves_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let router = discovery_router(monitoring(), dir.path().join("absent"));
        let (status, body) = get_body(router, "/dashboards").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn broken_dashboard_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let router = discovery_router(monitoring(), dir.path().to_path_buf());
        let (status, _) = get_body(router, "/dashboards").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn rules_are_served_as_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let router = discovery_router(monitoring(), dir.path().to_path_buf());

        let (status, body) = get_body(router.clone(), "/alerting-rules").await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_yaml::Value = serde_yaml::from_str(&body).unwrap();
        assert_eq!(doc["groups"][0]["name"].as_str(), Some("gateway-alert"));
        assert_eq!(
            doc["groups"][0]["rules"][0]["alert"].as_str(),
            Some("HighLatency")
        );

        let (_, body) = get_body(router, "/recording-rules").await;
        let doc: serde_yaml::Value = serde_yaml::from_str(&body).unwrap();
        assert_eq!(doc["groups"][0]["name"].as_str(), Some("gateway-record"));
    }
}
