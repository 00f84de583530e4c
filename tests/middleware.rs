mod common;

use api_metrics_gatherer::{ApiMetrics, BucketConfig, MetricLabels};
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::routing::get;
use axum::{Extension, Router};
use common::{arrivals, count_with_state, histogram_count, label, metrics_named};
use prometheus::Registry;
use std::time::Duration;
use tower::ServiceExt;

fn app(registry: &Registry) -> Router {
    let layer = ApiMetrics::register(registry, &BucketConfig::defaults().unwrap()).unwrap();
    Router::new()
        .route("/hello", get(|| async { "hello" }))
        .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/cached", get(|| async { (StatusCode::NOT_MODIFIED, "stale") }))
        .route(
            "/queue",
            get(|Extension(labels): Extension<MetricLabels>| async move {
                labels.set("queue_name", "emails").unwrap();
                labels.set("api_version", "v3").unwrap();
                "queued"
            }),
        )
        .route(
            "/bad-label",
            get(|Extension(labels): Extension<MetricLabels>| async move {
                match labels.set("route", "/bad-label") {
                    Ok(()) => StatusCode::OK,
                    Err(_) => StatusCode::UNPROCESSABLE_ENTITY,
                }
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        )
        .layer(layer)
}

fn get_req(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn completed_request_is_observed_once() {
    let registry = Registry::new();
    let response = app(&registry).oneshot(get_req("/hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Arrival is counted before the body is consumed, latency only after.
    assert_eq!(arrivals(&registry), 1.0);
    assert_eq!(histogram_count(&registry, "api_latency_seconds"), 0);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"hello");

    let latency = metrics_named(&registry, "api_latency_seconds");
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0].get_histogram().get_sample_count(), 1);
    assert!(latency[0].get_histogram().get_sample_sum() >= 0.0);
    assert_eq!(label(&latency[0], "state"), "completed");
    assert_eq!(label(&latency[0], "status_code"), "200");
}

#[tokio::test]
async fn arrival_uses_labels_known_at_arrival() {
    let registry = Registry::new();
    let response = app(&registry).oneshot(get_req("/queue")).await.unwrap();
    to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let arrived = metrics_named(&registry, "api_arrival_total");
    assert_eq!(arrived.len(), 1);
    assert_eq!(label(&arrived[0], "queue_name"), "");
    assert_eq!(label(&arrived[0], "state"), "");

    let latency = metrics_named(&registry, "api_latency_seconds");
    assert_eq!(label(&latency[0], "queue_name"), "emails");
    assert_eq!(label(&latency[0], "api_version"), "v3");
    assert_eq!(label(&latency[0], "state"), "completed");
}

#[tokio::test]
async fn undeclared_label_is_rejected_in_handler() {
    let registry = Registry::new();
    let response = app(&registry).oneshot(get_req("/bad-label")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    drop(response);

    for family in registry.gather() {
        for metric in family.get_metric() {
            assert!(metric.get_label().iter().all(|pair| pair.get_name() != "route"));
        }
    }
}

#[tokio::test]
async fn bodyless_responses_complete_without_polling() {
    let registry = Registry::new();
    let router = app(&registry);

    let response = router.clone().oneshot(get_req("/empty")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    drop(response);

    let response = router.oneshot(get_req("/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    drop(response);

    assert_eq!(count_with_state(&registry, "api_latency_seconds", "completed"), 2);
    assert_eq!(count_with_state(&registry, "api_latency_seconds", "aborted"), 0);

    let statuses: Vec<String> = metrics_named(&registry, "api_latency_seconds")
        .iter()
        .map(|m| label(m, "status_code").to_string())
        .collect();
    assert!(statuses.contains(&"204".to_string()));
    assert!(statuses.contains(&"404".to_string()));
}

#[tokio::test]
async fn dropped_response_body_counts_as_aborted() {
    let registry = Registry::new();
    let response = app(&registry).oneshot(get_req("/hello")).await.unwrap();
    drop(response);

    let latency = metrics_named(&registry, "api_latency_seconds");
    assert_eq!(latency.len(), 1);
    assert_eq!(label(&latency[0], "state"), "aborted");
    assert_eq!(label(&latency[0], "status_code"), "200");
}

#[tokio::test]
async fn request_abandoned_before_response_is_aborted_without_status() {
    let registry = Registry::new();
    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        app(&registry).oneshot(get_req("/slow")),
    )
    .await;
    assert!(outcome.is_err());

    let latency = metrics_named(&registry, "api_latency_seconds");
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0].get_histogram().get_sample_count(), 1);
    assert_eq!(label(&latency[0], "state"), "aborted");
    assert_eq!(label(&latency[0], "status_code"), "");
}

#[tokio::test]
async fn arrivals_equal_requests_regardless_of_outcome() {
    let registry = Registry::new();
    let router = app(&registry);

    for _ in 0..3 {
        let response = router.clone().oneshot(get_req("/hello")).await.unwrap();
        to_bytes(response.into_body(), usize::MAX).await.unwrap();
    }
    for _ in 0..2 {
        drop(router.clone().oneshot(get_req("/hello")).await.unwrap());
    }
    let _ = tokio::time::timeout(
        Duration::from_millis(20),
        router.clone().oneshot(get_req("/slow")),
    )
    .await;

    assert_eq!(arrivals(&registry), 6.0);
    assert_eq!(count_with_state(&registry, "api_latency_seconds", "completed"), 3);
    assert_eq!(count_with_state(&registry, "api_latency_seconds", "aborted"), 3);
}

#[tokio::test]
async fn requests_outside_a_counted_connection_skip_byte_histograms() {
    let registry = Registry::new();
    let response = app(&registry).oneshot(get_req("/hello")).await.unwrap();
    to_bytes(response.into_body(), usize::MAX).await.unwrap();

    assert_eq!(histogram_count(&registry, "api_latency_seconds"), 1);
    assert_eq!(histogram_count(&registry, "api_bytes_read"), 0);
    assert_eq!(histogram_count(&registry, "api_bytes_written"), 0);
}

#[tokio::test]
async fn head_request_completes_without_body() {
    let registry = Registry::new();
    let request = Request::builder()
        .method(Method::HEAD)
        .uri("/hello")
        .body(Body::empty())
        .unwrap();
    let response = app(&registry).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    let latency = metrics_named(&registry, "api_latency_seconds");
    assert_eq!(latency.len(), 1);
    assert_eq!(label(&latency[0], "state"), "completed");
    assert_eq!(label(&latency[0], "status_code"), "200");
}

#[tokio::test]
async fn not_modified_with_unsent_body_completes() {
    let registry = Registry::new();
    let response = app(&registry).oneshot(get_req("/cached")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    drop(response);

    assert_eq!(count_with_state(&registry, "api_latency_seconds", "completed"), 1);
    assert_eq!(count_with_state(&registry, "api_latency_seconds", "aborted"), 0);
}
