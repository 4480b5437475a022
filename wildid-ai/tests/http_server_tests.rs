//! HTTP Server & Routing Integration Tests
//!
//! Routes exercised through `tower::ServiceExt::oneshot` against fake providers.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tower::ServiceExt;
use wildid_ai::config::ServerConfig;
use wildid_ai::{build_router, AppState};

fn test_app_state() -> AppState {
    let fakes = Fakes {
        vision: Arc::new(FakeVision {
            bundle: labels(&[("Flower", 0.8)]),
            ..Default::default()
        }),
        plant_id: Arc::new(FakePlantId {
            hits: vec![plant_hit("Rosa rubiginosa", 0.9)],
            ..Default::default()
        }),
        knowledge_graph: Arc::new(FakeKnowledgeGraph::resolving(&[("Rosa rubiginosa", rose())])),
        ..Default::default()
    };
    AppState::new(fakes.recognizer(fast_fusion()), &ServerConfig::default())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_module_identity() {
    let app = build_router(test_app_state());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "wildid-ai");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["git_hash"].is_string());
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_recognize_identifies_with_fakes() {
    let app = build_router(test_app_state());
    let request = post_json(
        "/recognize",
        json!({ "image_base64": STANDARD.encode(image()), "hint": "flower" }),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["outcome"]["status"], "identified");
    assert_eq!(json["outcome"]["canonical_name"], "Rosa rubiginosa");
    assert_eq!(json["outcome"]["category"], "flower");
    assert_eq!(json["outcome"]["provider"], "plantid");
    assert!(json["confidence"].as_f64().unwrap() > 0.8);
    assert!(json["request_id"].is_string());
    assert_eq!(json["providers"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_recognize_accepts_data_url() {
    let app = build_router(test_app_state());
    let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(image()));

    let response = app
        .oneshot(post_json("/recognize", json!({ "image_base64": data_url })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_recognize_rejects_bad_base64() {
    let app = build_router(test_app_state());

    let response = app
        .oneshot(post_json("/recognize", json!({ "image_base64": "%%% not base64 %%%" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_recognize_rejects_missing_image() {
    let app = build_router(test_app_state());

    let response = app
        .oneshot(post_json("/recognize", json!({ "hint": "bug" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recognize_rejects_malformed_json() {
    let app = build_router(test_app_state());
    let request = Request::builder()
        .method("POST")
        .uri("/recognize")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recognize_rejects_oversized_image() {
    let mut state = test_app_state();
    state.max_image_bytes = 4;
    let app = build_router(state);

    let response = app
        .oneshot(post_json(
            "/recognize",
            json!({ "image_base64": STANDARD.encode(image()) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recognize_saturated_returns_503() {
    let mut state = test_app_state();
    state.permits = Arc::new(Semaphore::new(0));
    state.queue_wait = Duration::from_millis(20);
    let last_error = state.last_error.clone();
    let app = build_router(state);

    let response = app
        .oneshot(post_json(
            "/recognize",
            json!({ "image_base64": STANDARD.encode(image()) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "SERVICE_UNAVAILABLE");
    assert!(last_error.read().await.is_some());
}

#[tokio::test]
async fn test_recognize_after_shutdown_is_cancelled() {
    let state = test_app_state();
    state.shutdown.cancel();
    let app = build_router(state);

    let response = app
        .oneshot(post_json(
            "/recognize",
            json!({ "image_base64": STANDARD.encode(image()) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"]["code"], "CANCELLED");
}

#[tokio::test]
async fn test_unknown_route_404() {
    let app = build_router(test_app_state());

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
