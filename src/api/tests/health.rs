//! Health and metrics endpoint tests

use std::sync::Arc;

use axum::http::StatusCode;

use crate::{
    api::{
        create_router,
        test_helpers::{create_test_app, create_test_manager, get_request, json_body, post_json},
        AppState, HealthResponse,
    },
    backend::mock::MockLoader,
    device::ComputeDevice,
    manager::ModelManager,
};

#[tokio::test]
async fn test_health_ready() {
    let manager = create_test_manager(MockLoader::new());
    manager
        .load("m1", crate::quantization::QuantizationMode::None)
        .await
        .expect("test");
    let response = get_request(create_router(AppState::new(manager)), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = serde_json::from_value(json_body(response).await).expect("test");
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, crate::VERSION);
    assert_eq!(health.device.as_deref(), Some("cpu"));
    assert_eq!(health.loaded_models, 1);
}

#[tokio::test]
async fn test_health_before_initialize() {
    let manager = ModelManager::new(Arc::new(MockLoader::new()), ComputeDevice::cpu());
    let response = get_request(create_router(AppState::new(Arc::new(manager))), "/health").await;
    let health: HealthResponse = serde_json::from_value(json_body(response).await).expect("test");
    assert_eq!(health.status, "initializing");

    let response = get_request(create_router(AppState::uninitialized()), "/health").await;
    let health: HealthResponse = serde_json::from_value(json_body(response).await).expect("test");
    assert_eq!(health.status, "initializing");
    assert!(health.device.is_none());
}

#[tokio::test]
async fn test_metrics_count_completions() {
    let state = AppState::new(create_test_manager(MockLoader::new()));
    let app = create_router(state.clone());

    let request = r#"{"model":"m1","messages":[{"role":"user","content":"Hi"}]}"#;
    post_json(app.clone(), "/chat/completions", request).await;
    post_json(app.clone(), "/chat/completions", request).await;

    let response = get_request(app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["completions_total"], 2);
    assert_eq!(body["completions_succeeded"], 2);
    assert_eq!(body["completion_tokens"], 6);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = get_request(create_test_app(), "/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
