//! Model listing and management endpoint tests

use axum::http::StatusCode;

use crate::{
    api::{
        create_router,
        test_helpers::{create_test_manager, get_request, json_body, post_json},
        AppState, OpenAIModelsResponse, UnloadModelResponse,
    },
    backend::mock::MockLoader,
    quantization::QuantizationMode,
    registry::ModelInfo,
};

#[tokio::test]
async fn test_models_lists_in_load_order_with_current() {
    let manager = create_test_manager(MockLoader::new());
    manager.load("b", QuantizationMode::None).await.expect("test");
    manager.load("a", QuantizationMode::None).await.expect("test");
    let app = create_router(AppState::new(manager));

    let response = get_request(app, "/v1/models").await;
    assert_eq!(response.status(), StatusCode::OK);

    let result: OpenAIModelsResponse =
        serde_json::from_value(json_body(response).await).expect("test");
    assert_eq!(result.object, "list");
    let ids: Vec<&str> = result.data.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert!(result.data.iter().all(|m| m.object == "model"));
    assert_eq!(result.current_model.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_models_without_manager_is_503() {
    let response = get_request(create_router(AppState::uninitialized()), "/v1/models").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_load_endpoint() {
    let loader = MockLoader::new();
    let manager = create_test_manager(loader.clone());
    let app = create_router(AppState::new(manager.clone()));

    let response = post_json(
        app.clone(),
        "/v1/models/load",
        r#"{"model":"m1","quantization":"8bit"}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let info: ModelInfo = serde_json::from_value(json_body(response).await).expect("test");
    assert_eq!(info.id, "m1");
    assert_eq!(info.quantization, QuantizationMode::EightBit);
    assert_eq!(info.effective_quantization, QuantizationMode::None);

    // second load is a no-op
    let response = post_json(app, "/v1/models/load", r#"{"model":"m1"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(loader.load_count("m1"), 1);
}

#[tokio::test]
async fn test_load_endpoint_failure() {
    let manager = create_test_manager(MockLoader::new().with_missing_model("ghost"));
    let app = create_router(AppState::new(manager));

    let response = post_json(app, "/v1/models/load", r#"{"model":"ghost"}"#).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["detail"]
        .as_str()
        .expect("test")
        .starts_with("Load failed: "));
}

#[tokio::test]
async fn test_load_endpoint_rejects_unknown_quantization() {
    let app = create_router(AppState::new(create_test_manager(MockLoader::new())));
    let response = post_json(
        app,
        "/v1/models/load",
        r#"{"model":"m1","quantization":"3bit"}"#,
    )
    .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unload_endpoint() {
    let manager = create_test_manager(MockLoader::new());
    manager.load("m1", QuantizationMode::None).await.expect("test");
    let app = create_router(AppState::new(manager.clone()));

    let response = post_json(app.clone(), "/v1/models/unload", r#"{"model":"m1"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    let result: UnloadModelResponse =
        serde_json::from_value(json_body(response).await).expect("test");
    assert_eq!(result.model, "m1");
    assert!(result.unloaded);
    assert!(manager.list_loaded_models().is_empty());

    let response = post_json(app, "/v1/models/unload", r#"{"model":"m1"}"#).await;
    let result: UnloadModelResponse =
        serde_json::from_value(json_body(response).await).expect("test");
    assert!(!result.unloaded);
}
