//! Shared helpers for api tests

use axum::{body::Body, http::Request, response::Response, Router};
use tower::util::ServiceExt;

use super::*;
use crate::{backend::mock::MockLoader, device::ComputeDevice};

/// Initialized manager over `loader` on the CPU
pub fn create_test_manager(loader: MockLoader) -> Arc<ModelManager> {
    let manager = ModelManager::new(Arc::new(loader), ComputeDevice::cpu());
    manager.initialize();
    Arc::new(manager)
}

/// Router over an initialized echo-model manager
pub fn create_test_app() -> Router {
    create_router(AppState::new(create_test_manager(MockLoader::new())))
}

/// Send a JSON POST
pub async fn post_json(app: Router, uri: &str, body: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("test"),
    )
    .await
    .expect("test")
}

/// Send a GET
pub async fn get_request(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("test"),
    )
    .await
    .expect("test")
}

/// Read a response body as JSON
pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("test");
    serde_json::from_slice(&bytes).expect("test")
}
