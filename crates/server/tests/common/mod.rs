//! Common test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use lanvan_core::config::AppConfig;
use lanvan_server::{AppState, create_router};
use lanvan_upload::{Environment, UploadCoordinator};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with its upload directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server over a temporary upload directory.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the test configuration.
    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path().join("uploads"));
        configure(&mut config);

        let coordinator = UploadCoordinator::new(&config, Environment::for_app(&config))
            .await
            .expect("Failed to create upload coordinator");
        let state = AppState::new(config, coordinator);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and decode the JSON response body.
    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    /// PUT raw bytes to a session's chunk endpoint.
    pub async fn put_chunk(&self, upload_id: &str, data: Vec<u8>, last: bool) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/v1/uploads/{upload_id}/chunks?last={last}"))
            .header("Content-Type", "application/octet-stream")
            .body(Body::from(data))
            .unwrap();
        self.send(request).await
    }

    /// Send a request and return the raw response body.
    pub async fn raw_request(&self, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Admit one file and return its session id.
    pub async fn admit(&self, descriptor: Value) -> String {
        let (status, body) = self
            .json_request(
                "POST",
                "/v1/uploads",
                Some(serde_json::json!({ "files": [descriptor] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["files"][0]["session_id"]
            .as_str()
            .unwrap_or_else(|| panic!("file not admitted: {body}"))
            .to_string()
    }
}
