//! Common test utilities and helpers for lab-api tests
//!
//! Builds the router over an in-memory driver and a fake clock, and wraps
//! request plumbing so the tests read as API calls.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use lab_api::{create_app, AppState};
use lab_driver::mock::FakeDriver;
use lab_orchestrator::{
    CourseCatalog, CourseImage, FakeClock, LifecycleOrchestrator, OrchestratorConfig,
    ResourceProfile,
};
use tower::ServiceExt; // for `oneshot`

pub fn test_catalog() -> CourseCatalog {
    CourseCatalog::new()
        .with_course(
            "cs101",
            CourseImage {
                image: "registry.local/labs/cs101:latest".to_string(),
                ides: BTreeMap::from([("editor".to_string(), 8443), ("notebook".to_string(), 8888)]),
                default_profile: ResourceProfile::new(1000, 2048),
            },
        )
        .with_course(
            "ml201",
            CourseImage {
                image: "registry.local/labs/ml201:latest".to_string(),
                ides: BTreeMap::from([("notebook".to_string(), 8888)]),
                default_profile: ResourceProfile::new(2000, 4096),
            },
        )
}

/// Everything a test may want to poke at behind the router.
pub struct TestContext {
    pub client: TestClient,
    pub state: AppState,
    pub driver: Arc<FakeDriver>,
    pub clock: FakeClock,
}

pub fn create_test_context() -> TestContext {
    let driver = Arc::new(FakeDriver::new());
    let clock = FakeClock::default();
    let orchestrator = LifecycleOrchestrator::with_clock(
        driver.clone(),
        OrchestratorConfig::new(test_catalog()),
        Arc::new(clock.clone()),
    )
    .expect("valid test config");

    let state = AppState::new(orchestrator);
    TestContext {
        client: TestClient {
            app: create_app(state.clone()),
        },
        state,
        driver,
        clock,
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// Helper to create authenticated request headers
pub fn auth_headers(username: &str) -> Vec<(&'static str, &str)> {
    vec![("x-user", username)]
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
}

impl TestClient {
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Post JSON to an endpoint
    pub async fn post<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        headers: Option<Vec<(&str, &str)>>,
    ) -> Response<Body> {
        let req_body = serde_json::to_string(body).expect("Failed to serialize request body");
        let builder = with_headers(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json"),
            headers,
        );

        let request = builder.body(Body::from(req_body)).unwrap();
        self.send_request(request).await
    }

    /// Post without a body
    pub async fn post_empty(&self, uri: &str, headers: Option<Vec<(&str, &str)>>) -> Response<Body> {
        let builder = with_headers(Request::builder().method("POST").uri(uri), headers);
        let request = builder.body(Body::empty()).unwrap();
        self.send_request(request).await
    }

    pub async fn get(&self, uri: &str, headers: Option<Vec<(&str, &str)>>) -> Response<Body> {
        let builder = with_headers(Request::builder().method("GET").uri(uri), headers);
        let request = builder.body(Body::empty()).unwrap();
        self.send_request(request).await
    }

    pub async fn delete(&self, uri: &str, headers: Option<Vec<(&str, &str)>>) -> Response<Body> {
        let builder = with_headers(Request::builder().method("DELETE").uri(uri), headers);
        let request = builder.body(Body::empty()).unwrap();
        self.send_request(request).await
    }
}

fn with_headers(
    mut builder: axum::http::request::Builder,
    headers: Option<Vec<(&str, &str)>>,
) -> axum::http::request::Builder {
    for (k, v) in headers.unwrap_or_default() {
        builder = builder.header(k, v);
    }
    builder
}
