//! Shared test fixtures for server integration tests.

// Not every test binary touches every helper.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};

use reverie_core::IndexedVectorStore;
use reverie_memory::{MetadataStore, MockEmbedder, Permission, PersonaMemoryManager};
use reverie_server::{generate_key, AppState, EngineConfig, Server, API_KEY_HEADER};

/// Embedding dimensionality used by the test engine.
pub const TEST_DIMS: usize = 32;

/// Build a server around an in-memory engine, plus one API key holding
/// `permissions`.
pub fn test_server(permissions: Vec<Permission>, rate_limit_rpm: Option<u32>) -> (Server, String) {
    let config = EngineConfig {
        dimensions: TEST_DIMS,
        max_memory_mb: 1,
        embedding_provider: "mock".to_string(),
        api_key_salt_rounds: 4,
        ..Default::default()
    };

    let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
    let store = IndexedVectorStore::new(config.store_config()).unwrap();
    let manager =
        PersonaMemoryManager::new(store, metadata, Arc::new(MockEmbedder::new(TEST_DIMS)));

    let (record, key) = generate_key(
        "test-key",
        permissions,
        rate_limit_rpm,
        None,
        config.api_key_salt_rounds,
    );
    manager.metadata().put_api_key(&record).unwrap();

    let state = AppState::new(manager, config);
    (Server::from_state(state), key)
}

/// A server with an admin key; the common case.
pub fn admin_server() -> (Server, String) {
    test_server(vec![Permission::Admin], None)
}

/// Build an authenticated JSON request.
pub fn request(method: &str, uri: &str, key: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(API_KEY_HEADER, key)
        .header("Content-Type", "application/json");
    match body {
        Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
