//! Auth, envelope, and persona API integration tests.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use reverie_memory::Permission;
use reverie_server::API_KEY_HEADER;

use common::{admin_server, body_json, request, test_server};

#[tokio::test]
async fn test_health_requires_no_auth() {
    let (server, _) = admin_server();
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_missing_key_is_401() {
    let (server, _) = admin_server();
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/api/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "missing_key");
}

#[tokio::test]
async fn test_wrong_key_is_401() {
    let (server, _) = admin_server();
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/api/stats")
                .header(API_KEY_HEADER, "rv_bogus.deadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_secret_is_401() {
    let (server, key) = admin_server();
    let tampered = format!("{}x", key);
    let response = server
        .router()
        .oneshot(request("GET", "/api/stats", &tampered, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_insufficient_scope_is_403() {
    // A read-only key may not create personas.
    let (server, key) = test_server(vec![Permission::Read], None);
    let response = server
        .router()
        .oneshot(request(
            "POST",
            "/api/personas",
            &key,
            Some(serde_json::json!({"name": "Nope"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "permission");
}

#[tokio::test]
async fn test_read_scope_covers_stats() {
    let (server, key) = test_server(vec![Permission::Read], None);
    let response = server
        .router()
        .oneshot(request("GET", "/api/stats", &key, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["data"]["persona_count"], 0);
}

#[tokio::test]
async fn test_persona_crud_roundtrip() {
    let (server, key) = admin_server();
    let router = server.router();

    // Create.
    let response = router
        .clone()
        .oneshot(request(
            "POST",
            "/api/personas",
            &key,
            Some(serde_json::json!({
                "name": "Ada",
                "description": "test persona",
                "maxMemorySize": 50,
                "memoryDecayTime": 3_600_000u64,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    let id = json["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(json["data"]["maxMemorySize"], 50);

    // Get.
    let response = router
        .clone()
        .oneshot(request("GET", &format!("/api/personas/{}", id), &key, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["name"], "Ada");

    // Update.
    let response = router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/personas/{}", id),
            &key,
            Some(serde_json::json!({"name": "Ada Lovelace"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["name"], "Ada Lovelace");

    // List.
    let response = router
        .clone()
        .oneshot(request("GET", "/api/personas", &key, None))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    // Delete.
    let response = router
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/personas/{}", id),
            &key,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Gone.
    let response = router
        .oneshot(request("GET", &format!("/api/personas/{}", id), &key, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_field_is_400() {
    let (server, key) = admin_server();
    let response = server
        .router()
        .oneshot(request(
            "POST",
            "/api/personas",
            &key,
            Some(serde_json::json!({"name": "X", "favouriteColor": "blue"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_persona_config_bounds_enforced_at_wire() {
    let (server, key) = admin_server();
    let response = server
        .router()
        .oneshot(request(
            "POST",
            "/api/personas",
            &key,
            Some(serde_json::json!({"name": "Tiny", "maxMemorySize": 2})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "validation");
}

#[tokio::test]
async fn test_invalid_persona_id_is_400() {
    let (server, key) = admin_server();
    let response = server
        .router()
        .oneshot(request("GET", "/api/personas/not-a-uuid", &key, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let (server, key) = test_server(vec![Permission::Admin], Some(2));
    let router = server.router();

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(request("GET", "/api/stats", &key, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .oneshot(request("GET", "/api/stats", &key, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("Retry-After"));
    let json = body_json(response).await;
    assert_eq!(json["error"], "rate_limited");
}
