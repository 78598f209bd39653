//! Integration tests for the REST endpoints.
//!
//! Tests drive the Axum `Router` directly via `tower::ServiceExt` over an
//! in-memory medium, without starting a TCP server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mirrorstate_core::{Hub, MemoryMedium};
use mirrorstate_server::router::build_router;
use mirrorstate_server::state::AppState;
use mirrorstate_types::StateName;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn make_test_state() -> Arc<AppState<MemoryMedium>> {
    let medium = Arc::new(MemoryMedium::with_values(
        [
            (StateName::new("counter").unwrap(), json!(3)),
            (StateName::new("ui/theme").unwrap(), json!({"dark": true})),
        ]
        .into_iter()
        .collect(),
    ));
    let hub = Hub::open(medium, 16).await.unwrap();
    Arc::new(AppState::new(hub, "/mirrorstate"))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(path: &str) -> (StatusCode, Value) {
    let router = build_router(make_test_state().await);
    let response = router
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

#[tokio::test]
async fn test_list_states_returns_frozen_inventory() {
    let (status, json) = get("/api/states").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["values"]["counter"], 3);
    assert_eq!(json["values"]["ui/theme"]["dark"], true);
    assert_eq!(json["fingerprint"].as_str().unwrap().len(), 16);
}

#[tokio::test]
async fn test_get_state_by_name() {
    let (status, json) = get("/api/states/counter").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"name": "counter", "value": 3, "sequence": 0}));
}

#[tokio::test]
async fn test_get_nested_state_by_name() {
    let (status, json) = get("/api/states/ui/theme").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "ui/theme");
    assert_eq!(json["value"], json!({"dark": true}));
}

#[tokio::test]
async fn test_get_state_not_found() {
    let (status, json) = get("/api/states/missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_get_reserved_name_is_rejected() {
    let (status, _) = get("/api/states/$fingerprint").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_client_settings() {
    let (status, json) = get("/api/config").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"wsPath": "/mirrorstate"}));
}

#[tokio::test]
async fn test_state_reflects_accepted_mutations() {
    let state = make_test_state().await;
    let name = StateName::new("counter").unwrap();
    let mut conn = state.hub.connect();
    conn.open();
    conn.handle(mirrorstate_types::ClientMessage::update(name, json!(4)))
        .await;

    let response = build_router(state)
        .oneshot(Request::get("/api/states/counter").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["value"], 4);
    assert_eq!(json["sequence"], 1);
}
