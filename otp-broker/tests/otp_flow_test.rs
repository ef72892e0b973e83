//! End-to-end OTP request and verification

mod common;

use axum::http::{HeaderName, HeaderValue};
use common::*;
use serde_json::json;

fn internal_key_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-internal-key"),
        HeaderValue::from_static(INTERNAL_KEY),
    )
}

fn webhook_secret_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-telegram-bot-api-secret-token"),
        HeaderValue::from_static(WEBHOOK_SECRET),
    )
}

/// Link +15550001111 to chat 101 through the bot
async fn link_phone(server: &axum_test::TestServer) {
    register_token(server, "tok", "+15550001111").await;
    let (name, value) = webhook_secret_header();
    let response = server
        .post("/telegram/webhook")
        .add_header(name, value)
        .json(&start_webhook_payload(101, "tok"))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_request_unlinked_phone_fails() {
    let (server, _store, sender) = create_test_server(base_config());

    let (name, value) = internal_key_header();
    let response = server
        .post("/internal/otp/request")
        .add_header(name, value)
        .json(&json!({ "phone": "+15550009999" }))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(sender.sent_count(), 0);
}

#[tokio::test]
async fn test_request_delivers_code_to_linked_chat() {
    let (server, _store, sender) = create_test_server(base_config());
    link_phone(&server).await;

    let (name, value) = internal_key_header();
    let response = server
        .post("/internal/otp/request")
        .add_header(name, value)
        .json(&json!({ "phone": "+1 555 000 1111" }))
        .await;
    assert_eq!(response.status_code(), 200);

    let code = sender.last_code(101).expect("code delivered to chat");
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_request_by_chat_id() {
    let (server, _store, sender) = create_test_server(base_config());
    link_phone(&server).await;

    let (name, value) = internal_key_header();
    let response = server
        .post("/internal/otp/request")
        .add_header(name, value)
        .json(&json!({ "chat_id": 101 }))
        .await;
    assert_eq!(response.status_code(), 200);
    assert!(sender.last_code(101).is_some());
}

#[tokio::test]
async fn test_verify_roundtrip_is_single_use() {
    let (server, _store, sender) = create_test_server(base_config());
    link_phone(&server).await;

    let (name, value) = internal_key_header();
    server
        .post("/internal/otp/request")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111" }))
        .await;
    let code = sender.last_code(101).unwrap();

    let response = server
        .post("/internal/otp/verify")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111", "code": code }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["verified"], true);
    assert_eq!(body["subject_id"], "+15550001111");

    // Same code again: consumed on success
    let response = server
        .post("/internal/otp/verify")
        .add_header(name, value)
        .json(&json!({ "phone": "+15550001111", "code": code }))
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_wrong_code_rejected_then_correct_accepted() {
    let (server, _store, sender) = create_test_server(base_config());
    link_phone(&server).await;

    let (name, value) = internal_key_header();
    server
        .post("/internal/otp/request")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111" }))
        .await;
    let code = sender.last_code(101).unwrap();
    let wrong = if code == "000000" { "000001" } else { "000000" };

    let response = server
        .post("/internal/otp/verify")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111", "code": wrong }))
        .await;
    assert_eq!(response.status_code(), 401);

    let response = server
        .post("/internal/otp/verify")
        .add_header(name, value)
        .json(&json!({ "phone": "+15550001111", "code": code }))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_attempts_exhaust_after_five_mismatches() {
    let (server, _store, sender) = create_test_server(base_config());
    link_phone(&server).await;

    let (name, value) = internal_key_header();
    server
        .post("/internal/otp/request")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111" }))
        .await;
    let code = sender.last_code(101).unwrap();
    let wrong = if code == "000000" { "000001" } else { "000000" };

    for _ in 0..5 {
        let response = server
            .post("/internal/otp/verify")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "phone": "+15550001111", "code": wrong }))
            .await;
        assert_eq!(response.status_code(), 401);
    }

    // Budget spent: even the right code is refused now
    let response = server
        .post("/internal/otp/verify")
        .add_header(name, value)
        .json(&json!({ "phone": "+15550001111", "code": code }))
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_min_interval_returns_429() {
    let mut config = base_config();
    config.otp_min_interval = chrono::Duration::seconds(30);
    let (server, _store, sender) = create_test_server(config);
    link_phone(&server).await;

    let (name, value) = internal_key_header();
    server
        .post("/internal/otp/request")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111" }))
        .await;
    let first_code = sender.last_code(101).unwrap();

    let response = server
        .post("/internal/otp/request")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111" }))
        .await;
    assert_eq!(response.status_code(), 429);

    // The rejected request did not invalidate the live code
    let response = server
        .post("/internal/otp/verify")
        .add_header(name, value)
        .json(&json!({ "phone": "+15550001111", "code": first_code }))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_verify_requires_code_and_target() {
    let (server, _store, _sender) = create_test_server(base_config());
    link_phone(&server).await;

    let (name, value) = internal_key_header();
    let response = server
        .post("/internal/otp/verify")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "phone": "+15550001111" }))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/internal/otp/verify")
        .add_header(name, value)
        .json(&json!({ "code": "123456" }))
        .await;
    assert_eq!(response.status_code(), 400);
}
