//! Router-level tests driven through tower without binding a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use callbridge::config::ServerConfig;
use callbridge::realtime::VadSettings;
use callbridge::routes::create_router;
use callbridge::state::AppState;

fn test_state() -> AppState {
    AppState::new(ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        openai_api_key: "sk-test".to_string(),
        realtime_url: "wss://realtime.test".to_string(),
        realtime_model: "test-model".to_string(),
        telnyx_api_key: "key-test".to_string(),
        telnyx_api_base: "http://telnyx.test".to_string(),
        stream_url: "wss://bridge.test/media".to_string(),
        handshake_timeout_ms: 1_000,
        vad: VadSettings::default(),
    })
}

#[tokio::test]
async fn health_reports_session_count() {
    let app = create_router(test_state());

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "callbridge");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn unrecognized_webhook_event_is_acked() {
    let app = create_router(test_state());

    let body = serde_json::json!({
        "data": {
            "event_type": "call.machine.detection.ended",
            "payload": {"call_control_id": "v3:abc"}
        }
    });
    let response = app
        .oneshot(
            Request::post("/webhooks/telnyx")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn hangup_for_unknown_session_is_acked() {
    let app = create_router(test_state());

    let body = serde_json::json!({
        "data": {
            "event_type": "call.hangup",
            "payload": {"call_control_id": "v3:gone"}
        }
    });
    let response = app
        .oneshot(
            Request::post("/webhooks/telnyx")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
