use std::sync::Arc;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use call_session_cell::models::CallProvider;
use call_session_cell::router::call_session_routes;
use call_session_cell::services::{CallStateManager, ProviderFactory, ProviderRegistry};
use call_session_cell::test_utils::{test_recovery_config, ScriptedProviderFactory};
use call_session_cell::CallSessionState;
use shared_config::AppConfig;

const API_TOKEN: &str = "test-api-token";

fn test_app(config: AppConfig, factories: Vec<Arc<ScriptedProviderFactory>>) -> Router {
    let config = AppConfig {
        call_api_token: API_TOKEN.to_string(),
        ..config
    };
    let mut registry = ProviderRegistry::new();
    for factory in factories {
        let factory: Arc<dyn ProviderFactory> = factory;
        registry.register(factory);
    }
    let manager = CallStateManager::new(test_recovery_config(), CallProvider::Daily, registry, None);
    call_session_routes(CallSessionState::new(manager, Arc::new(config)))
}

fn scripted_app() -> (Router, Arc<ScriptedProviderFactory>) {
    let daily = Arc::new(ScriptedProviderFactory::new(CallProvider::Daily));
    (test_app(AppConfig::default(), vec![daily.clone()]), daily)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_as(app, Some(API_TOKEN), method, uri, body).await
}

async fn send_as(
    app: &Router,
    token: Option<&str>,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn create_body(call_type: &str) -> Value {
    json!({
        "channel_info": {
            "channel_name": "consult-42",
            "participants": {
                "doctor_id": "doctor-1",
                "customer_id": "customer-1"
            },
            "call_type": call_type
        },
        "metadata": { "token": "meeting-token" }
    })
}

async fn create_session(app: &Router) -> String {
    let (status, json) = send(app, "POST", "/sessions", Some(create_body("video"))).await;
    assert_eq!(status, StatusCode::OK);
    json["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_call_health_check_not_configured() {
    let app = test_app(AppConfig::default(), vec![]);

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "not_configured");
    assert_eq!(json["daily_configured"], false);
    assert_eq!(json["active_sessions"], 0);
}

#[tokio::test]
async fn test_call_health_check_configured() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rooms"))
        .and(header("authorization", "Bearer test-daily-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&mock_server)
        .await;

    let config = AppConfig {
        daily_api_key: "test-daily-key".to_string(),
        daily_api_base_url: mock_server.uri(),
        ..AppConfig::default()
    };
    let daily = Arc::new(ScriptedProviderFactory::new(CallProvider::Daily));
    let app = test_app(config, vec![daily]);

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["daily_configured"], true);
    assert_eq!(json["daily_status"], "connected");
}

#[tokio::test]
async fn test_create_start_and_end_call() {
    let (app, daily) = scripted_app();
    let session_id = create_session(&app).await;

    let (status, json) = send(&app, "GET", &format!("/sessions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["session"]["state"], "IDLE");
    assert_eq!(json["session"]["current_provider"], "daily");

    let (status, json) = send(&app, "POST", &format!("/sessions/{}/start", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["state"], "CONNECTED");
    assert_eq!(daily.joined_rooms(), vec!["https://daily.test/consult-42".to_string()]);

    let (status, json) = send(&app, "GET", &format!("/sessions/{}/connection", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "CONNECTED");
    assert_eq!(json["provider_switches"], 0);

    let (status, json) = send(&app, "DELETE", &format!("/sessions/{}/end", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (_, json) = send(&app, "GET", &format!("/sessions/{}", session_id), None).await;
    assert_eq!(json["session"]["state"], "ENDED");
}

#[tokio::test]
async fn test_permission_error_reports_failure_details() {
    let (app, _daily) = scripted_app();
    let session_id = create_session(&app).await;
    send(&app, "POST", &format!("/sessions/{}/start", session_id), None).await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/sessions/{}/errors", session_id),
        Some(json!({
            "error": { "message": "NotAllowedError: Permission denied by user" },
            "origin": "provider"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "FAILED");
    assert_eq!(json["failure"]["classification"], "PERMISSION_DENIED");
    assert_eq!(json["failure"]["show_manual_retry"], false);

    let (status, json) = send(&app, "GET", "/recovery/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_attempts"], 1);
    assert_eq!(json["attempts_by_classification"]["PERMISSION_DENIED"], 1);
}

#[tokio::test]
async fn test_retry_on_idle_session_is_rejected_softly() {
    let (app, daily) = scripted_app();
    let session_id = create_session(&app).await;

    let (status, json) = send(&app, "POST", &format!("/sessions/{}/retry", session_id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["state"], "IDLE");
    assert_eq!(daily.join_count(), 0);
}

#[tokio::test]
async fn test_unknown_session_returns_not_found() {
    let (app, _daily) = scripted_app();
    let missing = Uuid::new_v4();

    let (status, json) = send(&app, "GET", &format!("/sessions/{}", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Call session not found");

    let (status, _) = send(&app, "POST", &format!("/sessions/{}/start", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", &format!("/sessions/{}/end", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_session_validates_channel() {
    let (app, _daily) = scripted_app();

    let mut body = create_body("audio");
    body["channel_info"]["channel_name"] = json!("  ");
    let (status, json) = send(&app, "POST", "/sessions", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "channel_name is required");

    let mut body = create_body("audio");
    body["preferred_provider"] = json!("agora");
    let (status, _) = send(&app, "POST", "/sessions", Some(body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_provider_health_lists_registered_providers() {
    let daily = Arc::new(ScriptedProviderFactory::new(CallProvider::Daily));
    let agora = Arc::new(ScriptedProviderFactory::new(CallProvider::Agora));
    let app = test_app(AppConfig::default(), vec![daily, agora]);

    let (status, json) = send(&app, "GET", "/providers/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["default_provider"], "daily");
    let providers = json["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 2);
    assert!(providers.iter().all(|p| p["circuit_state"] == "closed"));
}

#[tokio::test]
async fn test_admin_cleanup_removes_ended_sessions() {
    let (app, _daily) = scripted_app();
    let ended = create_session(&app).await;
    let live = create_session(&app).await;
    send(&app, "DELETE", &format!("/sessions/{}/end", ended), None).await;

    let (status, json) = send(&app, "POST", "/admin/cleanup?max_age_secs=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cleaned_sessions"], 1);

    let (status, _) = send(&app, "GET", &format!("/sessions/{}", ended), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", &format!("/sessions/{}", live), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_call_routes_require_bearer_token() {
    let (app, _daily) = scripted_app();

    let (status, json) = send_as(&app, None, "POST", "/sessions", Some(create_body("audio"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Missing authorization header");

    let (status, _) = send_as(&app, Some("wrong-token"), "POST", "/admin/cleanup", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_as(&app, None, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unset_api_token_rejects_every_call_route() {
    let manager = CallStateManager::new(test_recovery_config(), CallProvider::Daily, ProviderRegistry::new(), None);
    let app = call_session_routes(CallSessionState::new(manager, Arc::new(AppConfig::default())));

    let (status, _) = send_as(&app, Some(""), "GET", "/recovery/statistics", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
