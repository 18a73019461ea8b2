// libs/call-session-cell/src/handlers.rs
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{
    CallActionResponse, CallSessionError, CleanupRequest, CreateCallSessionRequest,
    CreateCallSessionResponse, RuntimeErrorRequest, StartCallRequest,
};
use crate::services::{CallStateManager, DailyApiClient};

/// Shared state for the call-session routes
#[derive(Clone)]
pub struct CallSessionState {
    pub manager: CallStateManager,
    pub config: Arc<AppConfig>,
    pub daily: Option<DailyApiClient>,
}

impl CallSessionState {
    pub fn new(manager: CallStateManager, config: Arc<AppConfig>) -> Self {
        let daily = DailyApiClient::new(&config).ok();
        Self {
            manager,
            config,
            daily,
        }
    }
}

fn map_call_error(e: CallSessionError) -> AppError {
    match e {
        CallSessionError::InvalidArgument { message } => AppError::BadRequest(message),
        CallSessionError::SessionNotFound => AppError::NotFound("Call session not found".to_string()),
        CallSessionError::SessionEnded => AppError::Gone("Call session has ended".to_string()),
        CallSessionError::ProviderUnavailable { .. } | CallSessionError::ProviderNotConfigured { .. } => {
            AppError::ServiceUnavailable(e.to_string())
        }
        CallSessionError::Provider { message } => AppError::ExternalService(message),
        CallSessionError::Internal { message } => AppError::Internal(message),
    }
}

async fn action_response(
    state: &CallSessionState,
    session_id: Uuid,
    success: bool,
    message: &str,
) -> Result<Json<Value>, AppError> {
    let session = state
        .manager
        .get_session(session_id)
        .await
        .ok_or_else(|| AppError::NotFound("Call session not found".to_string()))?;

    let response = CallActionResponse {
        success,
        session_id,
        state: session.state,
        failure: session.failure_details,
        message: message.to_string(),
    };
    Ok(Json(json!(response)))
}

// ==============================================================================
// CALL SESSION HANDLERS
// ==============================================================================

/// Create a call session in IDLE
#[axum::debug_handler]
pub async fn create_call_session(
    State(state): State<CallSessionState>,
    Json(request): Json<CreateCallSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let session_id = state
        .manager
        .create_session(request.channel_info, request.preferred_provider, request.metadata)
        .await
        .map_err(map_call_error)?;

    let session = state
        .manager
        .get_session(session_id)
        .await
        .ok_or_else(|| AppError::Internal("Created session missing from store".to_string()))?;

    Ok(Json(json!(CreateCallSessionResponse {
        success: true,
        session_id,
        session,
        message: "Call session created".to_string(),
    })))
}

#[axum::debug_handler]
pub async fn get_call_session(
    State(state): State<CallSessionState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .manager
        .get_session(session_id)
        .await
        .ok_or_else(|| AppError::NotFound("Call session not found".to_string()))?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

#[axum::debug_handler]
pub async fn get_connection_info(
    State(state): State<CallSessionState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let info = state
        .manager
        .get_connection_info(session_id)
        .await
        .ok_or_else(|| AppError::NotFound("Call session not found".to_string()))?;

    Ok(Json(json!(info)))
}

/// Start the call; `?attempt=n` seeds the reconnection counter
#[axum::debug_handler]
pub async fn start_call(
    State(state): State<CallSessionState>,
    Path(session_id): Path<Uuid>,
    Query(request): Query<StartCallRequest>,
) -> Result<Json<Value>, AppError> {
    let connected = state
        .manager
        .start_call(session_id, request.attempt)
        .await
        .map_err(map_call_error)?;

    let message = if connected { "Call connected" } else { "Call not connected" };
    action_response(&state, session_id, connected, message).await
}

#[axum::debug_handler]
pub async fn retry_connection(
    State(state): State<CallSessionState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let connected = state
        .manager
        .retry_connection(session_id)
        .await
        .map_err(map_call_error)?;

    let message = if connected { "Call reconnected" } else { "Retry did not reconnect the call" };
    action_response(&state, session_id, connected, message).await
}

#[axum::debug_handler]
pub async fn switch_provider(
    State(state): State<CallSessionState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let connected = state
        .manager
        .switch_provider(session_id)
        .await
        .map_err(map_call_error)?;

    let message = if connected { "Call connected on new provider" } else { "Provider switch did not connect" };
    action_response(&state, session_id, connected, message).await
}

/// Report a client-side runtime failure for classification and recovery
#[axum::debug_handler]
pub async fn report_runtime_error(
    State(state): State<CallSessionState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<RuntimeErrorRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .manager
        .handle_runtime_error(session_id, request.error, request.origin)
        .await
        .map_err(map_call_error)?;

    action_response(&state, session_id, true, "Error reported").await
}

#[axum::debug_handler]
pub async fn end_call(
    State(state): State<CallSessionState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state
        .manager
        .end_call(session_id)
        .await
        .map_err(|e| match e {
            CallSessionError::SessionNotFound => {
                AppError::NotFound("Call session not found".to_string())
            }
            _ => AppError::Internal(e.to_string()),
        })?;

    let info = state.manager.get_connection_info(session_id).await;

    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "duration_secs": info.as_ref().map(|i| i.duration_secs).unwrap_or(0),
        "provider_switches": info.as_ref().map(|i| i.provider_switches).unwrap_or(0),
        "message": "Call ended"
    })))
}

// ==============================================================================
// RECOVERY & PROVIDER HEALTH HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_recovery_statistics(
    State(state): State<CallSessionState>,
) -> Result<Json<Value>, AppError> {
    let statistics = state.manager.get_recovery_statistics().await;
    Ok(Json(json!(statistics)))
}

#[axum::debug_handler]
pub async fn get_provider_health(
    State(state): State<CallSessionState>,
) -> Result<Json<Value>, AppError> {
    let providers = state.manager.get_provider_health_report().await;
    Ok(Json(json!({
        "providers": providers,
        "default_provider": state.manager.default_provider()
    })))
}

// ==============================================================================
// HEALTH & ADMIN HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn call_health_check(
    State(state): State<CallSessionState>,
) -> Result<Json<Value>, AppError> {
    let active_sessions = state.manager.active_session_count().await;
    let providers = state.manager.providers();

    let Some(daily) = &state.daily else {
        return Ok(Json(json!({
            "status": if providers.is_empty() { "not_configured" } else { "healthy" },
            "daily_configured": false,
            "providers": providers,
            "active_sessions": active_sessions,
            "message": "Daily call provider not configured"
        })));
    };

    let daily_healthy = daily.health_check().await.unwrap_or(false);

    Ok(Json(json!({
        "status": if daily_healthy { "healthy" } else { "unhealthy" },
        "daily_configured": true,
        "daily_status": if daily_healthy { "connected" } else { "error" },
        "providers": providers,
        "active_sessions": active_sessions,
        "message": if daily_healthy {
            "Call session system is operational"
        } else {
            "Call session system has connectivity issues"
        }
    })))
}

/// Admin: drop ended sessions older than `max_age_secs`
#[axum::debug_handler]
pub async fn cleanup_ended_sessions(
    State(state): State<CallSessionState>,
    Query(request): Query<CleanupRequest>,
) -> Result<Json<Value>, AppError> {
    let max_age = request
        .max_age_secs
        .unwrap_or(state.config.session_retention_secs);

    let cleaned_count = state
        .manager
        .cleanup_ended_sessions(Duration::from_secs(max_age))
        .await;

    Ok(Json(json!({
        "success": true,
        "cleaned_sessions": cleaned_count,
        "message": format!("Cleaned up {} ended sessions", cleaned_count)
    })))
}
