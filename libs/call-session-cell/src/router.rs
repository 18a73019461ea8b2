// libs/call-session-cell/src/router.rs
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::handlers::*;
use crate::middleware::auth_middleware;

/// Creates the call session routes
/// Follows the RESTful API design pattern used by other cells
pub fn call_session_routes(state: CallSessionState) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/health", get(call_health_check));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        // Session lifecycle
        .route("/sessions", post(create_call_session))
        .route("/sessions/{session_id}", get(get_call_session))
        .route("/sessions/{session_id}/connection", get(get_connection_info))
        .route("/sessions/{session_id}/start", post(start_call))
        .route("/sessions/{session_id}/retry", post(retry_connection))
        .route("/sessions/{session_id}/switch", post(switch_provider))
        .route("/sessions/{session_id}/errors", post(report_runtime_error))
        .route("/sessions/{session_id}/end", delete(end_call))
        // Recovery observability
        .route("/recovery/statistics", get(get_recovery_statistics))
        .route("/providers/health", get(get_provider_health))
        // Admin endpoints
        .route("/admin/cleanup", post(cleanup_ended_sessions))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
