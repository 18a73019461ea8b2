// libs/call-session-cell/src/middleware.rs
use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use shared_models::error::AppError;

use crate::handlers::CallSessionState;

/// Require `Authorization: Bearer <CALL_API_TOKEN>` on protected call routes.
/// An unset token rejects everything.
pub async fn auth_middleware(
    State(state): State<CallSessionState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_value = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    let token = auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?;

    if !state.config.is_api_token_configured() || token != state.config.call_api_token {
        debug!("Rejected call API request with invalid token");
        return Err(AppError::Auth("Invalid API token".to_string()));
    }

    Ok(next.run(request).await)
}
