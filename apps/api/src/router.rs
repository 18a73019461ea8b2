use axum::{
    Router,
    routing::get,
};

use call_session_cell::router::call_session_routes;
use call_session_cell::CallSessionState;

pub fn create_router(state: CallSessionState) -> Router {
    Router::new()
        .route("/", get(|| async { "Teleconsultation call API is running!" }))
        .nest("/calls", call_session_routes(state))
}
