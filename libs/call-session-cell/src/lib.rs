// libs/call-session-cell/src/lib.rs
//! # Call Session Cell
//!
//! Reliability layer for doctor/patient teleconsultation calls. It keeps a
//! call alive across network drops, provider outages and device failures by
//! reconnecting, switching providers or degrading to audio-only, and surfaces
//! an actionable failure when nothing else works.
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------+
//! |                  Call Session Cell                    |
//! +-------------------------------------------------------+
//! |  handlers.rs       |  HTTP endpoint handlers          |
//! |  router.rs         |  Route definitions               |
//! |  middleware.rs     |  Bearer token gate               |
//! |  models.rs         |  Sessions, states, DTOs, errors  |
//! |  services/                                            |
//! |    manager.rs      |  Per-session state machines      |
//! |    recovery.rs     |  Classification & strategies     |
//! |    circuit_breaker.rs | Per-provider health gate      |
//! |    store.rs        |  In-memory session records       |
//! |    provider.rs     |  Adapter & factory contracts     |
//! |    daily.rs        |  Daily REST adapter              |
//! |    network.rs      |  Network quality monitor         |
//! |    listeners.rs    |  Callback registry & disposers   |
//! +-------------------------------------------------------+
//! ```
//!
//! ## State machine
//!
//! `IDLE -> CONNECTING -> CONNECTED`, with `RECONNECTING` (backoff) and
//! `SWITCHING_PROVIDER` as recovery states, `FAILED` awaiting a manual retry
//! or switch, and `ENDED` as the terminal state. Triggers that are not valid
//! in the current state are logged and ignored.
//!
//! ## API Endpoints
//!
//! Every route except `/calls/health` requires `Authorization: Bearer
//! <CALL_API_TOKEN>`.
//!
//! - `GET /calls/health` - Provider configuration and health
//! - `POST /calls/sessions` - Create a call session
//! - `GET /calls/sessions/{id}` - Session snapshot
//! - `GET /calls/sessions/{id}/connection` - Duration and provider switches
//! - `POST /calls/sessions/{id}/start` - Start the call
//! - `POST /calls/sessions/{id}/retry` - Manual retry from FAILED
//! - `POST /calls/sessions/{id}/switch` - Manual provider switch
//! - `POST /calls/sessions/{id}/errors` - Report a client-side failure
//! - `DELETE /calls/sessions/{id}/end` - End the call
//! - `GET /calls/recovery/statistics` - Recovery statistics
//! - `GET /calls/providers/health` - Circuit breaker report
//! - `POST /calls/admin/cleanup` - Drop old ended sessions
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use call_session_cell::services::{CallStateManager, DailyProviderFactory, ProviderRegistry, RecoveryConfig};
//! use call_session_cell::models::CallProvider;
//! use shared_config::AppConfig;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_env();
//! let providers = ProviderRegistry::new().with(Arc::new(DailyProviderFactory::new(&config)?));
//! let manager = CallStateManager::new(
//!     RecoveryConfig::from_app_config(&config),
//!     CallProvider::Daily,
//!     providers,
//!     None,
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! - `CALL_API_TOKEN` - Bearer token for the call routes
//! - `DAILY_API_KEY` - Daily REST API key
//! - `DAILY_API_BASE_URL` - API base URL (optional, defaults to production)
//! - `CALL_MAX_RECONNECT_ATTEMPTS`, `CALL_BASE_RETRY_DELAY_MS`,
//!   `CALL_MAX_RETRY_DELAY_MS`, `CALL_JOIN_TIMEOUT_SECS` - Retry tuning

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;
pub mod services;
pub mod test_utils;

// Re-export commonly used types
pub use models::{
    CallProvider, CallSession, CallSessionError, CallState, CallStateChange, CallType,
    ChannelInfo, ErrorClassification, ProviderError, RecoveryStrategy,
};

pub use services::{
    CallStateManager, DailyProviderFactory, ErrorRecoveryEngine, NetworkQualityMonitor,
    ProviderRegistry, RecoveryConfig,
};

pub use handlers::CallSessionState;
pub use router::call_session_routes;
