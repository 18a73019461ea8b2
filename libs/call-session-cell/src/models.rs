// libs/call-session-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type SessionId = Uuid;

// ==============================================================================
// CALL SESSION DOMAIN MODELS
// ==============================================================================

/// Calling backends known to the reliability layer.
/// Only `Daily` ships a concrete adapter; `Agora` keeps the multi-provider
/// fallback path addressable for deployments that register a second factory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallProvider {
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "agora")]
    Agora,
}

impl CallProvider {
    pub const ALL: [CallProvider; 2] = [CallProvider::Daily, CallProvider::Agora];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallProvider::Daily => "daily",
            CallProvider::Agora => "agora",
        }
    }

    /// Metadata key holding the room allocated by this provider
    pub fn room_metadata_key(&self) -> String {
        format!("{}_room_url", self.as_str())
    }

    /// Metadata key holding a meeting token minted by this provider
    pub fn token_metadata_key(&self) -> String {
        format!("{}_token", self.as_str())
    }
}

impl fmt::Display for CallProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallProvider {
    type Err = CallSessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(CallProvider::Daily),
            "agora" => Ok(CallProvider::Agora),
            other => Err(CallSessionError::InvalidArgument {
                message: format!("Unknown call provider: {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "video")]
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionParticipants {
    pub doctor_id: String,
    pub customer_id: String,
}

/// Channel description supplied at session creation.
/// Everything except `room_url` is fixed for the session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_name: String,
    pub participants: SessionParticipants,
    pub call_type: CallType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_url: Option<String>,
}

impl ChannelInfo {
    pub fn validate(&self) -> Result<(), CallSessionError> {
        if self.channel_name.trim().is_empty() {
            return Err(CallSessionError::InvalidArgument {
                message: "channel_name is required".to_string(),
            });
        }
        if self.participants.doctor_id.trim().is_empty() {
            return Err(CallSessionError::InvalidArgument {
                message: "participants.doctor_id is required".to_string(),
            });
        }
        if self.participants.customer_id.trim().is_empty() {
            return Err(CallSessionError::InvalidArgument {
                message: "participants.customer_id is required".to_string(),
            });
        }
        if let Some(url) = &self.room_url {
            if url.trim().is_empty() {
                return Err(CallSessionError::InvalidArgument {
                    message: "room_url must not be blank when provided".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn is_video(&self) -> bool {
        self.call_type == CallType::Video
    }
}

// ==============================================================================
// STATE MACHINE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    SwitchingProvider,
    Failed,
    Ended,
}

/// Inputs that can move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTrigger {
    StartCall,
    AdapterJoined,
    /// Adapter error or network drop resolved to a backoff retry
    BackoffScheduled,
    /// Adapter error or exhausted retries resolved to a provider switch
    ProviderSwitchScheduled,
    /// A switch candidate was chosen and its adapter is about to join
    SwitchCandidateSelected,
    /// No eligible strategy remains (permission denied, emergency fallback)
    RecoveryExhausted,
    RetryConnection,
    ManualSwitch,
    EndCall,
}

impl CallState {
    /// Resolve the next state for `trigger`, or `None` when the trigger is
    /// not valid from the current state.
    pub fn next(self, trigger: CallTrigger) -> Option<CallState> {
        use CallState::*;
        use CallTrigger::*;

        match (self, trigger) {
            (Ended, _) => None,
            (_, EndCall) => Some(Ended),

            (Idle | Failed, StartCall) => Some(Connecting),

            (Connecting | Reconnecting | SwitchingProvider, AdapterJoined) => Some(Connected),

            (Connecting | Connected | Reconnecting, BackoffScheduled) => Some(Reconnecting),

            (Connecting | Connected | Reconnecting | SwitchingProvider, ProviderSwitchScheduled) => {
                Some(SwitchingProvider)
            }
            (SwitchingProvider, SwitchCandidateSelected) => Some(Connecting),

            (Connecting | Connected | Reconnecting | SwitchingProvider, RecoveryExhausted) => {
                Some(Failed)
            }

            (Failed, RetryConnection) => Some(Connecting),
            (Connected | Reconnecting | Failed, ManualSwitch) => Some(SwitchingProvider),

            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == CallState::Ended
    }

    /// States the UI renders as "recovering" rather than as an error
    pub fn is_recovering(self) -> bool {
        matches!(self, CallState::Reconnecting | CallState::SwitchingProvider)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "IDLE",
            CallState::Connecting => "CONNECTING",
            CallState::Connected => "CONNECTED",
            CallState::Reconnecting => "RECONNECTING",
            CallState::SwitchingProvider => "SWITCHING_PROVIDER",
            CallState::Failed => "FAILED",
            CallState::Ended => "ENDED",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// QUALITY MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NetworkQuality {
    #[serde(rename = "excellent")]
    Excellent,
    #[serde(rename = "good")]
    Good,
    #[serde(rename = "poor")]
    Poor,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MediaQuality {
    #[serde(rename = "excellent")]
    Excellent,
    #[serde(rename = "good")]
    Good,
    #[serde(rename = "fair")]
    Fair,
    #[serde(rename = "poor")]
    Poor,
    #[serde(rename = "disabled")]
    Disabled,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

/// Connection quality counters.
/// Written only from provider-event and network-monitor handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QualityMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>, // e.g., "1280x720"
    pub audio_quality: MediaQuality,
    pub video_quality: MediaQuality,
    pub network_quality: NetworkQuality,
    pub disconnection_count: u32,
    pub total_reconnection_time_ms: u64,
}

/// Partial stats pushed by an adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MediaStats {
    pub latency_ms: Option<u64>,
    pub packet_loss_rate: Option<f64>,
    pub bitrate_kbps: Option<u64>,
    pub resolution: Option<String>,
    pub audio_quality: Option<MediaQuality>,
    pub video_quality: Option<MediaQuality>,
}

// ==============================================================================
// ERROR CLASSIFICATION & RECOVERY MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClassification {
    NetworkTimeout,
    ConnectionFailed,
    PermissionDenied,
    DeviceError,
    ServiceUnavailable,
    Unknown,
}

impl ErrorClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorClassification::ConnectionFailed => "CONNECTION_FAILED",
            ErrorClassification::PermissionDenied => "PERMISSION_DENIED",
            ErrorClassification::DeviceError => "DEVICE_ERROR",
            ErrorClassification::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorClassification::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    ExponentialBackoff,
    ProviderSwitch,
    GracefulDegradation,
    EmergencyFallback,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::ExponentialBackoff => "EXPONENTIAL_BACKOFF",
            RecoveryStrategy::ProviderSwitch => "PROVIDER_SWITCH",
            RecoveryStrategy::GracefulDegradation => "GRACEFUL_DEGRADATION",
            RecoveryStrategy::EmergencyFallback => "EMERGENCY_FALLBACK",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationResult {
    pub classification: ErrorClassification,
    pub fallback_eligible: bool,
}

/// Where a runtime failure was observed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ErrorOrigin {
    #[serde(rename = "join")]
    Join,
    #[default]
    #[serde(rename = "provider")]
    Provider,
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "manual")]
    Manual,
}

/// Raw failure reported by an adapter, the network layer or a caller.
/// Classified exactly once by the recovery engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_code("timeout")
    }
}

/// Inputs the engine needs beyond the session snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryContext {
    pub origin: ErrorOrigin,
    pub network_quality: NetworkQuality,
}

/// Surfaced to the UI while a session sits in `FAILED`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureDetails {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ErrorClassification>,
    pub show_manual_retry: bool,
    pub can_switch_provider: bool,
}

// ==============================================================================
// CALL SESSION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub session_id: SessionId,
    pub channel_info: ChannelInfo,
    pub current_provider: CallProvider,
    pub preferred_provider: CallProvider,
    pub state: CallState,
    pub participants: BTreeSet<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_connection: Option<DateTime<Utc>>,

    pub reconnection_attempts: u32,
    pub provider_switch_attempts: u32,
    pub total_provider_switches: u32,

    pub quality_metrics: QualityMetrics,
    pub metadata: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_provider_switch: Option<DateTime<Utc>>,
    pub failed_providers: BTreeSet<CallProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_classification: Option<ErrorClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recovery_strategy: Option<RecoveryStrategy>,
    pub recovery_attempts: u32,
    pub graceful_degradation_active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(
        channel_info: ChannelInfo,
        preferred_provider: CallProvider,
        metadata: HashMap<String, String>,
    ) -> Self {
        let mut metadata = metadata;
        if let Some(url) = &channel_info.room_url {
            metadata
                .entry(preferred_provider.room_metadata_key())
                .or_insert_with(|| url.clone());
        }

        let video_quality = if channel_info.is_video() {
            MediaQuality::Unknown
        } else {
            MediaQuality::Disabled
        };

        Self {
            session_id: Uuid::new_v4(),
            channel_info,
            current_provider: preferred_provider,
            preferred_provider,
            state: CallState::Idle,
            participants: BTreeSet::new(),
            start_time: None,
            last_successful_connection: None,
            reconnection_attempts: 0,
            provider_switch_attempts: 0,
            total_provider_switches: 0,
            quality_metrics: QualityMetrics {
                video_quality,
                ..QualityMetrics::default()
            },
            metadata,
            last_provider_switch: None,
            failed_providers: BTreeSet::new(),
            last_failure_reason: None,
            error_classification: None,
            last_recovery_strategy: None,
            recovery_attempts: 0,
            graceful_degradation_active: false,
            failure_details: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Room this session should join on `provider`, if one was allocated
    pub fn room_for(&self, provider: CallProvider) -> Option<&str> {
        self.metadata
            .get(&provider.room_metadata_key())
            .map(String::as_str)
    }

    /// Token to join `provider` with: one the provider minted for this
    /// session, else the caller-supplied `token`
    pub fn token_for(&self, provider: CallProvider) -> Option<&str> {
        self.metadata
            .get(&provider.token_metadata_key())
            .or_else(|| self.metadata.get("token"))
            .map(String::as_str)
    }

    /// Seconds since the call was started, zero before `start_call`
    pub fn duration_secs(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        self.start_time
            .map(|start| (end - start).num_seconds().max(0))
            .unwrap_or(0)
    }
}

/// Emitted to listeners after every applied transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStateChange {
    pub session_id: SessionId,
    /// Per-session, strictly increasing
    pub sequence: u64,
    pub previous_state: CallState,
    pub current_state: CallState,
    pub reason: String,
    pub current_provider: CallProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetails>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub session_id: SessionId,
    pub state: CallState,
    pub current_provider: CallProvider,
    pub duration_secs: i64,
    pub provider_switches: u32,
    pub participant_count: usize,
}

// ==============================================================================
// PROVIDER HEALTH & RECOVERY STATISTICS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CircuitState {
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "half-open")]
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderHealthMetrics {
    pub latency_ms: Option<u64>,
    pub packet_loss_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderHealthReport {
    pub provider: CallProvider,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub total_reports: usize,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryAttempt {
    pub session_id: SessionId,
    pub provider: CallProvider,
    pub classification: ErrorClassification,
    pub strategy: RecoveryStrategy,
    pub attempt_number: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecoveryStatistics {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub success_rate: f64,
    pub average_recovery_duration_ms: f64,
    pub attempts_by_strategy: BTreeMap<String, u64>,
    pub attempts_by_classification: BTreeMap<String, u64>,
}

// ==============================================================================
// API REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCallSessionRequest {
    pub channel_info: ChannelInfo,
    pub preferred_provider: Option<CallProvider>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCallSessionResponse {
    pub success: bool,
    pub session_id: SessionId,
    pub session: CallSession,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StartCallRequest {
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Serialize)]
pub struct CallActionResponse {
    pub success: bool,
    pub session_id: SessionId,
    pub state: CallState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetails>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeErrorRequest {
    pub error: ProviderError,
    #[serde(default)]
    pub origin: ErrorOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CleanupRequest {
    pub max_age_secs: Option<u64>,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CallSessionError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Call session not found")]
    SessionNotFound,

    #[error("Call session has ended")]
    SessionEnded,

    #[error("No adapter registered for provider {provider}")]
    ProviderUnavailable { provider: CallProvider },

    #[error("Call provider {provider} not configured")]
    ProviderNotConfigured { provider: CallProvider },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<anyhow::Error> for CallSessionError {
    fn from(err: anyhow::Error) -> Self {
        CallSessionError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for CallSessionError {
    fn from(err: reqwest::Error) -> Self {
        CallSessionError::Provider {
            message: err.to_string(),
        }
    }
}

impl From<ProviderError> for CallSessionError {
    fn from(err: ProviderError) -> Self {
        CallSessionError::Provider {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(call_type: CallType) -> ChannelInfo {
        ChannelInfo {
            channel_name: "consult-42".to_string(),
            participants: SessionParticipants {
                doctor_id: "doc-1".to_string(),
                customer_id: "cust-1".to_string(),
            },
            call_type,
            room_url: None,
        }
    }

    #[test]
    fn test_transition_table_happy_path() {
        let state = CallState::Idle;
        let state = state.next(CallTrigger::StartCall).unwrap();
        assert_eq!(state, CallState::Connecting);
        let state = state.next(CallTrigger::AdapterJoined).unwrap();
        assert_eq!(state, CallState::Connected);
        assert_eq!(state.next(CallTrigger::EndCall), Some(CallState::Ended));
    }

    #[test]
    fn test_invalid_triggers_are_rejected() {
        assert_eq!(CallState::Idle.next(CallTrigger::AdapterJoined), None);
        assert_eq!(CallState::Idle.next(CallTrigger::RetryConnection), None);
        assert_eq!(CallState::Connected.next(CallTrigger::RetryConnection), None);
        assert_eq!(CallState::Connecting.next(CallTrigger::ManualSwitch), None);
        assert_eq!(CallState::Connected.next(CallTrigger::StartCall), None);
        assert_eq!(CallState::Ended.next(CallTrigger::EndCall), None);
        assert_eq!(CallState::Ended.next(CallTrigger::StartCall), None);
    }

    #[test]
    fn test_recovery_transitions() {
        assert_eq!(
            CallState::Connecting.next(CallTrigger::BackoffScheduled),
            Some(CallState::Reconnecting)
        );
        assert_eq!(
            CallState::Reconnecting.next(CallTrigger::ProviderSwitchScheduled),
            Some(CallState::SwitchingProvider)
        );
        assert_eq!(
            CallState::SwitchingProvider.next(CallTrigger::ProviderSwitchScheduled),
            Some(CallState::SwitchingProvider)
        );
        assert_eq!(
            CallState::SwitchingProvider.next(CallTrigger::SwitchCandidateSelected),
            Some(CallState::Connecting)
        );
        assert_eq!(
            CallState::Failed.next(CallTrigger::RetryConnection),
            Some(CallState::Connecting)
        );
        assert_eq!(
            CallState::Failed.next(CallTrigger::ManualSwitch),
            Some(CallState::SwitchingProvider)
        );
        assert_eq!(CallState::Idle.next(CallTrigger::RecoveryExhausted), None);
    }

    #[test]
    fn test_channel_info_validation() {
        assert!(channel(CallType::Video).validate().is_ok());

        let mut missing = channel(CallType::Audio);
        missing.participants.customer_id = "  ".to_string();
        assert!(matches!(
            missing.validate(),
            Err(CallSessionError::InvalidArgument { .. })
        ));

        let mut blank_room = channel(CallType::Audio);
        blank_room.room_url = Some(String::new());
        assert!(blank_room.validate().is_err());
    }

    #[test]
    fn test_new_session_seeds_room_for_preferred_provider() {
        let mut info = channel(CallType::Audio);
        info.room_url = Some("https://clinic.daily.co/consult-42".to_string());

        let session = CallSession::new(info, CallProvider::Daily, HashMap::new());
        assert_eq!(session.state, CallState::Idle);
        assert_eq!(
            session.room_for(CallProvider::Daily),
            Some("https://clinic.daily.co/consult-42")
        );
        assert_eq!(session.room_for(CallProvider::Agora), None);
        assert_eq!(session.quality_metrics.video_quality, MediaQuality::Disabled);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&CallState::SwitchingProvider).unwrap(),
            "\"SWITCHING_PROVIDER\""
        );
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half-open\""
        );
        assert_eq!("Daily".parse::<CallProvider>().unwrap(), CallProvider::Daily);
        assert!("zoom".parse::<CallProvider>().is_err());
    }
}
