// libs/call-session-cell/src/services/recovery.rs
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::models::{
    CallProvider, CallSession, CircuitState, ClassificationResult, ErrorClassification,
    ErrorOrigin, NetworkQuality, ProviderError, ProviderHealthMetrics, ProviderHealthReport,
    RecoveryAttempt, RecoveryContext, RecoveryStatistics, RecoveryStrategy,
};
use crate::services::circuit_breaker::{CircuitBreakerConfig, ProviderCircuit};

/// Tuning for retries, switches, timeouts and the provider circuits
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_reconnection_attempts: u32,
    pub max_provider_switch_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub join_timeout: Duration,
    pub circuit: CircuitBreakerConfig,
    pub max_recovery_log_entries: usize,
    pub session_retention: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_reconnection_attempts: 5,
            max_provider_switch_attempts: 2,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            join_timeout: Duration::from_secs(15),
            circuit: CircuitBreakerConfig::default(),
            max_recovery_log_entries: 1000,
            session_retention: Duration::from_secs(600),
        }
    }
}

impl RecoveryConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_reconnection_attempts: config.max_reconnect_attempts,
            max_provider_switch_attempts: config.max_provider_switches,
            base_delay_ms: config.base_retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
            join_timeout: Duration::from_secs(config.join_timeout_secs),
            circuit: CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold,
                recovery_timeout: Duration::from_secs(config.circuit_recovery_secs),
                ..CircuitBreakerConfig::default()
            },
            session_retention: Duration::from_secs(config.session_retention_secs),
            ..Self::default()
        }
    }
}

const PERMISSION_MARKERS: &[&str] = &[
    "permission",
    "notallowederror",
    "not allowed",
    "not-allowed",
    "denied",
];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "time out", "etimedout"];
const DEVICE_MARKERS: &[&str] = &[
    "device",
    "camera",
    "microphone",
    "notreadableerror",
    "notfounderror",
    "getusermedia",
];
const SERVICE_MARKERS: &[&str] = &[
    "unavailable",
    "service",
    "rate limit",
    "overloaded",
    "maintenance",
];
const CONNECTION_MARKERS: &[&str] = &[
    "connect",
    "network",
    "ice-failed",
    "ice failed",
    "websocket",
    "signaling",
    "socket",
    "room not found",
    "not-found",
];

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

#[derive(Debug, Default)]
struct RecoveryLog {
    entries: VecDeque<RecoveryAttempt>,
    total: u64,
    successful: u64,
    failed: u64,
    successful_duration_ms: u64,
    by_strategy: BTreeMap<String, u64>,
    by_classification: BTreeMap<String, u64>,
}

/// Classifies call failures, picks recovery strategies and tracks
/// per-provider health.
pub struct ErrorRecoveryEngine {
    config: RecoveryConfig,
    providers: RwLock<Vec<CallProvider>>,
    circuits: RwLock<HashMap<CallProvider, ProviderCircuit>>,
    log: RwLock<RecoveryLog>,
}

impl ErrorRecoveryEngine {
    pub fn new(config: RecoveryConfig, providers: Vec<CallProvider>) -> Self {
        let mut ordered = Vec::with_capacity(providers.len());
        for provider in providers {
            if !ordered.contains(&provider) {
                ordered.push(provider);
            }
        }

        let circuits = ordered
            .iter()
            .map(|p| (*p, ProviderCircuit::new(*p, config.circuit.clone())))
            .collect();

        Self {
            config,
            providers: RwLock::new(ordered),
            circuits: RwLock::new(circuits),
            log: RwLock::new(RecoveryLog::default()),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Add a provider to the candidate list (no-op when already known)
    pub async fn register_provider(&self, provider: CallProvider) {
        let mut providers = self.providers.write().await;
        if providers.contains(&provider) {
            return;
        }
        providers.push(provider);
        self.circuits
            .write()
            .await
            .insert(provider, ProviderCircuit::new(provider, self.config.circuit.clone()));
        info!(provider = %provider, "Registered call provider for recovery");
    }

    pub async fn providers(&self) -> Vec<CallProvider> {
        self.providers.read().await.clone()
    }

    // ==========================================================================
    // CLASSIFICATION & STRATEGY
    // ==========================================================================

    pub fn classify_error(&self, error: &ProviderError, context: &RecoveryContext) -> ClassificationResult {
        let haystack = format!(
            "{} {}",
            error.code.as_deref().unwrap_or_default(),
            error.message
        )
        .to_lowercase();

        let classification = if contains_any(&haystack, PERMISSION_MARKERS) {
            ErrorClassification::PermissionDenied
        } else if contains_any(&haystack, TIMEOUT_MARKERS) || matches!(error.status, Some(408 | 504)) {
            ErrorClassification::NetworkTimeout
        } else if contains_any(&haystack, DEVICE_MARKERS) {
            ErrorClassification::DeviceError
        } else if contains_any(&haystack, SERVICE_MARKERS)
            || matches!(error.status, Some(429 | 500..=599))
        {
            ErrorClassification::ServiceUnavailable
        } else if contains_any(&haystack, CONNECTION_MARKERS) || error.status == Some(404) {
            ErrorClassification::ConnectionFailed
        } else if context.origin == ErrorOrigin::Network {
            ErrorClassification::NetworkTimeout
        } else {
            ErrorClassification::Unknown
        };

        let result = ClassificationResult {
            classification,
            fallback_eligible: classification != ErrorClassification::PermissionDenied,
        };

        debug!(
            classification = %result.classification,
            fallback_eligible = result.fallback_eligible,
            origin = ?context.origin,
            "Classified call error: {}", error
        );
        result
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id, provider = %session.current_provider))]
    pub async fn determine_recovery_strategy(
        &self,
        session: &CallSession,
        classification: &ClassificationResult,
        context: &RecoveryContext,
    ) -> RecoveryStrategy {
        if classification.classification == ErrorClassification::PermissionDenied {
            return RecoveryStrategy::EmergencyFallback;
        }

        let can_switch = classification.fallback_eligible && self.alternate_provider(session).await.is_some();
        let can_degrade = session.channel_info.is_video() && !session.graceful_degradation_active;

        let mut strategy = match classification.classification {
            ErrorClassification::NetworkTimeout => RecoveryStrategy::ExponentialBackoff,
            ErrorClassification::ConnectionFailed if can_switch => RecoveryStrategy::ProviderSwitch,
            ErrorClassification::ConnectionFailed => RecoveryStrategy::EmergencyFallback,
            ErrorClassification::DeviceError if can_degrade => RecoveryStrategy::GracefulDegradation,
            _ => RecoveryStrategy::ExponentialBackoff,
        };

        if strategy == RecoveryStrategy::ExponentialBackoff {
            if session.reconnection_attempts >= self.config.max_reconnection_attempts {
                strategy = if can_switch {
                    RecoveryStrategy::ProviderSwitch
                } else {
                    RecoveryStrategy::EmergencyFallback
                };
                warn!(
                    attempts = session.reconnection_attempts,
                    "Reconnection budget exhausted, escalating to {}", strategy
                );
            } else if can_switch
                && self.get_circuit_breaker_state(session.current_provider).await == CircuitState::Open
            {
                strategy = RecoveryStrategy::ProviderSwitch;
            }
        }

        if strategy == RecoveryStrategy::ProviderSwitch {
            if session.provider_switch_attempts >= self.config.max_provider_switch_attempts {
                strategy = RecoveryStrategy::EmergencyFallback;
            } else if context.network_quality == NetworkQuality::Poor && can_degrade {
                // Unknown is also the reading before any report, so only a graded Poor counts
                strategy = RecoveryStrategy::GracefulDegradation;
            }
        }

        info!(
            classification = %classification.classification,
            strategy = %strategy,
            "Determined recovery strategy"
        );
        strategy
    }

    /// Delay in milliseconds before acting on `strategy`.
    /// Backoff doubles per attempt and never exceeds the configured cap.
    pub fn calculate_retry_delay(
        &self,
        strategy: RecoveryStrategy,
        attempt_count: u32,
        base_delay_ms: u64,
        network_quality: NetworkQuality,
    ) -> u64 {
        let cap = self.config.max_delay_ms;
        match strategy {
            RecoveryStrategy::ExponentialBackoff => {
                let factor = 1u64.checked_shl(attempt_count).unwrap_or(u64::MAX);
                base_delay_ms.saturating_mul(factor).min(cap)
            }
            RecoveryStrategy::GracefulDegradation => {
                let delay = if network_quality == NetworkQuality::Poor {
                    base_delay_ms.saturating_mul(2)
                } else {
                    base_delay_ms
                };
                delay.min(cap)
            }
            RecoveryStrategy::ProviderSwitch | RecoveryStrategy::EmergencyFallback => 0,
        }
    }

    // ==========================================================================
    // PROVIDER HEALTH
    // ==========================================================================

    pub async fn get_circuit_breaker_state(&self, provider: CallProvider) -> CircuitState {
        let mut circuits = self.circuits.write().await;
        circuits
            .get_mut(&provider)
            .map(|circuit| circuit.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub async fn update_provider_health(
        &self,
        provider: CallProvider,
        healthy: bool,
        metrics: ProviderHealthMetrics,
    ) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(provider)
            .or_insert_with(|| ProviderCircuit::new(provider, self.config.circuit.clone()));
        circuit.record(healthy, &metrics);
        debug!(provider = %provider, healthy, "Updated provider health");
    }

    pub async fn get_provider_health_report(&self) -> Vec<ProviderHealthReport> {
        let providers = self.providers.read().await.clone();
        let mut circuits = self.circuits.write().await;
        providers
            .iter()
            .filter_map(|provider| circuits.get_mut(provider).map(|c| c.report()))
            .collect()
    }

    /// Best provider outside `exclude` whose circuit is not open.
    /// Ranking: closed before half-open, then success rate, then latency;
    /// ties keep registration order.
    pub async fn get_healthiest_provider(&self, exclude: &[CallProvider]) -> Option<CallProvider> {
        let providers = self.providers.read().await.clone();
        let mut circuits = self.circuits.write().await;

        let mut best: Option<(CallProvider, u8, f64, Option<f64>)> = None;
        for provider in providers {
            if exclude.contains(&provider) {
                continue;
            }
            let Some(circuit) = circuits.get_mut(&provider) else {
                continue;
            };
            let state_rank = match circuit.state() {
                CircuitState::Open => continue,
                CircuitState::Closed => 0u8,
                CircuitState::HalfOpen => 1u8,
            };
            let candidate = (
                provider,
                state_rank,
                circuit.success_rate(),
                circuit.average_latency_ms(),
            );

            let better = match &best {
                None => true,
                Some((_, best_rank, best_rate, best_latency)) => {
                    if state_rank != *best_rank {
                        state_rank < *best_rank
                    } else if (candidate.2 - best_rate).abs() > f64::EPSILON {
                        candidate.2 > *best_rate
                    } else {
                        match (candidate.3, best_latency) {
                            (Some(latency), Some(best_latency)) => latency < *best_latency,
                            _ => false,
                        }
                    }
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        best.map(|(provider, ..)| provider)
    }

    /// Healthy provider other than the current one and those already failed
    pub async fn alternate_provider(&self, session: &CallSession) -> Option<CallProvider> {
        let mut exclude: Vec<CallProvider> = session.failed_providers.iter().copied().collect();
        exclude.push(session.current_provider);
        self.get_healthiest_provider(&exclude).await
    }

    // ==========================================================================
    // RECOVERY AUDIT LOG
    // ==========================================================================

    pub async fn record_recovery_attempt(&self, attempt: RecoveryAttempt) {
        let mut log = self.log.write().await;

        log.total += 1;
        if attempt.success {
            log.successful += 1;
            log.successful_duration_ms = log.successful_duration_ms.saturating_add(attempt.duration_ms);
        } else {
            log.failed += 1;
        }
        *log.by_strategy.entry(attempt.strategy.to_string()).or_insert(0) += 1;
        *log
            .by_classification
            .entry(attempt.classification.to_string())
            .or_insert(0) += 1;

        info!(
            session_id = %attempt.session_id,
            provider = %attempt.provider,
            strategy = %attempt.strategy,
            success = attempt.success,
            duration_ms = attempt.duration_ms,
            "Recorded recovery attempt"
        );

        log.entries.push_back(attempt);
        while log.entries.len() > self.config.max_recovery_log_entries {
            log.entries.pop_front();
        }
    }

    pub async fn get_recovery_statistics(&self) -> RecoveryStatistics {
        let log = self.log.read().await;

        let success_rate = if log.total == 0 {
            0.0
        } else {
            log.successful as f64 / log.total as f64
        };
        let average_recovery_duration_ms = if log.successful == 0 {
            0.0
        } else {
            log.successful_duration_ms as f64 / log.successful as f64
        };

        RecoveryStatistics {
            total_attempts: log.total,
            successful_attempts: log.successful,
            failed_attempts: log.failed,
            success_rate,
            average_recovery_duration_ms,
            attempts_by_strategy: log.by_strategy.clone(),
            attempts_by_classification: log.by_classification.clone(),
        }
    }

    /// Most recent audit entries, newest last
    pub async fn recent_recovery_attempts(&self, limit: usize) -> Vec<RecoveryAttempt> {
        let log = self.log.read().await;
        let skip = log.entries.len().saturating_sub(limit);
        log.entries.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CallType, ChannelInfo, SessionParticipants};
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn engine(providers: Vec<CallProvider>) -> ErrorRecoveryEngine {
        ErrorRecoveryEngine::new(RecoveryConfig::default(), providers)
    }

    fn session(call_type: CallType) -> CallSession {
        CallSession::new(
            ChannelInfo {
                channel_name: "consult".to_string(),
                participants: SessionParticipants {
                    doctor_id: "doc".to_string(),
                    customer_id: "cust".to_string(),
                },
                call_type,
                room_url: None,
            },
            CallProvider::Daily,
            StdHashMap::new(),
        )
    }

    fn classify(engine: &ErrorRecoveryEngine, error: ProviderError) -> ClassificationResult {
        engine.classify_error(&error, &RecoveryContext::default())
    }

    #[test]
    fn test_classification_taxonomy() {
        let engine = engine(vec![CallProvider::Daily]);

        let permission = classify(&engine, ProviderError::new("NotAllowedError: Permission denied"));
        assert_eq!(permission.classification, ErrorClassification::PermissionDenied);
        assert!(!permission.fallback_eligible);

        let timeout = classify(&engine, ProviderError::timeout("join timed out"));
        assert_eq!(timeout.classification, ErrorClassification::NetworkTimeout);
        assert!(timeout.fallback_eligible);

        let device = classify(&engine, ProviderError::new("Could not start camera"));
        assert_eq!(device.classification, ErrorClassification::DeviceError);

        let service = classify(&engine, ProviderError::new("upstream").with_status(503));
        assert_eq!(service.classification, ErrorClassification::ServiceUnavailable);

        let connection = classify(&engine, ProviderError::new("ICE connection failed"));
        assert_eq!(connection.classification, ErrorClassification::ConnectionFailed);

        let unknown = classify(&engine, ProviderError::new("something odd"));
        assert_eq!(unknown.classification, ErrorClassification::Unknown);
    }

    #[test]
    fn test_network_origin_defaults_to_timeout() {
        let engine = engine(vec![CallProvider::Daily]);
        let result = engine.classify_error(
            &ProviderError::new("link lost"),
            &RecoveryContext {
                origin: ErrorOrigin::Network,
                network_quality: NetworkQuality::Poor,
            },
        );
        assert_eq!(result.classification, ErrorClassification::NetworkTimeout);
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let engine = engine(vec![CallProvider::Daily]);
        let delay = |attempt| {
            engine.calculate_retry_delay(
                RecoveryStrategy::ExponentialBackoff,
                attempt,
                1000,
                NetworkQuality::Unknown,
            )
        };

        assert_eq!(delay(0), 1000);
        assert_eq!(delay(1), 2000);
        assert_eq!(delay(4), 16_000);
        assert_eq!(delay(5), 30_000);
        assert_eq!(delay(10), 30_000);
        assert_eq!(delay(200), 30_000);

        let mut previous = 0;
        for attempt in 0..40 {
            let current = delay(attempt);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_non_backoff_delays() {
        let engine = engine(vec![CallProvider::Daily]);
        assert_eq!(
            engine.calculate_retry_delay(RecoveryStrategy::ProviderSwitch, 3, 1000, NetworkQuality::Good),
            0
        );
        assert_eq!(
            engine.calculate_retry_delay(RecoveryStrategy::GracefulDegradation, 0, 1000, NetworkQuality::Poor),
            2000
        );
    }

    #[tokio::test]
    async fn test_strategy_mapping() {
        let engine = engine(vec![CallProvider::Daily, CallProvider::Agora]);
        let session = session(CallType::Audio);
        let ctx = RecoveryContext::default();

        let timeout = classify(&engine, ProviderError::timeout("timeout"));
        assert_eq!(
            engine.determine_recovery_strategy(&session, &timeout, &ctx).await,
            RecoveryStrategy::ExponentialBackoff
        );

        let connection = classify(&engine, ProviderError::new("connection failed"));
        assert_eq!(
            engine.determine_recovery_strategy(&session, &connection, &ctx).await,
            RecoveryStrategy::ProviderSwitch
        );

        let permission = classify(&engine, ProviderError::new("permission denied"));
        assert_eq!(
            engine.determine_recovery_strategy(&session, &permission, &ctx).await,
            RecoveryStrategy::EmergencyFallback
        );
    }

    #[tokio::test]
    async fn test_connection_failure_without_alternate_is_emergency() {
        let engine = engine(vec![CallProvider::Daily]);
        let session = session(CallType::Audio);
        let connection = classify(&engine, ProviderError::new("connection failed"));
        assert_eq!(
            engine
                .determine_recovery_strategy(&session, &connection, &RecoveryContext::default())
                .await,
            RecoveryStrategy::EmergencyFallback
        );
    }

    #[tokio::test]
    async fn test_exhausted_backoff_escalates() {
        let engine = engine(vec![CallProvider::Daily]);
        let mut session = session(CallType::Audio);
        session.reconnection_attempts = 5;
        let timeout = classify(&engine, ProviderError::timeout("timeout"));
        assert_eq!(
            engine
                .determine_recovery_strategy(&session, &timeout, &RecoveryContext::default())
                .await,
            RecoveryStrategy::EmergencyFallback
        );

        engine.register_provider(CallProvider::Agora).await;
        assert_eq!(
            engine
                .determine_recovery_strategy(&session, &timeout, &RecoveryContext::default())
                .await,
            RecoveryStrategy::ProviderSwitch
        );
    }

    #[tokio::test]
    async fn test_device_error_on_video_degrades() {
        let engine = engine(vec![CallProvider::Daily]);
        let session = session(CallType::Video);
        let device = classify(&engine, ProviderError::new("camera unplugged"));
        assert_eq!(
            engine
                .determine_recovery_strategy(&session, &device, &RecoveryContext::default())
                .await,
            RecoveryStrategy::GracefulDegradation
        );
    }

    #[tokio::test]
    async fn test_poor_network_prefers_degradation_over_switch() {
        let engine = engine(vec![CallProvider::Daily, CallProvider::Agora]);
        let session = session(CallType::Video);
        let connection = classify(&engine, ProviderError::new("connection failed"));
        let ctx = RecoveryContext {
            origin: ErrorOrigin::Provider,
            network_quality: NetworkQuality::Poor,
        };
        assert_eq!(
            engine.determine_recovery_strategy(&session, &connection, &ctx).await,
            RecoveryStrategy::GracefulDegradation
        );
    }

    #[tokio::test]
    async fn test_unknown_network_still_switches_provider() {
        let engine = engine(vec![CallProvider::Daily, CallProvider::Agora]);
        let session = session(CallType::Video);
        let connection = classify(&engine, ProviderError::new("connection failed"));
        let ctx = RecoveryContext {
            origin: ErrorOrigin::Provider,
            network_quality: NetworkQuality::Unknown,
        };
        assert_eq!(
            engine.determine_recovery_strategy(&session, &connection, &ctx).await,
            RecoveryStrategy::ProviderSwitch
        );
    }

    #[tokio::test]
    async fn test_open_circuit_triggers_switch_on_backoff() {
        let engine = engine(vec![CallProvider::Daily, CallProvider::Agora]);
        for _ in 0..3 {
            engine
                .update_provider_health(CallProvider::Daily, false, ProviderHealthMetrics::default())
                .await;
        }
        let session = session(CallType::Audio);
        let timeout = classify(&engine, ProviderError::timeout("timeout"));
        assert_eq!(
            engine
                .determine_recovery_strategy(&session, &timeout, &RecoveryContext::default())
                .await,
            RecoveryStrategy::ProviderSwitch
        );
    }

    #[tokio::test]
    async fn test_healthiest_provider_respects_exclusions_and_circuits() {
        let engine = engine(vec![CallProvider::Daily, CallProvider::Agora]);

        // No data: stable registration order
        assert_eq!(engine.get_healthiest_provider(&[]).await, Some(CallProvider::Daily));
        assert_eq!(
            engine.get_healthiest_provider(&[CallProvider::Daily]).await,
            Some(CallProvider::Agora)
        );
        assert_eq!(
            engine
                .get_healthiest_provider(&[CallProvider::Daily, CallProvider::Agora])
                .await,
            None
        );

        engine
            .update_provider_health(CallProvider::Daily, false, ProviderHealthMetrics::default())
            .await;
        assert_eq!(engine.get_healthiest_provider(&[]).await, Some(CallProvider::Agora));

        for _ in 0..2 {
            engine
                .update_provider_health(CallProvider::Daily, false, ProviderHealthMetrics::default())
                .await;
        }
        assert_eq!(
            engine.get_circuit_breaker_state(CallProvider::Daily).await,
            CircuitState::Open
        );
        assert_eq!(
            engine.get_healthiest_provider(&[CallProvider::Agora]).await,
            None
        );
    }

    #[tokio::test]
    async fn test_latency_breaks_ties() {
        let engine = engine(vec![CallProvider::Daily, CallProvider::Agora]);
        engine
            .update_provider_health(
                CallProvider::Daily,
                true,
                ProviderHealthMetrics { latency_ms: Some(300), packet_loss_rate: None },
            )
            .await;
        engine
            .update_provider_health(
                CallProvider::Agora,
                true,
                ProviderHealthMetrics { latency_ms: Some(80), packet_loss_rate: None },
            )
            .await;
        assert_eq!(engine.get_healthiest_provider(&[]).await, Some(CallProvider::Agora));
    }

    #[tokio::test]
    async fn test_recovery_statistics() {
        let engine = ErrorRecoveryEngine::new(
            RecoveryConfig {
                max_recovery_log_entries: 2,
                ..RecoveryConfig::default()
            },
            vec![CallProvider::Daily],
        );
        let attempt = |success, duration_ms| RecoveryAttempt {
            session_id: uuid::Uuid::new_v4(),
            provider: CallProvider::Daily,
            classification: ErrorClassification::NetworkTimeout,
            strategy: RecoveryStrategy::ExponentialBackoff,
            attempt_number: 1,
            success,
            duration_ms,
            timestamp: Utc::now(),
        };

        engine.record_recovery_attempt(attempt(true, 1000)).await;
        engine.record_recovery_attempt(attempt(false, 0)).await;
        engine.record_recovery_attempt(attempt(true, 3000)).await;

        let stats = engine.get_recovery_statistics().await;
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.successful_attempts, 2);
        assert_eq!(stats.failed_attempts, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_recovery_duration_ms - 2000.0).abs() < 1e-9);
        assert_eq!(stats.attempts_by_strategy.get("EXPONENTIAL_BACKOFF"), Some(&3));
        assert_eq!(engine.recent_recovery_attempts(10).await.len(), 2);
    }
}
