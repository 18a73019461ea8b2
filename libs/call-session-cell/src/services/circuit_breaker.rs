// libs/call-session-cell/src/services/circuit_breaker.rs
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::models::{CallProvider, CircuitState, ProviderHealthMetrics, ProviderHealthReport};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a probe (half-open)
    pub recovery_timeout: Duration,
    /// Number of recent reports kept for scoring
    pub window_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            window_size: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct HealthSample {
    healthy: bool,
    latency_ms: Option<u64>,
}

/// Health gate for one provider, fed by `update_provider_health` reports
#[derive(Debug)]
pub struct ProviderCircuit {
    provider: CallProvider,
    state: CircuitState,
    window: VecDeque<HealthSample>,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_updated: Option<DateTime<Utc>>,
    config: CircuitBreakerConfig,
}

impl ProviderCircuit {
    pub fn new(provider: CallProvider, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            state: CircuitState::Closed,
            window: VecDeque::with_capacity(config.window_size),
            consecutive_failures: 0,
            opened_at: None,
            last_updated: None,
            config,
        }
    }

    /// Current state, promoting `Open` to `HalfOpen` once the recovery
    /// timeout has elapsed.
    pub fn state(&mut self) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    info!(provider = %self.provider, "Circuit breaker moved to HALF-OPEN");
                    self.state = CircuitState::HalfOpen;
                }
            }
        }
        self.state
    }

    pub fn allows_requests(&mut self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record(&mut self, healthy: bool, metrics: &ProviderHealthMetrics) {
        let current = self.state();

        self.window.push_back(HealthSample {
            healthy,
            latency_ms: metrics.latency_ms,
        });
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
        self.last_updated = Some(Utc::now());

        if healthy {
            self.consecutive_failures = 0;
            if current == CircuitState::HalfOpen {
                self.state = CircuitState::Closed;
                self.opened_at = None;
                info!(provider = %self.provider, "Circuit breaker reset to CLOSED state");
            }
            return;
        }

        self.consecutive_failures += 1;
        match current {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed if self.consecutive_failures >= self.config.failure_threshold => {
                self.open()
            }
            _ => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        warn!(
            provider = %self.provider,
            consecutive_failures = self.consecutive_failures,
            "Circuit breaker opened"
        );
    }

    /// Share of healthy reports in the window; 1.0 with no data
    pub fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let healthy = self.window.iter().filter(|s| s.healthy).count();
        healthy as f64 / self.window.len() as f64
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        let latencies: Vec<u64> = self.window.iter().filter_map(|s| s.latency_ms).collect();
        if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
        }
    }

    pub fn has_data(&self) -> bool {
        !self.window.is_empty()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn report(&mut self) -> ProviderHealthReport {
        ProviderHealthReport {
            provider: self.provider,
            circuit_state: self.state(),
            consecutive_failures: self.consecutive_failures,
            total_reports: self.window.len(),
            success_rate: self.success_rate(),
            average_latency_ms: self.average_latency_ms(),
            last_updated: self.last_updated,
        }
    }
}
