use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_DAILY_API_BASE_URL: &str = "https://api.daily.co/v1";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub daily_api_key: String,
    pub daily_api_base_url: String,
    pub preferred_call_provider: String,
    pub max_reconnect_attempts: u32,
    pub max_provider_switches: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub join_timeout_secs: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_secs: u64,
    pub session_retention_secs: u64,
    pub network_probe_url: Option<String>,
    pub network_probe_interval_secs: u64,
    pub api_port: u16,
    /// Bearer token required on every call route except `/health`
    pub call_api_token: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            daily_api_key: String::new(),
            daily_api_base_url: DEFAULT_DAILY_API_BASE_URL.to_string(),
            preferred_call_provider: "daily".to_string(),
            max_reconnect_attempts: 5,
            max_provider_switches: 2,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            join_timeout_secs: 15,
            circuit_failure_threshold: 3,
            circuit_recovery_secs: 30,
            session_retention_secs: 600,
            network_probe_url: None,
            network_probe_interval_secs: 10,
            api_port: 3000,
            call_api_token: String::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            daily_api_key: env::var("DAILY_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("DAILY_API_KEY not set, using empty value");
                    String::new()
                }),
            daily_api_base_url: env::var("DAILY_API_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("DAILY_API_BASE_URL not set, using default");
                    defaults.daily_api_base_url.clone()
                }),
            preferred_call_provider: env::var("CALL_PREFERRED_PROVIDER")
                .unwrap_or_else(|_| defaults.preferred_call_provider.clone()),
            max_reconnect_attempts: env_or("CALL_MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts),
            max_provider_switches: env_or("CALL_MAX_PROVIDER_SWITCHES", defaults.max_provider_switches),
            base_retry_delay_ms: env_or("CALL_BASE_RETRY_DELAY_MS", defaults.base_retry_delay_ms),
            max_retry_delay_ms: env_or("CALL_MAX_RETRY_DELAY_MS", defaults.max_retry_delay_ms),
            join_timeout_secs: env_or("CALL_JOIN_TIMEOUT_SECS", defaults.join_timeout_secs),
            circuit_failure_threshold: env_or("CALL_CIRCUIT_FAILURE_THRESHOLD", defaults.circuit_failure_threshold),
            circuit_recovery_secs: env_or("CALL_CIRCUIT_RECOVERY_SECS", defaults.circuit_recovery_secs),
            session_retention_secs: env_or("CALL_SESSION_RETENTION_SECS", defaults.session_retention_secs),
            network_probe_url: env::var("NETWORK_PROBE_URL").ok().filter(|url| !url.is_empty()),
            network_probe_interval_secs: env_or("NETWORK_PROBE_INTERVAL_SECS", defaults.network_probe_interval_secs),
            api_port: env_or("API_PORT", defaults.api_port),
            call_api_token: env::var("CALL_API_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("CALL_API_TOKEN not set, call routes will reject every request");
                    String::new()
                }),
        };

        if !config.is_daily_configured() {
            warn!("Daily call provider not configured - missing environment variables");
        }

        config
    }

    pub fn is_api_token_configured(&self) -> bool {
        !self.call_api_token.is_empty()
    }

    pub fn is_daily_configured(&self) -> bool {
        !self.daily_api_key.is_empty() && !self.daily_api_base_url.is_empty()
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("{} has invalid value '{}', using default", key, raw);
        default
    })
}
