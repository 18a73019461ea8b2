// libs/call-session-cell/src/services/mod.rs

pub mod circuit_breaker;
pub mod daily;
pub mod listeners;
pub mod manager;
pub mod network;
pub mod provider;
pub mod recovery;
pub mod store;

pub use circuit_breaker::{CircuitBreakerConfig, ProviderCircuit};
pub use daily::{DailyApiClient, DailyProviderAdapter, DailyProviderFactory};
pub use listeners::{ListenerRegistry, Subscription};
pub use manager::CallStateManager;
pub use network::{NetworkMonitor, NetworkQualityMonitor, ProbeHandle};
pub use provider::{
    AdapterConnectionState, ProviderAdapter, ProviderEvent, ProviderFactory, ProviderRegistry,
};
pub use recovery::{ErrorRecoveryEngine, RecoveryConfig};
pub use store::SessionStore;
