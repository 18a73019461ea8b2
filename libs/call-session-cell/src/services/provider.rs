// libs/call-session-cell/src/services/provider.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{CallProvider, ChannelInfo, MediaStats, ProviderError};
use crate::services::listeners::Subscription;

/// Lifecycle of an adapter's connection as reported in `StateChanged`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterConnectionState {
    Idle,
    Joining,
    Joined,
    Left,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    User,
    Environment,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::User => CameraFacing::Environment,
            CameraFacing::Environment => CameraFacing::User,
        }
    }
}

/// Local track state kept by an adapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalMediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub camera: CameraFacing,
}

impl Default for LocalMediaState {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            camera: CameraFacing::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Joined { participants: Vec<String> },
    /// The adapter minted a meeting token for the room it joined
    TokenIssued { token: String },
    ParticipantJoined { participant_id: String },
    ParticipantLeft { participant_id: String },
    Error(ProviderError),
    StateChanged {
        state: AdapterConnectionState,
        media: LocalMediaState,
    },
    QualityUpdated(MediaStats),
}

pub type ProviderEventHandler = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Uniform surface over a calling backend.
/// One adapter instance serves one session; errors are returned raw and
/// classified by the recovery engine.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> CallProvider;

    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Allocate a room for `channel` and return its URL
    async fn create_room(&self, channel: &ChannelInfo) -> Result<String, ProviderError>;

    async fn join(&self, room_url: &str, token: Option<&str>) -> Result<(), ProviderError>;

    async fn leave(&self) -> Result<(), ProviderError>;

    async fn set_local_audio(&self, enabled: bool) -> Result<(), ProviderError>;

    async fn set_local_video(&self, enabled: bool) -> Result<(), ProviderError>;

    async fn flip_camera(&self) -> Result<(), ProviderError>;

    fn subscribe(&self, handler: ProviderEventHandler) -> Subscription;

    async fn get_participants(&self) -> Vec<String>;
}

/// Builds a fresh adapter for each session that joins through a provider
pub trait ProviderFactory: Send + Sync {
    fn provider(&self) -> CallProvider;

    fn create(&self) -> Arc<dyn ProviderAdapter>;
}

/// Factories by provider, remembering registration order
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    order: Vec<CallProvider>,
    factories: HashMap<CallProvider, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory`, replacing any earlier one for the same provider
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        let provider = factory.provider();
        if !self.order.contains(&provider) {
            self.order.push(provider);
        }
        self.factories.insert(provider, factory);
    }

    pub fn with(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn contains(&self, provider: CallProvider) -> bool {
        self.factories.contains_key(&provider)
    }

    pub fn providers(&self) -> Vec<CallProvider> {
        self.order.clone()
    }

    pub fn create(&self, provider: CallProvider) -> Option<Arc<dyn ProviderAdapter>> {
        self.factories.get(&provider).map(|factory| factory.create())
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedProviderFactory;

    #[test]
    fn test_registry_keeps_registration_order() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(ScriptedProviderFactory::new(CallProvider::Agora)))
            .with(Arc::new(ScriptedProviderFactory::new(CallProvider::Daily)))
            .with(Arc::new(ScriptedProviderFactory::new(CallProvider::Agora)));

        assert_eq!(registry.providers(), vec![CallProvider::Agora, CallProvider::Daily]);
        assert!(registry.contains(CallProvider::Daily));
        let adapter = registry.create(CallProvider::Daily);
        assert_eq!(adapter.map(|a| a.provider()), Some(CallProvider::Daily));
    }

    #[test]
    fn test_camera_flip() {
        assert_eq!(CameraFacing::User.flipped(), CameraFacing::Environment);
        assert_eq!(CameraFacing::Environment.flipped(), CameraFacing::User);
    }
}
