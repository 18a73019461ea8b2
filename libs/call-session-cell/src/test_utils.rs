// libs/call-session-cell/src/test_utils.rs
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::models::{
    CallProvider, CallType, ChannelInfo, ProviderError, SessionParticipants,
};
use crate::services::listeners::{ListenerRegistry, Subscription};
use crate::services::provider::{
    AdapterConnectionState, LocalMediaState, ProviderAdapter, ProviderEvent, ProviderEventHandler,
    ProviderFactory,
};
use crate::services::recovery::RecoveryConfig;

/// What the next `join` on a scripted adapter does
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Succeed,
    Fail(ProviderError),
    /// Never resolves; exercises the join timeout
    Hang,
}

#[derive(Debug, Default)]
pub struct ScriptCalls {
    pub initializations: usize,
    pub rooms_created: Vec<String>,
    pub joins: Vec<String>,
    pub join_tokens: Vec<Option<String>>,
    pub leaves: usize,
    pub video_toggles: Vec<bool>,
    pub audio_toggles: Vec<bool>,
    pub camera_flips: usize,
}

#[derive(Default)]
struct Script {
    join_outcomes: VecDeque<JoinOutcome>,
    room_error: Option<ProviderError>,
    participants: BTreeSet<String>,
    calls: ScriptCalls,
}

/// Provider adapter driven by a shared script instead of a real backend
pub struct ScriptedProviderAdapter {
    provider: CallProvider,
    script: Arc<Mutex<Script>>,
    media: Mutex<LocalMediaState>,
    listeners: ListenerRegistry<ProviderEvent>,
}

impl ScriptedProviderAdapter {
    /// Push an event to every subscribed handler
    pub fn emit(&self, event: ProviderEvent) {
        self.listeners.emit(&event);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn media_state(&self) -> LocalMediaState {
        *self.media.lock()
    }

    fn emit_state(&self, state: AdapterConnectionState) {
        let media = *self.media.lock();
        self.emit(ProviderEvent::StateChanged { state, media });
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProviderAdapter {
    fn provider(&self) -> CallProvider {
        self.provider
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.script.lock().calls.initializations += 1;
        Ok(())
    }

    async fn create_room(&self, channel: &ChannelInfo) -> Result<String, ProviderError> {
        let mut script = self.script.lock();
        if let Some(error) = script.room_error.clone() {
            return Err(error);
        }
        let url = format!("https://{}.test/{}", self.provider, channel.channel_name);
        script.calls.rooms_created.push(url.clone());
        Ok(url)
    }

    async fn join(&self, room_url: &str, token: Option<&str>) -> Result<(), ProviderError> {
        let outcome = {
            let mut script = self.script.lock();
            script.calls.joins.push(room_url.to_string());
            script.calls.join_tokens.push(token.map(str::to_string));
            script.join_outcomes.pop_front().unwrap_or(JoinOutcome::Succeed)
        };

        match outcome {
            JoinOutcome::Succeed => {
                let participants: Vec<String> =
                    self.script.lock().participants.iter().cloned().collect();
                self.emit(ProviderEvent::Joined { participants });
                Ok(())
            }
            JoinOutcome::Fail(error) => Err(error),
            JoinOutcome::Hang => std::future::pending().await,
        }
    }

    async fn leave(&self) -> Result<(), ProviderError> {
        self.script.lock().calls.leaves += 1;
        self.emit_state(AdapterConnectionState::Left);
        Ok(())
    }

    async fn set_local_audio(&self, enabled: bool) -> Result<(), ProviderError> {
        self.script.lock().calls.audio_toggles.push(enabled);
        self.media.lock().audio_enabled = enabled;
        Ok(())
    }

    async fn set_local_video(&self, enabled: bool) -> Result<(), ProviderError> {
        self.script.lock().calls.video_toggles.push(enabled);
        self.media.lock().video_enabled = enabled;
        Ok(())
    }

    async fn flip_camera(&self) -> Result<(), ProviderError> {
        self.script.lock().calls.camera_flips += 1;
        let mut media = self.media.lock();
        media.camera = media.camera.flipped();
        Ok(())
    }

    fn subscribe(&self, handler: ProviderEventHandler) -> Subscription {
        self.listeners.add(move |event| handler(event))
    }

    async fn get_participants(&self) -> Vec<String> {
        self.script.lock().participants.iter().cloned().collect()
    }
}

/// Factory handing out scripted adapters that share one script
pub struct ScriptedProviderFactory {
    provider: CallProvider,
    script: Arc<Mutex<Script>>,
    created: Mutex<Vec<Arc<ScriptedProviderAdapter>>>,
}

impl ScriptedProviderFactory {
    pub fn new(provider: CallProvider) -> Self {
        Self {
            provider,
            script: Arc::new(Mutex::new(Script::default())),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for upcoming joins; an empty queue succeeds
    pub fn push_join_outcomes(&self, outcomes: impl IntoIterator<Item = JoinOutcome>) {
        self.script.lock().join_outcomes.extend(outcomes);
    }

    pub fn fail_joins(&self, times: usize, error: ProviderError) {
        self.push_join_outcomes(std::iter::repeat(JoinOutcome::Fail(error)).take(times));
    }

    pub fn fail_room_creation(&self, error: ProviderError) {
        self.script.lock().room_error = Some(error);
    }

    pub fn set_participants(&self, participants: &[&str]) {
        self.script.lock().participants = participants.iter().map(|p| p.to_string()).collect();
    }

    pub fn join_count(&self) -> usize {
        self.script.lock().calls.joins.len()
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        self.script.lock().calls.joins.clone()
    }

    pub fn join_tokens(&self) -> Vec<Option<String>> {
        self.script.lock().calls.join_tokens.clone()
    }

    pub fn rooms_created(&self) -> Vec<String> {
        self.script.lock().calls.rooms_created.clone()
    }

    pub fn leave_count(&self) -> usize {
        self.script.lock().calls.leaves
    }

    pub fn video_toggles(&self) -> Vec<bool> {
        self.script.lock().calls.video_toggles.clone()
    }

    pub fn camera_flips(&self) -> usize {
        self.script.lock().calls.camera_flips
    }

    pub fn adapters(&self) -> Vec<Arc<ScriptedProviderAdapter>> {
        self.created.lock().clone()
    }

    pub fn last_adapter(&self) -> Option<Arc<ScriptedProviderAdapter>> {
        self.created.lock().last().cloned()
    }
}

impl ProviderFactory for ScriptedProviderFactory {
    fn provider(&self) -> CallProvider {
        self.provider
    }

    fn create(&self) -> Arc<dyn ProviderAdapter> {
        let adapter = Arc::new(ScriptedProviderAdapter {
            provider: self.provider,
            script: Arc::clone(&self.script),
            media: Mutex::new(LocalMediaState::default()),
            listeners: ListenerRegistry::new(),
        });
        self.created.lock().push(Arc::clone(&adapter));
        adapter
    }
}

pub fn test_channel(call_type: CallType) -> ChannelInfo {
    ChannelInfo {
        channel_name: "consult-test".to_string(),
        participants: SessionParticipants {
            doctor_id: "doctor-1".to_string(),
            customer_id: "customer-1".to_string(),
        },
        call_type,
        room_url: None,
    }
}

pub fn test_metadata() -> HashMap<String, String> {
    HashMap::from([("token".to_string(), "test-token".to_string())])
}

/// Recovery settings matching production defaults
pub fn test_recovery_config() -> RecoveryConfig {
    RecoveryConfig::default()
}
