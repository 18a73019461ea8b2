// libs/call-session-cell/src/services/manager.rs
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::models::{
    CallProvider, CallSession, CallSessionError, CallState, CallStateChange, CallTrigger,
    ChannelInfo, ClassificationResult, ConnectionInfo, ErrorClassification, ErrorOrigin,
    FailureDetails, MediaQuality, NetworkQuality, ProviderError, ProviderHealthMetrics,
    ProviderHealthReport, RecoveryAttempt, RecoveryContext, RecoveryStatistics, RecoveryStrategy,
    SessionId,
};
use crate::services::listeners::{ListenerRegistry, Subscription};
use crate::services::network::NetworkMonitor;
use crate::services::provider::{
    AdapterConnectionState, ProviderAdapter, ProviderEvent, ProviderRegistry,
};
use crate::services::recovery::{ErrorRecoveryEngine, RecoveryConfig};
use crate::services::store::SessionStore;

type Reply<T> = oneshot::Sender<Result<T, CallSessionError>>;

#[derive(Debug, Clone, Copy)]
enum MediaAction {
    Audio(bool),
    Video(bool),
    FlipCamera,
}

/// Everything that can touch a session goes through its queue
enum Command {
    Start { attempt: u32, reply: Reply<bool> },
    RuntimeError {
        error: ProviderError,
        origin: ErrorOrigin,
        reply: Reply<()>,
    },
    Retry { reply: Reply<bool> },
    Switch { reply: Reply<bool> },
    Media { action: MediaAction, reply: Reply<()> },
    Provider { event: ProviderEvent, adapter_epoch: u64 },
    Network(NetworkQuality),
    BackoffElapsed { timer_epoch: u64 },
    End { reply: oneshot::Sender<()> },
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    cancel: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

struct ManagerInner {
    config: RecoveryConfig,
    default_provider: CallProvider,
    store: SessionStore,
    engine: Arc<ErrorRecoveryEngine>,
    providers: ProviderRegistry,
    network: Option<Arc<dyn NetworkMonitor>>,
    listeners: ListenerRegistry<CallStateChange>,
}

/// Owns every call session's lifecycle.
///
/// Each session gets a worker task fed by a command queue, so adapter
/// callbacks, network readings, timers and API calls are applied one at a
/// time and listeners observe transitions in order. Sessions run
/// independently of each other.
///
/// Workers only hold weak handles to their own queues. Dropping the last
/// clone of the manager closes every queue, and each worker then releases
/// its adapter and exits.
#[derive(Clone)]
pub struct CallStateManager {
    inner: Arc<ManagerInner>,
    workers: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
}

impl CallStateManager {
    pub fn new(
        config: RecoveryConfig,
        default_provider: CallProvider,
        providers: ProviderRegistry,
        network: Option<Arc<dyn NetworkMonitor>>,
    ) -> Self {
        let engine = Arc::new(ErrorRecoveryEngine::new(config.clone(), providers.providers()));

        info!(
            providers = ?providers.providers(),
            %default_provider,
            "Call state manager initialized"
        );

        Self {
            inner: Arc::new(ManagerInner {
                config,
                default_provider,
                store: SessionStore::new(),
                engine,
                providers,
                network,
                listeners: ListenerRegistry::new(),
            }),
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn engine(&self) -> Arc<ErrorRecoveryEngine> {
        Arc::clone(&self.inner.engine)
    }

    pub fn providers(&self) -> Vec<CallProvider> {
        self.inner.providers.providers()
    }

    pub fn default_provider(&self) -> CallProvider {
        self.inner.default_provider
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    // ==========================================================================
    // SESSION LIFECYCLE
    // ==========================================================================

    #[instrument(skip(self, channel_info, metadata), fields(channel = %channel_info.channel_name))]
    pub async fn create_session(
        &self,
        channel_info: ChannelInfo,
        preferred_provider: Option<CallProvider>,
        metadata: HashMap<String, String>,
    ) -> Result<SessionId, CallSessionError> {
        channel_info.validate()?;

        let provider = preferred_provider.unwrap_or(self.inner.default_provider);
        if !self.inner.providers.contains(provider) {
            return Err(CallSessionError::ProviderUnavailable { provider });
        }

        let session = CallSession::new(channel_info, provider, metadata);
        let session_id = session.session_id;
        self.inner.store.insert(session).await;
        self.spawn_worker(session_id);

        info!(%session_id, %provider, "Created call session");
        Ok(session_id)
    }

    /// Join the session's provider. Returns whether the call is connected
    /// once the attempt settles.
    pub async fn start_call(&self, session_id: SessionId, attempt: u32) -> Result<bool, CallSessionError> {
        self.request(session_id, false, |reply| Command::Start { attempt, reply })
            .await
    }

    pub async fn handle_runtime_error(
        &self,
        session_id: SessionId,
        error: ProviderError,
        origin: ErrorOrigin,
    ) -> Result<(), CallSessionError> {
        self.request(session_id, (), |reply| Command::RuntimeError { error, origin, reply })
            .await
    }

    /// Manual retry from `FAILED`
    pub async fn retry_connection(&self, session_id: SessionId) -> Result<bool, CallSessionError> {
        self.request(session_id, false, |reply| Command::Retry { reply })
            .await
    }

    /// Manual provider switch from `CONNECTED`, `RECONNECTING` or `FAILED`
    pub async fn switch_provider(&self, session_id: SessionId) -> Result<bool, CallSessionError> {
        self.request(session_id, false, |reply| Command::Switch { reply })
            .await
    }

    /// Move the session to `ENDED`, cancelling its timer and releasing the
    /// adapter. Ending an ended session is a no-op.
    #[instrument(skip(self))]
    pub async fn end_call(&self, session_id: SessionId) -> Result<(), CallSessionError> {
        let handle = self.workers.lock().remove(&session_id);

        let Some(handle) = handle else {
            return match self.inner.store.get(session_id).await {
                Some(_) => {
                    debug!(%session_id, "Call session already ended");
                    Ok(())
                }
                None => Err(CallSessionError::SessionNotFound),
            };
        };

        handle.cancel.send_replace(true);

        let (reply, done) = oneshot::channel();
        let delivered = handle.commands.send(Command::End { reply }).is_ok();
        if !delivered || done.await.is_err() {
            warn!(%session_id, "Session worker stopped before end, marking session ended");
            self.inner
                .store
                .update(session_id, |session| {
                    if !session.state.is_terminal() {
                        session.state = CallState::Ended;
                        session.ended_at = Some(Utc::now());
                    }
                })
                .await?;
        }

        info!(%session_id, "Call session ended");
        Ok(())
    }

    /// End every live session
    pub async fn shutdown(&self) {
        let session_ids: Vec<SessionId> = self.workers.lock().keys().copied().collect();
        info!("Shutting down {} call sessions", session_ids.len());
        for session_id in session_ids {
            if let Err(e) = self.end_call(session_id).await {
                warn!(%session_id, "Failed to end call session during shutdown: {}", e);
            }
        }
    }

    // ==========================================================================
    // MEDIA CONTROLS
    // ==========================================================================

    pub async fn set_local_audio(&self, session_id: SessionId, enabled: bool) -> Result<(), CallSessionError> {
        self.media(session_id, MediaAction::Audio(enabled)).await
    }

    pub async fn set_local_video(&self, session_id: SessionId, enabled: bool) -> Result<(), CallSessionError> {
        self.media(session_id, MediaAction::Video(enabled)).await
    }

    pub async fn flip_camera(&self, session_id: SessionId) -> Result<(), CallSessionError> {
        self.media(session_id, MediaAction::FlipCamera).await
    }

    async fn media(&self, session_id: SessionId, action: MediaAction) -> Result<(), CallSessionError> {
        let sender = self.sender(session_id);
        let Some(sender) = sender else {
            return Err(self.missing_session_error(session_id).await);
        };
        let (reply, response) = oneshot::channel();
        sender
            .send(Command::Media { action, reply })
            .map_err(|_| CallSessionError::SessionEnded)?;
        response.await.map_err(|_| CallSessionError::SessionEnded)?
    }

    // ==========================================================================
    // OBSERVATION
    // ==========================================================================

    /// Register a state-change callback; dispose the handle to unregister
    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CallStateChange) + Send + Sync + 'static,
    {
        self.inner.listeners.add(callback)
    }

    pub async fn get_session(&self, session_id: SessionId) -> Option<CallSession> {
        self.inner.store.get(session_id).await
    }

    pub async fn get_connection_info(&self, session_id: SessionId) -> Option<ConnectionInfo> {
        self.inner.store.get(session_id).await.map(|session| ConnectionInfo {
            session_id,
            state: session.state,
            current_provider: session.current_provider,
            duration_secs: session.duration_secs(),
            provider_switches: session.total_provider_switches,
            participant_count: session.participants.len(),
        })
    }

    pub async fn get_recovery_statistics(&self) -> RecoveryStatistics {
        self.inner.engine.get_recovery_statistics().await
    }

    pub async fn get_provider_health_report(&self) -> Vec<ProviderHealthReport> {
        self.inner.engine.get_provider_health_report().await
    }

    pub async fn active_session_count(&self) -> usize {
        self.inner.store.count_active().await
    }

    /// Remove ended sessions older than `max_age`
    pub async fn cleanup_ended_sessions(&self, max_age: Duration) -> usize {
        self.inner.store.purge_ended(max_age).await.len()
    }

    // ==========================================================================
    // QUEUE PLUMBING
    // ==========================================================================

    fn spawn_worker(&self, session_id: SessionId) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (cancel, cancelled) = watch::channel(false);

        let (network_subscription, network_quality) = match &self.inner.network {
            Some(monitor) => {
                let sender = commands.downgrade();
                let subscription = monitor.add_listener(Arc::new(move |quality: &NetworkQuality| {
                    if let Some(sender) = sender.upgrade() {
                        let _ = sender.send(Command::Network(*quality));
                    }
                }));
                (Some(subscription), monitor.current_quality())
            }
            None => (None, NetworkQuality::Unknown),
        };

        let worker = SessionWorker {
            inner: Arc::clone(&self.inner),
            session_id,
            commands: commands.downgrade(),
            cancelled,
            adapter: None,
            adapter_epoch: 0,
            timer: None,
            timer_epoch: 0,
            sequence: 0,
            pending_recovery: None,
            outage_started: None,
            network_subscription,
            initial_network_quality: network_quality,
        };

        let task = tokio::spawn(worker.run(receiver));

        self.workers.lock().insert(
            session_id,
            SessionHandle {
                commands,
                cancel,
                _task: task,
            },
        );
    }

    fn sender(&self, session_id: SessionId) -> Option<mpsc::UnboundedSender<Command>> {
        self.workers
            .lock()
            .get(&session_id)
            .map(|handle| handle.commands.clone())
    }

    async fn missing_session_error(&self, session_id: SessionId) -> CallSessionError {
        match self.inner.store.get(session_id).await {
            Some(_) => CallSessionError::SessionEnded,
            None => CallSessionError::SessionNotFound,
        }
    }

    /// Send a command and wait for its reply. Commands aimed at an ended
    /// session resolve to `ended` instead of an error.
    async fn request<T, F>(&self, session_id: SessionId, ended: T, make: F) -> Result<T, CallSessionError>
    where
        F: FnOnce(Reply<T>) -> Command,
    {
        let sender = self.sender(session_id);
        let Some(sender) = sender else {
            return match self.missing_session_error(session_id).await {
                CallSessionError::SessionEnded => {
                    debug!(%session_id, "Ignoring command for ended session");
                    Ok(ended)
                }
                other => Err(other),
            };
        };

        let (reply, response) = oneshot::channel();
        if sender.send(make(reply)).is_err() {
            return Ok(ended);
        }
        match response.await {
            Ok(result) => result,
            Err(_) => Ok(ended),
        }
    }
}

// ==============================================================================
// SESSION WORKER
// ==============================================================================

struct ActiveAdapter {
    provider: CallProvider,
    adapter: Arc<dyn ProviderAdapter>,
    subscription: Subscription,
}

struct PendingRecovery {
    provider: CallProvider,
    classification: ErrorClassification,
    strategy: RecoveryStrategy,
    attempt_number: u32,
    started: Instant,
}

enum Step {
    Join,
    Switch,
    Done,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Failures that say something about the provider rather than the device
/// or the user
fn counts_against_provider(classification: ErrorClassification) -> bool {
    matches!(
        classification,
        ErrorClassification::NetworkTimeout
            | ErrorClassification::ConnectionFailed
            | ErrorClassification::ServiceUnavailable
    )
}

/// Single writer for one session
struct SessionWorker {
    inner: Arc<ManagerInner>,
    session_id: SessionId,
    commands: mpsc::WeakUnboundedSender<Command>,
    cancelled: watch::Receiver<bool>,
    adapter: Option<ActiveAdapter>,
    adapter_epoch: u64,
    timer: Option<JoinHandle<()>>,
    timer_epoch: u64,
    sequence: u64,
    pending_recovery: Option<PendingRecovery>,
    outage_started: Option<Instant>,
    network_subscription: Option<Subscription>,
    initial_network_quality: NetworkQuality,
}

impl SessionWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(session_id = %self.session_id, "Session worker started");

        if self.initial_network_quality != NetworkQuality::Unknown {
            self.network_changed(self.initial_network_quality).await;
        }

        let mut ended = false;
        while let Some(command) = commands.recv().await {
            if let ControlFlow::Break(()) = self.handle(command).await {
                ended = true;
                break;
            }
        }

        if !ended {
            warn!(session_id = %self.session_id, "Call state manager dropped, releasing session");
            self.abandon().await;
        }

        debug!(session_id = %self.session_id, "Session worker stopped");
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        if let Command::End { reply } = command {
            self.finish().await;
            let _ = reply.send(());
            return ControlFlow::Break(());
        }

        if self.is_cancelled() {
            self.reject(command);
            return ControlFlow::Continue(());
        }

        match command {
            Command::Start { attempt, reply } => {
                let result = self.start(attempt).await;
                let _ = reply.send(result);
            }
            Command::RuntimeError { error, origin, reply } => {
                let result = self.runtime_error(error, origin).await;
                let _ = reply.send(result);
            }
            Command::Retry { reply } => {
                let result = self.retry().await;
                let _ = reply.send(result);
            }
            Command::Switch { reply } => {
                let result = self.manual_switch().await;
                let _ = reply.send(result);
            }
            Command::Media { action, reply } => {
                let result = self.media(action).await;
                let _ = reply.send(result);
            }
            Command::Provider { event, adapter_epoch } => {
                if let Err(e) = self.provider_event(event, adapter_epoch).await {
                    error!(session_id = %self.session_id, "Failed to apply provider event: {}", e);
                }
            }
            Command::Network(quality) => self.network_changed(quality).await,
            Command::BackoffElapsed { timer_epoch } => self.backoff_elapsed(timer_epoch).await,
            Command::End { .. } => {}
        }

        ControlFlow::Continue(())
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn reject(&self, command: Command) {
        debug!(session_id = %self.session_id, "Session is ending, dropping command");
        match command {
            Command::Start { reply, .. } | Command::Retry { reply } | Command::Switch { reply } => {
                let _ = reply.send(Ok(false));
            }
            Command::RuntimeError { reply, .. } => {
                let _ = reply.send(Ok(()));
            }
            Command::Media { reply, .. } => {
                let _ = reply.send(Err(CallSessionError::SessionEnded));
            }
            Command::Provider { .. }
            | Command::Network(_)
            | Command::BackoffElapsed { .. }
            | Command::End { .. } => {}
        }
    }

    async fn session(&self) -> Result<CallSession, CallSessionError> {
        self.inner
            .store
            .get(self.session_id)
            .await
            .ok_or(CallSessionError::SessionNotFound)
    }

    async fn is_connected(&self) -> bool {
        matches!(
            self.inner.store.get(self.session_id).await,
            Some(session) if session.state == CallState::Connected
        )
    }

    /// Apply `trigger` through the transition table and notify listeners.
    /// Returns `false` (state untouched) when the trigger is not valid.
    async fn transition<F>(
        &mut self,
        trigger: CallTrigger,
        reason: impl Into<String>,
        mutate: F,
    ) -> Result<bool, CallSessionError>
    where
        F: FnOnce(&mut CallSession),
    {
        let reason = reason.into();
        let applied = self
            .inner
            .store
            .update(self.session_id, |session| {
                let previous = session.state;
                let next = previous.next(trigger)?;
                session.state = next;
                mutate(session);
                if next == CallState::Ended {
                    session.ended_at = Some(Utc::now());
                }
                Some((
                    previous,
                    next,
                    session.current_provider,
                    session.failure_details.clone(),
                ))
            })
            .await?;

        let Some((previous_state, current_state, current_provider, failure)) = applied else {
            let state = self.session().await.map(|s| s.state).ok();
            debug!(
                session_id = %self.session_id,
                ?trigger,
                ?state,
                "Ignoring trigger not valid in current state"
            );
            return Ok(false);
        };

        self.sequence += 1;
        info!(
            session_id = %self.session_id,
            from = %previous_state,
            to = %current_state,
            provider = %current_provider,
            "{}", reason
        );

        let change = CallStateChange {
            session_id: self.session_id,
            sequence: self.sequence,
            previous_state,
            current_state,
            reason,
            current_provider,
            failure,
            timestamp: Utc::now(),
        };
        self.inner.listeners.emit(&change);
        Ok(true)
    }

    async fn drive(&mut self, mut step: Step) {
        loop {
            let next = match step {
                Step::Join => self.join_current().await,
                Step::Switch => self.perform_switch().await,
                Step::Done => return,
            };
            step = match next {
                Ok(step) => step,
                Err(e) => {
                    error!(session_id = %self.session_id, "Call session step failed: {}", e);
                    return;
                }
            };
        }
    }

    // ==========================================================================
    // COMMANDS
    // ==========================================================================

    async fn start(&mut self, attempt: u32) -> Result<bool, CallSessionError> {
        let seeded_attempts = attempt.min(self.inner.config.max_reconnection_attempts);
        let applied = self
            .transition(CallTrigger::StartCall, "Call start requested", |session| {
                session.reconnection_attempts = seeded_attempts;
                session.failure_details = None;
            })
            .await?;
        if !applied {
            return Ok(false);
        }

        self.drive(Step::Join).await;
        Ok(self.is_connected().await)
    }

    async fn retry(&mut self) -> Result<bool, CallSessionError> {
        let applied = self
            .transition(CallTrigger::RetryConnection, "Manual retry requested", |session| {
                session.failure_details = None;
            })
            .await?;
        if !applied {
            return Ok(false);
        }

        self.drive(Step::Join).await;
        Ok(self.is_connected().await)
    }

    async fn manual_switch(&mut self) -> Result<bool, CallSessionError> {
        let applied = self
            .transition(CallTrigger::ManualSwitch, "Provider switch requested", |session| {
                let current = session.current_provider;
                session.failed_providers.insert(current);
                session.failure_details = None;
            })
            .await?;
        if !applied {
            return Ok(false);
        }

        self.cancel_timer();
        if self.outage_started.is_none() {
            self.outage_started = Some(Instant::now());
        }
        self.drive(Step::Switch).await;
        Ok(self.is_connected().await)
    }

    async fn runtime_error(&mut self, error: ProviderError, origin: ErrorOrigin) -> Result<(), CallSessionError> {
        let step = self.recover(error, origin).await?;
        self.drive(step).await;
        Ok(())
    }

    async fn media(&mut self, action: MediaAction) -> Result<(), CallSessionError> {
        let Some(active) = &self.adapter else {
            return Err(CallSessionError::InvalidArgument {
                message: "No active call connection".to_string(),
            });
        };
        let adapter = Arc::clone(&active.adapter);

        match action {
            MediaAction::Audio(enabled) => {
                adapter.set_local_audio(enabled).await?;
                self.inner
                    .store
                    .update(self.session_id, |session| {
                        session.quality_metrics.audio_quality = if enabled {
                            MediaQuality::Unknown
                        } else {
                            MediaQuality::Disabled
                        };
                    })
                    .await?;
            }
            MediaAction::Video(enabled) => {
                let session = self.session().await?;
                if enabled && !session.channel_info.is_video() {
                    return Err(CallSessionError::InvalidArgument {
                        message: "Video cannot be enabled on an audio call".to_string(),
                    });
                }
                adapter.set_local_video(enabled).await?;
                self.inner
                    .store
                    .update(self.session_id, |session| {
                        session.quality_metrics.video_quality = if enabled {
                            MediaQuality::Unknown
                        } else {
                            MediaQuality::Disabled
                        };
                    })
                    .await?;
            }
            MediaAction::FlipCamera => adapter.flip_camera().await?,
        }

        debug!(session_id = %self.session_id, ?action, "Applied media control");
        Ok(())
    }

    async fn provider_event(&mut self, event: ProviderEvent, adapter_epoch: u64) -> Result<(), CallSessionError> {
        if adapter_epoch != self.adapter_epoch {
            debug!(session_id = %self.session_id, "Dropping event from released adapter");
            return Ok(());
        }

        match event {
            ProviderEvent::Joined { participants } => {
                self.inner
                    .store
                    .update(self.session_id, |session| session.participants.extend(participants))
                    .await?;
            }
            ProviderEvent::TokenIssued { token } => {
                let Some(provider) = self.adapter.as_ref().map(|active| active.provider) else {
                    return Ok(());
                };
                debug!(session_id = %self.session_id, %provider, "Stored meeting token");
                self.inner
                    .store
                    .update(self.session_id, |session| {
                        session.metadata.insert(provider.token_metadata_key(), token);
                    })
                    .await?;
            }
            ProviderEvent::ParticipantJoined { participant_id } => {
                info!(session_id = %self.session_id, %participant_id, "Participant joined");
                self.inner
                    .store
                    .update(self.session_id, |session| {
                        session.participants.insert(participant_id);
                    })
                    .await?;
            }
            ProviderEvent::ParticipantLeft { participant_id } => {
                info!(session_id = %self.session_id, %participant_id, "Participant left");
                self.inner
                    .store
                    .update(self.session_id, |session| {
                        session.participants.remove(&participant_id);
                    })
                    .await?;
            }
            ProviderEvent::Error(error) => {
                // Join failures come back through `join`; only live calls recover here
                if self.session().await?.state == CallState::Connected {
                    let step = self.recover(error, ErrorOrigin::Provider).await?;
                    self.drive(step).await;
                }
            }
            ProviderEvent::StateChanged { state, .. } => {
                let dropped = matches!(state, AdapterConnectionState::Left | AdapterConnectionState::Error);
                if dropped && self.session().await?.state == CallState::Connected {
                    let error = ProviderError::new(format!("Call dropped by {}", self.current_provider_name()));
                    let step = self.recover(error, ErrorOrigin::Network).await?;
                    self.drive(step).await;
                } else {
                    debug!(session_id = %self.session_id, ?state, "Adapter state changed");
                }
            }
            ProviderEvent::QualityUpdated(stats) => {
                self.inner
                    .store
                    .update(self.session_id, |session| {
                        let metrics = &mut session.quality_metrics;
                        if stats.latency_ms.is_some() {
                            metrics.last_latency_ms = stats.latency_ms;
                        }
                        if stats.packet_loss_rate.is_some() {
                            metrics.packet_loss_rate = stats.packet_loss_rate;
                        }
                        if stats.bitrate_kbps.is_some() {
                            metrics.bitrate_kbps = stats.bitrate_kbps;
                        }
                        if stats.resolution.is_some() {
                            metrics.resolution = stats.resolution.clone();
                        }
                        if let Some(audio) = stats.audio_quality {
                            metrics.audio_quality = audio;
                        }
                        if let Some(video) = stats.video_quality {
                            if !session.graceful_degradation_active {
                                metrics.video_quality = video;
                            }
                        }
                    })
                    .await?;
            }
        }
        Ok(())
    }

    fn current_provider_name(&self) -> &'static str {
        self.adapter
            .as_ref()
            .map(|active| active.provider.as_str())
            .unwrap_or("provider")
    }

    async fn network_changed(&mut self, quality: NetworkQuality) {
        let result = self
            .inner
            .store
            .update(self.session_id, |session| {
                session.quality_metrics.network_quality = quality;
            })
            .await;
        match result {
            Ok(()) => debug!(session_id = %self.session_id, ?quality, "Network quality updated"),
            Err(e) => warn!(session_id = %self.session_id, "Failed to record network quality: {}", e),
        }
    }

    async fn backoff_elapsed(&mut self, timer_epoch: u64) {
        if timer_epoch != self.timer_epoch {
            debug!(session_id = %self.session_id, "Ignoring superseded retry timer");
            return;
        }
        self.timer = None;

        match self.session().await {
            Ok(session) if session.state == CallState::Reconnecting => {
                info!(
                    session_id = %self.session_id,
                    attempt = session.reconnection_attempts,
                    "Retrying call connection"
                );
                self.drive(Step::Join).await;
            }
            Ok(session) => {
                debug!(session_id = %self.session_id, state = %session.state, "Retry timer fired outside RECONNECTING");
            }
            Err(e) => warn!(session_id = %self.session_id, "Retry timer fired for missing session: {}", e),
        }
    }

    /// Tear down without a transition once the manager is gone
    async fn abandon(&mut self) {
        self.cancel_timer();
        self.release_adapter().await;
        if let Some(mut subscription) = self.network_subscription.take() {
            subscription.dispose();
        }
        self.pending_recovery = None;
    }

    /// Tear down on `end_call`: timer, adapter, network listener, then ENDED
    async fn finish(&mut self) {
        self.cancel_timer();
        self.release_adapter().await;
        if let Some(mut subscription) = self.network_subscription.take() {
            subscription.dispose();
        }
        self.pending_recovery = None;

        if let Err(e) = self.transition(CallTrigger::EndCall, "Call ended", |_| {}).await {
            warn!(session_id = %self.session_id, "Failed to mark session ended: {}", e);
        }
    }

    // ==========================================================================
    // JOIN / SWITCH
    // ==========================================================================

    async fn join_current(&mut self) -> Result<Step, CallSessionError> {
        if self.is_cancelled() {
            return Ok(Step::Done);
        }

        let session = self.session().await?;
        let provider = session.current_provider;

        let adapter = match self.ensure_adapter(provider).await {
            Ok(adapter) => adapter,
            Err(error) => return self.recover(error, ErrorOrigin::Join).await,
        };

        let room_url = match session.room_for(provider) {
            Some(url) => url.to_string(),
            None => match adapter.create_room(&session.channel_info).await {
                Ok(url) => {
                    self.remember_room(provider, &url).await?;
                    url
                }
                Err(error) => return self.recover(error, ErrorOrigin::Join).await,
            },
        };
        let token = session.token_for(provider).map(str::to_string);

        debug!(session_id = %self.session_id, %provider, %room_url, "Joining call room");

        let join_timeout = self.inner.config.join_timeout;
        let started = Instant::now();
        let mut cancelled = self.cancelled.clone();

        let outcome = tokio::select! {
            _ = cancelled.wait_for(|cancelled| *cancelled) => return Ok(Step::Done),
            outcome = timeout(join_timeout, adapter.join(&room_url, token.as_deref())) => outcome,
        };

        match outcome {
            Ok(Ok(())) => {
                self.on_joined(provider, adapter, started.elapsed()).await?;
                Ok(Step::Done)
            }
            Ok(Err(error)) => self.recover(error, ErrorOrigin::Join).await,
            Err(_) => {
                let error = ProviderError::timeout(format!(
                    "Joining {} timed out after {}s",
                    provider,
                    join_timeout.as_secs()
                ));
                self.recover(error, ErrorOrigin::Join).await
            }
        }
    }

    async fn ensure_adapter(&mut self, provider: CallProvider) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        if let Some(active) = &self.adapter {
            if active.provider == provider {
                return Ok(Arc::clone(&active.adapter));
            }
        }
        self.release_adapter().await;

        let adapter = self.inner.providers.create(provider).ok_or_else(|| {
            ProviderError::new(format!("No adapter registered for {}", provider))
                .with_code("service_unavailable")
        })?;
        adapter.initialize().await?;

        self.adapter_epoch += 1;
        let adapter_epoch = self.adapter_epoch;
        let commands = self.commands.clone();
        let subscription = adapter.subscribe(Arc::new(move |event: &ProviderEvent| {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Provider {
                    event: event.clone(),
                    adapter_epoch,
                });
            }
        }));

        self.adapter = Some(ActiveAdapter {
            provider,
            adapter: Arc::clone(&adapter),
            subscription,
        });
        Ok(adapter)
    }

    /// Unsubscribe first so our own leave is not seen as a drop
    async fn release_adapter(&mut self) {
        if let Some(mut active) = self.adapter.take() {
            active.subscription.dispose();
            self.adapter_epoch += 1;
            if let Err(e) = active.adapter.leave().await {
                warn!(
                    session_id = %self.session_id,
                    provider = %active.provider,
                    "Failed to leave provider cleanly: {}", e
                );
            }
        }
    }

    async fn remember_room(&self, provider: CallProvider, url: &str) -> Result<(), CallSessionError> {
        let url = url.to_string();
        self.inner
            .store
            .update(self.session_id, |session| {
                if session.channel_info.room_url.is_none() {
                    session.channel_info.room_url = Some(url.clone());
                }
                session.metadata.insert(provider.room_metadata_key(), url);
            })
            .await
    }

    async fn on_joined(
        &mut self,
        provider: CallProvider,
        adapter: Arc<dyn ProviderAdapter>,
        latency: Duration,
    ) -> Result<(), CallSessionError> {
        let participants = adapter.get_participants().await;
        let latency_ms = millis(latency);
        let reconnection_ms = self.outage_started.take().map(|started| millis(started.elapsed()));

        let applied = self
            .transition(
                CallTrigger::AdapterJoined,
                format!("Connected via {}", provider),
                |session| {
                    let now = Utc::now();
                    if session.start_time.is_none() {
                        session.start_time = Some(now);
                        session.quality_metrics.connection_time_ms = Some(latency_ms);
                    }
                    session.last_successful_connection = Some(now);
                    session.reconnection_attempts = 0;
                    session.provider_switch_attempts = 0;
                    session.failure_details = None;
                    session.participants.extend(participants);
                    session.quality_metrics.last_latency_ms = Some(latency_ms);
                    if let Some(ms) = reconnection_ms {
                        session.quality_metrics.total_reconnection_time_ms =
                            session.quality_metrics.total_reconnection_time_ms.saturating_add(ms);
                    }
                },
            )
            .await?;

        if applied {
            self.inner
                .engine
                .update_provider_health(
                    provider,
                    true,
                    ProviderHealthMetrics {
                        latency_ms: Some(latency_ms),
                        packet_loss_rate: None,
                    },
                )
                .await;
            self.close_pending_recovery(true).await;
        }
        Ok(())
    }

    async fn perform_switch(&mut self) -> Result<Step, CallSessionError> {
        self.cancel_timer();
        let session = self.session().await?;

        let Some(next) = self.inner.engine.alternate_provider(&session).await else {
            let details = FailureDetails {
                reason: "No alternate call provider available".to_string(),
                classification: session.error_classification,
                show_manual_retry: true,
                can_switch_provider: false,
            };
            self.release_adapter().await;
            self.transition(CallTrigger::RecoveryExhausted, details.reason.clone(), |s| {
                s.failure_details = Some(details);
            })
            .await?;
            self.close_pending_recovery(false).await;
            self.outage_started = None;
            return Ok(Step::Done);
        };

        let previous = session.current_provider;
        self.release_adapter().await;

        let applied = self
            .transition(
                CallTrigger::SwitchCandidateSelected,
                format!("Switching provider from {} to {}", previous, next),
                |s| {
                    s.current_provider = next;
                    s.provider_switch_attempts = s.provider_switch_attempts.saturating_add(1);
                    s.total_provider_switches = s.total_provider_switches.saturating_add(1);
                    s.last_provider_switch = Some(Utc::now());
                },
            )
            .await?;

        Ok(if applied { Step::Join } else { Step::Done })
    }

    // ==========================================================================
    // RECOVERY
    // ==========================================================================

    async fn recover(&mut self, error: ProviderError, origin: ErrorOrigin) -> Result<Step, CallSessionError> {
        let session = self.session().await?;
        if !matches!(
            session.state,
            CallState::Connecting
                | CallState::Connected
                | CallState::Reconnecting
                | CallState::SwitchingProvider
        ) {
            debug!(
                session_id = %self.session_id,
                state = %session.state,
                "Ignoring call error outside an active call: {}", error
            );
            return Ok(Step::Done);
        }

        let engine = Arc::clone(&self.inner.engine);
        let context = RecoveryContext {
            origin,
            network_quality: session.quality_metrics.network_quality,
        };
        let classification = engine.classify_error(&error, &context);
        if counts_against_provider(classification.classification) {
            engine
                .update_provider_health(session.current_provider, false, ProviderHealthMetrics::default())
                .await;
        }
        let strategy = engine
            .determine_recovery_strategy(&session, &classification, &context)
            .await;

        warn!(
            session_id = %self.session_id,
            provider = %session.current_provider,
            classification = %classification.classification,
            strategy = %strategy,
            "Recovering call after error: {}", error
        );

        self.close_pending_recovery(false).await;
        self.pending_recovery = Some(PendingRecovery {
            provider: session.current_provider,
            classification: classification.classification,
            strategy,
            attempt_number: session.recovery_attempts.saturating_add(1),
            started: Instant::now(),
        });
        if self.outage_started.is_none() {
            self.outage_started = Some(Instant::now());
        }

        let reason = error.message.clone();
        let drops_connection =
            session.state == CallState::Connected && strategy != RecoveryStrategy::GracefulDegradation;
        self.inner
            .store
            .update(self.session_id, |s| {
                s.last_failure_reason = Some(reason.clone());
                s.error_classification = Some(classification.classification);
                s.last_recovery_strategy = Some(strategy);
                s.recovery_attempts = s.recovery_attempts.saturating_add(1);
                if drops_connection {
                    s.quality_metrics.disconnection_count =
                        s.quality_metrics.disconnection_count.saturating_add(1);
                }
            })
            .await?;

        match strategy {
            RecoveryStrategy::ExponentialBackoff => {
                self.schedule_retry(&session, strategy, &reason).await?;
                Ok(Step::Done)
            }
            RecoveryStrategy::ProviderSwitch => {
                let applied = self
                    .transition(
                        CallTrigger::ProviderSwitchScheduled,
                        format!("Switching provider after {}: {}", classification.classification, reason),
                        |s| {
                            let current = s.current_provider;
                            s.failed_providers.insert(current);
                        },
                    )
                    .await?;
                Ok(if applied { Step::Switch } else { Step::Done })
            }
            RecoveryStrategy::GracefulDegradation => self.degrade(&session, &reason).await,
            RecoveryStrategy::EmergencyFallback => {
                self.fail(&session, classification, &reason).await?;
                Ok(Step::Done)
            }
        }
    }

    async fn schedule_retry(
        &mut self,
        session: &CallSession,
        strategy: RecoveryStrategy,
        reason: &str,
    ) -> Result<(), CallSessionError> {
        let delay_ms = self.inner.engine.calculate_retry_delay(
            strategy,
            session.reconnection_attempts,
            self.inner.config.base_delay_ms,
            session.quality_metrics.network_quality,
        );

        let applied = self
            .transition(
                CallTrigger::BackoffScheduled,
                format!("Retrying in {}ms after: {}", delay_ms, reason),
                |s| s.reconnection_attempts = s.reconnection_attempts.saturating_add(1),
            )
            .await?;

        if applied {
            self.start_timer(Duration::from_millis(delay_ms));
        }
        Ok(())
    }

    async fn degrade(&mut self, session: &CallSession, reason: &str) -> Result<Step, CallSessionError> {
        if let Some(active) = &self.adapter {
            if let Err(e) = active.adapter.set_local_video(false).await {
                warn!(session_id = %self.session_id, "Failed to disable local video: {}", e);
            }
        }
        self.inner
            .store
            .update(self.session_id, |s| {
                s.graceful_degradation_active = true;
                s.quality_metrics.video_quality = MediaQuality::Disabled;
            })
            .await?;
        info!(session_id = %self.session_id, "Degraded call to audio-only");

        if session.state == CallState::Connected {
            self.close_pending_recovery(true).await;
            self.outage_started = None;
            return Ok(Step::Done);
        }

        self.schedule_retry(session, RecoveryStrategy::GracefulDegradation, reason)
            .await?;
        Ok(Step::Done)
    }

    async fn fail(
        &mut self,
        session: &CallSession,
        classification: ClassificationResult,
        reason: &str,
    ) -> Result<(), CallSessionError> {
        let can_switch_provider = classification.fallback_eligible
            && self.inner.engine.alternate_provider(session).await.is_some();
        let details = FailureDetails {
            reason: reason.to_string(),
            classification: Some(classification.classification),
            show_manual_retry: classification.classification != ErrorClassification::PermissionDenied,
            can_switch_provider,
        };

        self.cancel_timer();
        self.release_adapter().await;
        self.transition(
            CallTrigger::RecoveryExhausted,
            format!("Call failed ({}): {}", classification.classification, reason),
            |s| s.failure_details = Some(details),
        )
        .await?;

        self.close_pending_recovery(false).await;
        self.outage_started = None;
        error!(
            session_id = %self.session_id,
            classification = %classification.classification,
            "Call recovery exhausted: {}", reason
        );
        Ok(())
    }

    async fn close_pending_recovery(&mut self, success: bool) {
        if let Some(pending) = self.pending_recovery.take() {
            self.inner
                .engine
                .record_recovery_attempt(RecoveryAttempt {
                    session_id: self.session_id,
                    provider: pending.provider,
                    classification: pending.classification,
                    strategy: pending.strategy,
                    attempt_number: pending.attempt_number,
                    success,
                    duration_ms: millis(pending.started.elapsed()),
                    timestamp: Utc::now(),
                })
                .await;
        }
    }

    // ==========================================================================
    // TIMERS
    // ==========================================================================

    fn start_timer(&mut self, delay: Duration) {
        self.cancel_timer();
        let timer_epoch = self.timer_epoch;
        let commands = self.commands.clone();

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::BackoffElapsed { timer_epoch });
            }
        }));
    }

    /// Abort the pending timer and invalidate any fire already queued
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_epoch += 1;
    }
}
