// libs/call-session-cell/src/services/daily.rs
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{CallProvider, CallSessionError, ChannelInfo, ProviderError};
use crate::services::listeners::{ListenerRegistry, Subscription};
use crate::services::provider::{
    AdapterConnectionState, LocalMediaState, ProviderAdapter, ProviderEvent, ProviderEventHandler,
    ProviderFactory,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const ROOM_TTL_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct DailyRoom {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub privacy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyMeetingToken {
    token: String,
}

#[derive(Debug, Serialize)]
struct CreateRoomBody {
    name: String,
    privacy: &'static str,
    properties: serde_json::Value,
}

/// Daily REST API client
/// Based on: https://docs.daily.co/reference/rest-api
#[derive(Clone)]
pub struct DailyApiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl DailyApiClient {
    pub fn new(config: &AppConfig) -> Result<Self, CallSessionError> {
        if !config.is_daily_configured() {
            return Err(CallSessionError::ProviderNotConfigured {
                provider: CallProvider::Daily,
            });
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key: config.daily_api_key.clone(),
            base_url: config.daily_api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST /rooms
    pub async fn create_room(&self, channel: &ChannelInfo) -> Result<DailyRoom, ProviderError> {
        let name = room_name_for(&channel.channel_name);
        info!("Creating Daily room: {}", name);

        let body = CreateRoomBody {
            name,
            privacy: "private",
            properties: json!({
                "exp": Utc::now().timestamp() + ROOM_TTL_SECS,
                "start_video_off": !channel.is_video(),
                "enable_chat": false,
                "eject_at_room_exp": true,
            }),
        };

        let url = format!("{}/rooms", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let room: DailyRoom = parse_response(response, "create room").await?;
        info!("Created Daily room {} at {}", room.name, room.url);
        Ok(room)
    }

    /// GET /rooms/{name}
    pub async fn get_room(&self, name: &str) -> Result<DailyRoom, ProviderError> {
        let url = format!("{}/rooms/{}", self.base_url, name);
        debug!("Fetching Daily room: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        parse_response(response, "get room").await
    }

    /// POST /meeting-tokens
    pub async fn create_meeting_token(&self, room_name: &str) -> Result<String, ProviderError> {
        let url = format!("{}/meeting-tokens", self.base_url);
        let body = json!({
            "properties": {
                "room_name": room_name,
                "exp": Utc::now().timestamp() + ROOM_TTL_SECS,
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let token: DailyMeetingToken = parse_response(response, "create meeting token").await?;
        Ok(token.token)
    }

    /// Check Daily API reachability
    pub async fn health_check(&self) -> Result<bool, CallSessionError> {
        let url = format!("{}/rooms?limit=1", self.base_url);

        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("Daily health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Room names allow `[A-Za-z0-9_-]`; a random suffix keeps retries unique
fn room_name_for(channel_name: &str) -> String {
    let base: String = channel_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .take(48)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", base.trim_matches('-'), &suffix[..8])
}

/// Last path segment of a Daily room URL
fn room_name_from_url(room_url: &str) -> Option<&str> {
    room_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|name| name.split(|c| c == '?' || c == '#').next().unwrap_or(name))
        .filter(|name| !name.is_empty() && !name.contains(':'))
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(format!("Daily request timed out: {}", err))
    } else if err.is_connect() {
        ProviderError::new(format!("Connection to Daily failed: {}", err)).with_code("connection_failed")
    } else {
        ProviderError::new(format!("Daily request error: {}", err))
    }
}

fn status_error(status: StatusCode, body: &str, operation: &str) -> ProviderError {
    let error = match status {
        StatusCode::NOT_FOUND => ProviderError::new("Daily room not found").with_code("not-found"),
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::new("Daily rate limit exceeded").with_code("service_unavailable")
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::timeout(format!("Daily {} timed out", operation))
        }
        s if s.is_server_error() => {
            ProviderError::new("Daily service unavailable").with_code("service_unavailable")
        }
        _ => ProviderError::new(format!("Daily {} failed: HTTP {}: {}", operation, status, body)),
    };
    error.with_status(status.as_u16())
}

async fn parse_response<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T, ProviderError> {
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;

    debug!("Daily {} response: {} - {}", operation, status, text);

    if !status.is_success() {
        error!("Daily {} failed: {} - {}", operation, status, text);
        return Err(status_error(status, &text, operation));
    }

    serde_json::from_str(&text).map_err(|e| {
        ProviderError::new(format!("Failed to parse Daily {} response: {}", operation, e))
    })
}

// ==============================================================================
// ADAPTER
// ==============================================================================

/// Server-side Daily adapter: validates rooms, mints tokens and tracks the
/// session's local media state. Media transport runs in the client SDK.
pub struct DailyProviderAdapter {
    api: DailyApiClient,
    joined_room: Mutex<Option<String>>,
    meeting_token: Mutex<Option<String>>,
    participants: Mutex<BTreeSet<String>>,
    media: Mutex<LocalMediaState>,
    listeners: ListenerRegistry<ProviderEvent>,
}

impl DailyProviderAdapter {
    pub fn new(api: DailyApiClient) -> Self {
        Self {
            api,
            joined_room: Mutex::new(None),
            meeting_token: Mutex::new(None),
            participants: Mutex::new(BTreeSet::new()),
            media: Mutex::new(LocalMediaState::default()),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn joined_room(&self) -> Option<String> {
        self.joined_room.lock().clone()
    }

    /// Token minted on the last join, if the room needed one
    pub fn meeting_token(&self) -> Option<String> {
        self.meeting_token.lock().clone()
    }

    fn emit_state(&self, state: AdapterConnectionState) {
        let media = *self.media.lock();
        self.listeners.emit(&ProviderEvent::StateChanged { state, media });
    }
}

#[async_trait]
impl ProviderAdapter for DailyProviderAdapter {
    fn provider(&self) -> CallProvider {
        CallProvider::Daily
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.emit_state(AdapterConnectionState::Idle);
        Ok(())
    }

    async fn create_room(&self, channel: &ChannelInfo) -> Result<String, ProviderError> {
        Ok(self.api.create_room(channel).await?.url)
    }

    async fn join(&self, room_url: &str, token: Option<&str>) -> Result<(), ProviderError> {
        let room_name = room_name_from_url(room_url).ok_or_else(|| {
            ProviderError::new(format!("Invalid Daily room url: {}", room_url)).with_code("not-found")
        })?;

        self.emit_state(AdapterConnectionState::Joining);

        let result = async {
            let room = self.api.get_room(room_name).await?;
            let minted = if token.is_none() && room.privacy.as_deref() != Some("public") {
                Some(self.api.create_meeting_token(&room.name).await?)
            } else {
                None
            };
            Ok::<_, ProviderError>((room, minted))
        }
        .await;

        match result {
            Ok((room, minted)) => {
                *self.joined_room.lock() = Some(room.url.clone());
                if let Some(token) = minted {
                    *self.meeting_token.lock() = Some(token.clone());
                    self.listeners.emit(&ProviderEvent::TokenIssued { token });
                }
                info!("Joined Daily room {}", room.name);
                let participants: Vec<String> = self.participants.lock().iter().cloned().collect();
                self.listeners.emit(&ProviderEvent::Joined { participants });
                self.emit_state(AdapterConnectionState::Joined);
                Ok(())
            }
            Err(e) => {
                self.emit_state(AdapterConnectionState::Error);
                Err(e)
            }
        }
    }

    async fn leave(&self) -> Result<(), ProviderError> {
        let previous = self.joined_room.lock().take();
        self.participants.lock().clear();
        if let Some(room) = previous {
            info!("Left Daily room {}", room);
            self.emit_state(AdapterConnectionState::Left);
        }
        Ok(())
    }

    async fn set_local_audio(&self, enabled: bool) -> Result<(), ProviderError> {
        self.media.lock().audio_enabled = enabled;
        self.emit_state(self.connection_state());
        Ok(())
    }

    async fn set_local_video(&self, enabled: bool) -> Result<(), ProviderError> {
        self.media.lock().video_enabled = enabled;
        self.emit_state(self.connection_state());
        Ok(())
    }

    async fn flip_camera(&self) -> Result<(), ProviderError> {
        {
            let mut media = self.media.lock();
            if !media.video_enabled {
                return Err(ProviderError::new("Camera is off").with_code("device"));
            }
            media.camera = media.camera.flipped();
        }
        self.emit_state(self.connection_state());
        Ok(())
    }

    fn subscribe(&self, handler: ProviderEventHandler) -> Subscription {
        self.listeners.add(move |event| handler(event))
    }

    async fn get_participants(&self) -> Vec<String> {
        self.participants.lock().iter().cloned().collect()
    }
}

impl DailyProviderAdapter {
    fn connection_state(&self) -> AdapterConnectionState {
        if self.joined_room.lock().is_some() {
            AdapterConnectionState::Joined
        } else {
            AdapterConnectionState::Idle
        }
    }
}

pub struct DailyProviderFactory {
    api: DailyApiClient,
}

impl DailyProviderFactory {
    pub fn new(config: &AppConfig) -> Result<Self, CallSessionError> {
        Ok(Self {
            api: DailyApiClient::new(config)?,
        })
    }

    pub fn api(&self) -> &DailyApiClient {
        &self.api
    }
}

impl ProviderFactory for DailyProviderFactory {
    fn provider(&self) -> CallProvider {
        CallProvider::Daily
    }

    fn create(&self) -> Arc<dyn ProviderAdapter> {
        Arc::new(DailyProviderAdapter::new(self.api.clone()))
    }
}
