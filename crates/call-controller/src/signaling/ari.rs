//! Asterisk REST Interface (ARI) adapter.
//!
//! Commands go over REST with HTTP basic auth. Events arrive on the ARI
//! WebSocket for the configured Stasis application and are routed three ways:
//!
//! - Bridge membership events become [`SignalEvent`]s on the event bus
//! - Answer and dial-status events resolve pending [`SignalingBackend::dial`]
//!   calls; a dial returns only once its channel is answered
//! - `StasisStart` for a channel this controller did not create is queued as
//!   an inbound call (see [`AriBackend::take_inbound_calls`])
//!
//! Every other ARI event is ignored.
//!
//! # Security
//!
//! - The ARI password is held as a `SecretString` and only exposed when
//!   building the auth header
//! - Transport errors carry URLs; they are logged and never shown to the
//!   console (see `CcError::client_message`)

use super::events::{EventBus, EventFilter, EventSubscription, SignalEvent};
use super::SignalingBackend;
use crate::config::Config;
use crate::errors::{CcError, SignalingCommand};
use crate::observability::HealthState;

use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::{ExposeSecret, SecretString};
use common::types::{BridgeId, ChannelId, EndpointAddress, InboundChannelId};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Timeout for ARI REST requests in seconds.
const ARI_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Connect timeout for ARI REST requests in seconds.
const ARI_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Slack added to the dial deadline for the dial request itself.
const DIAL_REQUEST_SLACK: Duration = Duration::from_secs(5);

/// Delay between event stream reconnect attempts.
const EVENT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// ARI event as sent on the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AriEvent {
    ChannelEnteredBridge { bridge: AriObject, channel: AriObject },
    ChannelLeftBridge { bridge: AriObject, channel: AriObject },
    BridgeDestroyed { bridge: AriObject },
    ChannelStateChange { channel: AriChannel },
    Dial {
        peer: AriObject,
        #[serde(default)]
        dialstatus: String,
    },
    ChannelDestroyed { channel: AriObject },
    StasisStart { channel: AriObject },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AriObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AriChannel {
    id: String,
    #[serde(default)]
    state: String,
}

/// How a dial ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DialOutcome {
    Answered,
    /// Ended without an answer; carries the ARI dial status or cause.
    Failed(String),
}

/// What a single ARI event means to this controller.
#[derive(Debug, PartialEq, Eq)]
enum AriUpdate {
    Session(SignalEvent),
    DialProgress {
        channel_id: ChannelId,
        outcome: DialOutcome,
    },
    Inbound(InboundChannelId),
}

impl AriEvent {
    /// Objects created by this controller carry UUID IDs. Anything else is
    /// foreign and only matters as an inbound call.
    fn into_update(self) -> Option<AriUpdate> {
        let update = match self {
            AriEvent::ChannelEnteredBridge { bridge, channel } => {
                AriUpdate::Session(SignalEvent::PartyJoined {
                    bridge_id: bridge.id.parse().ok()?,
                    channel_id: channel.id.parse().ok()?,
                })
            }
            AriEvent::ChannelLeftBridge { bridge, channel } => {
                AriUpdate::Session(SignalEvent::PartyLeft {
                    bridge_id: bridge.id.parse().ok()?,
                    channel_id: channel.id.parse().ok()?,
                })
            }
            AriEvent::BridgeDestroyed { bridge } => AriUpdate::Session(SignalEvent::SessionEnded {
                bridge_id: bridge.id.parse().ok()?,
            }),
            AriEvent::ChannelStateChange { channel } if channel.state == "Up" => {
                AriUpdate::DialProgress {
                    channel_id: channel.id.parse().ok()?,
                    outcome: DialOutcome::Answered,
                }
            }
            AriEvent::Dial { peer, dialstatus } => {
                let outcome = match dialstatus.as_str() {
                    "ANSWER" => DialOutcome::Answered,
                    // Still in progress.
                    "" | "RINGING" | "PROGRESS" | "PROCEEDING" => return None,
                    failed => DialOutcome::Failed(failed.to_string()),
                };
                AriUpdate::DialProgress {
                    channel_id: peer.id.parse().ok()?,
                    outcome,
                }
            }
            AriEvent::ChannelDestroyed { channel } => AriUpdate::DialProgress {
                channel_id: channel.id.parse().ok()?,
                outcome: DialOutcome::Failed("HANGUP".to_string()),
            },
            AriEvent::StasisStart { channel } => {
                if channel.id.parse::<ChannelId>().is_ok() {
                    return None;
                }
                AriUpdate::Inbound(InboundChannelId::from(channel.id))
            }
            AriEvent::ChannelStateChange { .. } | AriEvent::Other => return None,
        };
        Some(update)
    }
}

/// Parse one WebSocket text frame.
fn parse_event(text: &str) -> Option<AriUpdate> {
    match serde_json::from_str::<AriEvent>(text) {
        Ok(event) => event.into_update(),
        Err(e) => {
            debug!(target: "cc.signaling.ari", error = %e, "Unparseable ARI event ignored");
            None
        }
    }
}

/// Shared between the adapter and its event listener.
struct EventRouter {
    bus: Arc<EventBus>,
    pending_dials: Mutex<HashMap<ChannelId, oneshot::Sender<DialOutcome>>>,
    inbound_tx: mpsc::UnboundedSender<InboundChannelId>,
}

impl EventRouter {
    async fn route(&self, text: &str) {
        match parse_event(text) {
            Some(AriUpdate::Session(event)) => {
                self.bus.publish(event).await;
            }
            Some(AriUpdate::DialProgress {
                channel_id,
                outcome,
            }) => {
                let waiter = self.pending_dials.lock().await.remove(&channel_id);
                if let Some(waiter) = waiter {
                    debug!(target: "cc.signaling.ari", channel_id = %channel_id, outcome = ?outcome, "Dial resolved");
                    // The dialer may have given up already.
                    let _ = waiter.send(outcome);
                }
            }
            Some(AriUpdate::Inbound(channel)) => {
                info!(target: "cc.signaling.ari", channel = %channel, "Inbound call");
                if self.inbound_tx.send(channel).is_err() {
                    debug!(target: "cc.signaling.ari", "No inbound intake, call left unanswered");
                }
            }
            None => {}
        }
    }

    /// Register interest in a channel's answer. Must happen before the dial
    /// request is sent so a fast answer is not missed.
    async fn expect_answer(&self, channel_id: ChannelId) -> oneshot::Receiver<DialOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending_dials.lock().await;
        // Dialers that were cancelled from outside leave closed senders.
        pending.retain(|_, waiter| !waiter.is_closed());
        pending.insert(channel_id, tx);
        rx
    }

    async fn forget_dial(&self, channel_id: ChannelId) {
        self.pending_dials.lock().await.remove(&channel_id);
    }
}

/// ARI-backed signaling backend.
pub struct AriBackend {
    client: Client,
    base_url: String,
    ws_url: String,
    application: String,
    username: String,
    password: SecretString,
    router: Arc<EventRouter>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundChannelId>>>,
}

impl AriBackend {
    /// Create an adapter from configuration. Does not connect.
    pub fn new(config: &Config) -> Result<Self, CcError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(ARI_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(ARI_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                warn!(target: "cc.signaling.ari", error = %e, "Failed to build HTTP client");
                CcError::Internal(format!("failed to build ARI HTTP client: {e}"))
            })?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let router = EventRouter {
            bus: Arc::new(EventBus::new()),
            pending_dials: Mutex::new(HashMap::new()),
            inbound_tx,
        };

        Ok(Self {
            client,
            base_url: config.ari_url.trim_end_matches('/').to_string(),
            ws_url: config.ari_ws_url.clone(),
            application: config.ari_application.clone(),
            username: config.ari_username.clone(),
            password: config.ari_password.clone(),
            router: Arc::new(router),
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    /// The bus events are published on.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.router.bus)
    }

    /// Take the queue of inbound calls. Only the first caller gets it; calls
    /// arriving while nobody holds it are not answered.
    pub async fn take_inbound_calls(&self) -> Option<mpsc::UnboundedReceiver<InboundChannelId>> {
        self.inbound_rx.lock().await.take()
    }

    /// Route one raw ARI event frame, exactly as the event listener does for
    /// every text frame it receives.
    pub async fn dispatch_event(&self, text: &str) {
        self.router.route(text).await;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorization(&self) -> String {
        let credentials = format!("{}:{}", self.username, self.password.expose_secret());
        format!("Basic {}", STANDARD.encode(credentials))
    }

    async fn execute(
        &self,
        command: SignalingCommand,
        request: RequestBuilder,
    ) -> Result<(), CcError> {
        let response = request
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await
            .map_err(|e| {
                warn!(target: "cc.signaling.ari", command = %command, error = %e, "ARI request failed");
                if e.is_timeout() {
                    CcError::Timeout(command.to_string())
                } else {
                    CcError::command_failed(command, e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(target: "cc.signaling.ari", command = %command, status = %status, "ARI command succeeded");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            target: "cc.signaling.ari",
            command = %command,
            status = %status,
            body = %body,
            "ARI command rejected"
        );
        Err(CcError::command_failed(command, format!("HTTP {status}")))
    }

    /// Spawn the event listener.
    ///
    /// The listener reconnects forever until `cancel_token` fires. Readiness
    /// is set while the stream is connected.
    pub fn spawn_event_listener(
        &self,
        health: Arc<HealthState>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let listener = EventListener {
            ws_url: self.ws_url.clone(),
            application: self.application.clone(),
            authorization: self.authorization(),
            router: Arc::clone(&self.router),
            health,
            cancel_token,
        };
        tokio::spawn(listener.run())
    }
}

#[async_trait::async_trait]
impl SignalingBackend for AriBackend {
    async fn create_bridge(&self, bridge_id: BridgeId) -> Result<(), CcError> {
        let request = self
            .client
            .post(self.url(&format!("/bridges/{bridge_id}")))
            .query(&[("type", "mixing")]);
        self.execute(SignalingCommand::CreateBridge, request).await
    }

    async fn delete_bridge(&self, bridge_id: BridgeId) -> Result<(), CcError> {
        let request = self.client.delete(self.url(&format!("/bridges/{bridge_id}")));
        self.execute(SignalingCommand::DeleteBridge, request).await
    }

    async fn create_channel(
        &self,
        channel_id: ChannelId,
        endpoint: &EndpointAddress,
    ) -> Result<(), CcError> {
        let channel = channel_id.to_string();
        let request = self.client.post(self.url("/channels/create")).query(&[
            ("endpoint", endpoint.as_str()),
            ("app", self.application.as_str()),
            ("channelId", channel.as_str()),
        ]);
        self.execute(SignalingCommand::CreateChannel, request).await
    }

    async fn dial(&self, channel_id: ChannelId, timeout: Duration) -> Result<(), CcError> {
        let answered = self.router.expect_answer(channel_id).await;

        let request = self
            .client
            .post(self.url(&format!("/channels/{channel_id}/dial")))
            .query(&[("timeout", timeout.as_secs().to_string())])
            .timeout(timeout + DIAL_REQUEST_SLACK);
        if let Err(e) = self.execute(SignalingCommand::Dial, request).await {
            self.router.forget_dial(channel_id).await;
            return Err(e);
        }

        match tokio::time::timeout(timeout, answered).await {
            Ok(Ok(DialOutcome::Answered)) => {
                debug!(target: "cc.signaling.ari", channel_id = %channel_id, "Channel answered");
                Ok(())
            }
            Ok(Ok(DialOutcome::Failed(status))) => {
                warn!(target: "cc.signaling.ari", channel_id = %channel_id, status = %status, "Dial ended unanswered");
                Err(CcError::command_failed(
                    SignalingCommand::Dial,
                    format!("dial status {status}"),
                ))
            }
            Ok(Err(_)) => Err(CcError::Signaling(format!(
                "answer tracking for {channel_id} dropped"
            ))),
            Err(_) => {
                self.router.forget_dial(channel_id).await;
                warn!(target: "cc.signaling.ari", channel_id = %channel_id, "Dial not answered in time");
                Err(CcError::Timeout(format!("{channel_id} to answer")))
            }
        }
    }

    async fn hang_up(&self, channel_id: ChannelId) -> Result<(), CcError> {
        let request = self.client.delete(self.url(&format!("/channels/{channel_id}")));
        self.execute(SignalingCommand::HangUp, request).await
    }

    async fn add_to_bridge(
        &self,
        bridge_id: BridgeId,
        channel_id: ChannelId,
    ) -> Result<(), CcError> {
        let request = self
            .client
            .post(self.url(&format!("/bridges/{bridge_id}/addChannel")))
            .query(&[("channel", channel_id.to_string())]);
        self.execute(SignalingCommand::AddToBridge, request).await
    }

    async fn play_announcement(&self, bridge_id: BridgeId, sound: &str) -> Result<(), CcError> {
        let request = self
            .client
            .post(self.url(&format!("/bridges/{bridge_id}/play")))
            .query(&[("media", sound)]);
        self.execute(SignalingCommand::PlayAnnouncement, request).await
    }

    async fn answer(&self, channel: &InboundChannelId) -> Result<(), CcError> {
        let request = self.client.post(self.url(&format!("/channels/{channel}/answer")));
        self.execute(SignalingCommand::Answer, request).await
    }

    async fn play_to_channel(
        &self,
        channel: &InboundChannelId,
        sound: &str,
    ) -> Result<(), CcError> {
        let request = self
            .client
            .post(self.url(&format!("/channels/{channel}/play")))
            .query(&[("media", sound)]);
        self.execute(SignalingCommand::PlayToChannel, request).await
    }

    async fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        self.router.bus.subscribe(filter).await
    }
}

/// Owned state of the event listener task.
struct EventListener {
    ws_url: String,
    application: String,
    authorization: String,
    router: Arc<EventRouter>,
    health: Arc<HealthState>,
    cancel_token: CancellationToken,
}

impl EventListener {
    #[instrument(skip_all, name = "cc.signaling.ari.events", fields(app = %self.application))]
    async fn run(self) {
        info!(target: "cc.signaling.ari", "ARI event listener started");

        loop {
            match self.connect_and_pump().await {
                Ok(()) => {
                    info!(target: "cc.signaling.ari", "ARI event stream closed");
                }
                Err(e) => {
                    warn!(target: "cc.signaling.ari", error = %e, "ARI event stream failed, will reconnect");
                }
            }
            self.health.set_not_ready();

            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(EVENT_RECONNECT_DELAY) => {}
            }
        }

        info!(target: "cc.signaling.ari", "ARI event listener stopped");
    }

    async fn connect_and_pump(&self) -> Result<(), CcError> {
        let url = Url::parse_with_params(&self.ws_url, &[("app", self.application.as_str())])
            .map_err(|e| CcError::Config(format!("invalid ARI WebSocket URL: {e}")))?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CcError::Signaling(e.to_string()))?;
        let authorization = HeaderValue::from_str(&self.authorization)
            .map_err(|e| CcError::Config(format!("invalid ARI credentials: {e}")))?;
        request.headers_mut().insert("Authorization", authorization);

        let (mut stream, _) = tokio::select! {
            () = self.cancel_token.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(request) => {
                result.map_err(|e| CcError::Signaling(e.to_string()))?
            }
        };

        info!(target: "cc.signaling.ari", "ARI event stream connected");
        self.health.set_ready();

        loop {
            let frame = tokio::select! {
                () = self.cancel_token.cancelled() => return Ok(()),
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.router.route(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(CcError::Signaling(e.to_string())),
            }
        }
    }
}
