//! In-memory signaling backend for tests.
//!
//! Records every command it receives, fails or stalls on request, and owns an
//! [`EventBus`] so tests can inject backend events. Adding a channel to a
//! bridge publishes `PartyJoined` the way a real backend would, unless that is
//! switched off with [`MockSignaling::set_auto_join`]. Dials answer at once
//! unless the endpoint is stalled or rejected.

use super::events::{EventBus, EventFilter, EventSubscription, SignalEvent};
use super::SignalingBackend;
use crate::errors::{CcError, SignalingCommand};

use common::types::{BridgeId, ChannelId, EndpointAddress, InboundChannelId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// A command as received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    CreateBridge(BridgeId),
    DeleteBridge(BridgeId),
    CreateChannel(ChannelId, EndpointAddress),
    Dial(ChannelId),
    HangUp(ChannelId),
    AddToBridge(BridgeId, ChannelId),
    PlayAnnouncement(BridgeId, String),
    Answer(InboundChannelId),
    PlayToChannel(InboundChannelId, String),
}

impl RecordedCommand {
    #[must_use]
    pub const fn command(&self) -> SignalingCommand {
        match self {
            RecordedCommand::CreateBridge(_) => SignalingCommand::CreateBridge,
            RecordedCommand::DeleteBridge(_) => SignalingCommand::DeleteBridge,
            RecordedCommand::CreateChannel(..) => SignalingCommand::CreateChannel,
            RecordedCommand::Dial(_) => SignalingCommand::Dial,
            RecordedCommand::HangUp(_) => SignalingCommand::HangUp,
            RecordedCommand::AddToBridge(..) => SignalingCommand::AddToBridge,
            RecordedCommand::PlayAnnouncement(..) => SignalingCommand::PlayAnnouncement,
            RecordedCommand::Answer(_) => SignalingCommand::Answer,
            RecordedCommand::PlayToChannel(..) => SignalingCommand::PlayToChannel,
        }
    }
}

/// Mock signaling backend.
#[derive(Debug)]
pub struct MockSignaling {
    bus: EventBus,
    commands: Mutex<Vec<RecordedCommand>>,
    failing_commands: Mutex<HashSet<SignalingCommand>>,
    failing_endpoints: Mutex<HashSet<EndpointAddress>>,
    stalled_endpoints: Mutex<HashSet<EndpointAddress>>,
    rejected_endpoints: Mutex<HashMap<EndpointAddress, String>>,
    channel_endpoints: Mutex<HashMap<ChannelId, EndpointAddress>>,
    auto_join: AtomicBool,
}

impl Default for MockSignaling {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSignaling {
    /// Create a mock where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            commands: Mutex::new(Vec::new()),
            failing_commands: Mutex::new(HashSet::new()),
            failing_endpoints: Mutex::new(HashSet::new()),
            stalled_endpoints: Mutex::new(HashSet::new()),
            rejected_endpoints: Mutex::new(HashMap::new()),
            channel_endpoints: Mutex::new(HashMap::new()),
            auto_join: AtomicBool::new(true),
        }
    }

    /// Make every future invocation of `command` fail.
    pub async fn fail_command(&self, command: SignalingCommand) {
        self.failing_commands.lock().await.insert(command);
    }

    /// Make channel creation towards `endpoint` fail.
    pub async fn fail_endpoint(&self, endpoint: impl Into<EndpointAddress>) {
        self.failing_endpoints.lock().await.insert(endpoint.into());
    }

    /// Make dials towards `endpoint` never answer.
    pub async fn stall_endpoint(&self, endpoint: impl Into<EndpointAddress>) {
        self.stalled_endpoints.lock().await.insert(endpoint.into());
    }

    /// Make dials towards `endpoint` end unanswered with `status`
    /// (e.g. `BUSY`).
    pub async fn reject_endpoint(&self, endpoint: impl Into<EndpointAddress>, status: &str) {
        self.rejected_endpoints
            .lock()
            .await
            .insert(endpoint.into(), status.to_string());
    }

    /// Whether `add_to_bridge` publishes `PartyJoined`.
    pub fn set_auto_join(&self, enabled: bool) {
        self.auto_join.store(enabled, Ordering::SeqCst);
    }

    /// The event bus backing `subscribe`.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish an event as if the backend had sent it.
    pub async fn emit(&self, event: SignalEvent) -> usize {
        self.bus.publish(event).await
    }

    pub async fn emit_party_joined(&self, bridge_id: BridgeId, channel_id: ChannelId) -> usize {
        self.emit(SignalEvent::PartyJoined {
            bridge_id,
            channel_id,
        })
        .await
    }

    pub async fn emit_party_left(&self, bridge_id: BridgeId, channel_id: ChannelId) -> usize {
        self.emit(SignalEvent::PartyLeft {
            bridge_id,
            channel_id,
        })
        .await
    }

    pub async fn emit_session_ended(&self, bridge_id: BridgeId) -> usize {
        self.emit(SignalEvent::SessionEnded { bridge_id }).await
    }

    /// Every command received so far, in order.
    pub async fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().await.clone()
    }

    /// Number of times `command` was received.
    pub async fn count(&self, command: SignalingCommand) -> usize {
        self.commands
            .lock()
            .await
            .iter()
            .filter(|recorded| recorded.command() == command)
            .count()
    }

    /// Channels that were hung up, in order.
    pub async fn hung_up(&self) -> Vec<ChannelId> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|recorded| match recorded {
                RecordedCommand::HangUp(channel_id) => Some(*channel_id),
                _ => None,
            })
            .collect()
    }

    /// Bridges that were deleted, in order.
    pub async fn deleted_bridges(&self) -> Vec<BridgeId> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|recorded| match recorded {
                RecordedCommand::DeleteBridge(bridge_id) => Some(*bridge_id),
                _ => None,
            })
            .collect()
    }

    /// Sounds played on `bridge_id`, in order.
    pub async fn announcements(&self, bridge_id: BridgeId) -> Vec<String> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|recorded| match recorded {
                RecordedCommand::PlayAnnouncement(id, sound) if *id == bridge_id => {
                    Some(sound.clone())
                }
                _ => None,
            })
            .collect()
    }

    async fn record(&self, recorded: RecordedCommand) -> Result<(), CcError> {
        let command = recorded.command();
        self.commands.lock().await.push(recorded);
        if self.failing_commands.lock().await.contains(&command) {
            return Err(CcError::command_failed(command, "mock failure"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SignalingBackend for MockSignaling {
    async fn create_bridge(&self, bridge_id: BridgeId) -> Result<(), CcError> {
        self.record(RecordedCommand::CreateBridge(bridge_id)).await
    }

    async fn delete_bridge(&self, bridge_id: BridgeId) -> Result<(), CcError> {
        self.record(RecordedCommand::DeleteBridge(bridge_id)).await
    }

    async fn create_channel(
        &self,
        channel_id: ChannelId,
        endpoint: &EndpointAddress,
    ) -> Result<(), CcError> {
        self.record(RecordedCommand::CreateChannel(channel_id, endpoint.clone()))
            .await?;
        if self.failing_endpoints.lock().await.contains(endpoint) {
            return Err(CcError::command_failed(
                SignalingCommand::CreateChannel,
                format!("mock failure for {endpoint}"),
            ));
        }
        self.channel_endpoints
            .lock()
            .await
            .insert(channel_id, endpoint.clone());
        Ok(())
    }

    async fn dial(&self, channel_id: ChannelId, _timeout: Duration) -> Result<(), CcError> {
        self.record(RecordedCommand::Dial(channel_id)).await?;

        let Some(endpoint) = self.channel_endpoints.lock().await.get(&channel_id).cloned() else {
            return Ok(());
        };
        if let Some(status) = self.rejected_endpoints.lock().await.get(&endpoint) {
            return Err(CcError::command_failed(
                SignalingCommand::Dial,
                format!("dial status {status}"),
            ));
        }
        if self.stalled_endpoints.lock().await.contains(&endpoint) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn hang_up(&self, channel_id: ChannelId) -> Result<(), CcError> {
        self.record(RecordedCommand::HangUp(channel_id)).await
    }

    async fn add_to_bridge(
        &self,
        bridge_id: BridgeId,
        channel_id: ChannelId,
    ) -> Result<(), CcError> {
        self.record(RecordedCommand::AddToBridge(bridge_id, channel_id))
            .await?;
        if self.auto_join.load(Ordering::SeqCst) {
            self.emit_party_joined(bridge_id, channel_id).await;
        }
        Ok(())
    }

    async fn play_announcement(&self, bridge_id: BridgeId, sound: &str) -> Result<(), CcError> {
        self.record(RecordedCommand::PlayAnnouncement(bridge_id, sound.to_string()))
            .await
    }

    async fn answer(&self, channel: &InboundChannelId) -> Result<(), CcError> {
        self.record(RecordedCommand::Answer(channel.clone())).await
    }

    async fn play_to_channel(
        &self,
        channel: &InboundChannelId,
        sound: &str,
    ) -> Result<(), CcError> {
        self.record(RecordedCommand::PlayToChannel(channel.clone(), sound.to_string()))
            .await
    }

    async fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        self.bus.subscribe(filter).await
    }
}
