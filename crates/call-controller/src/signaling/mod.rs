//! Signaling backend seam.
//!
//! The session core talks to the telephony backend only through
//! [`SignalingBackend`]: a handful of imperative commands plus a filtered
//! event subscription. Inbound calls are addressed by the backend's own
//! channel identifiers and only ever answered and greeted.
//! [`ari::AriBackend`] speaks the Asterisk REST Interface;
//! [`mock::MockSignaling`] is the in-memory stand-in for tests.

pub mod ari;
pub mod events;
pub mod mock;

pub use events::{EventBus, EventFilter, EventKind, EventSubscription, SignalEvent};

use crate::errors::{CcError, SignalingCommand};
use crate::observability::metrics::record_command;

use common::types::{BridgeId, ChannelId, EndpointAddress, InboundChannelId};
use std::future::Future;
use std::time::{Duration, Instant};

/// Commands and event subscription offered by a telephony backend.
#[async_trait::async_trait]
pub trait SignalingBackend: Send + Sync {
    /// Create a mixing bridge with the given ID.
    async fn create_bridge(&self, bridge_id: BridgeId) -> Result<(), CcError>;

    /// Destroy a bridge.
    async fn delete_bridge(&self, bridge_id: BridgeId) -> Result<(), CcError>;

    /// Create (but do not dial) a channel towards `endpoint`.
    async fn create_channel(
        &self,
        channel_id: ChannelId,
        endpoint: &EndpointAddress,
    ) -> Result<(), CcError>;

    /// Dial a created channel, waiting at most `timeout` for an answer.
    ///
    /// Fails with `Timeout` if the far end does not answer in time and with
    /// `CommandFailed` if the dial ends without an answer (busy, rejected).
    async fn dial(&self, channel_id: ChannelId, timeout: Duration) -> Result<(), CcError>;

    /// Hang up a channel.
    async fn hang_up(&self, channel_id: ChannelId) -> Result<(), CcError>;

    /// Put a channel into a bridge.
    async fn add_to_bridge(&self, bridge_id: BridgeId, channel_id: ChannelId)
        -> Result<(), CcError>;

    /// Play a sound (e.g. `sound:confbridge-join`) to everyone on a bridge.
    async fn play_announcement(&self, bridge_id: BridgeId, sound: &str) -> Result<(), CcError>;

    /// Answer an inbound channel.
    async fn answer(&self, channel: &InboundChannelId) -> Result<(), CcError>;

    /// Play a sound to a single inbound channel.
    async fn play_to_channel(&self, channel: &InboundChannelId, sound: &str)
        -> Result<(), CcError>;

    /// Subscribe to events matching `filter`.
    async fn subscribe(&self, filter: EventFilter) -> EventSubscription;
}

/// Await a signaling command and record its outcome and latency.
pub async fn instrumented<T, F>(command: SignalingCommand, fut: F) -> Result<T, CcError>
where
    F: Future<Output = Result<T, CcError>>,
{
    let start = Instant::now();
    let result = fut.await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(CcError::Timeout(_)) => "timeout",
        Err(_) => "error",
    };
    record_command(command.as_str(), outcome, start.elapsed());
    result
}
