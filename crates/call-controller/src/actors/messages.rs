//! Mailbox message types for the bridge watcher.

use crate::lifecycle::LifecycleState;

use common::types::{BridgeId, ChannelId};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages sent to a `BridgeWatcher` by the orchestrator.
#[derive(Debug)]
pub enum WatcherMessage {
    /// A channel is about to be added to the bridge; forming is not complete
    /// until its join is observed or it is abandoned.
    ExpectParty {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<()>,
    },

    /// Origination of an expected channel failed.
    AbandonParty { channel_id: ChannelId },

    /// The originating dial has issued every command it is going to.
    OriginationComplete,

    /// Query the watcher's state.
    GetState {
        respond_to: oneshot::Sender<WatcherState>,
    },
}

/// Snapshot of a watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherState {
    pub bridge_id: BridgeId,
    pub lifecycle: LifecycleState,
    /// Channels expected to join that have not yet been seen.
    pub pending_parties: usize,
    pub events_processed: u64,
}
