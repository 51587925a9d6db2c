//! Actor model for the Call Controller.
//!
//! ```text
//! SessionOrchestrator (control-plane entry points)
//! └── supervises N BridgeWatchers
//!     └── BridgeWatcher (one per bridge, Forming..Destroyed)
//!         ├── mailbox: ExpectParty / AbandonParty / OriginationComplete / GetState
//!         └── events: PartyJoined / PartyLeft / SessionEnded for its bridge
//! ```
//!
//! Watchers share nothing but the session registry and the signaling
//! backend. Each watcher's cancellation token is a child of the
//! orchestrator's, so shutdown reaches every watcher at once.

pub mod messages;
pub mod watcher;

pub use messages::{WatcherMessage, WatcherState};
pub use watcher::{drain_bridge, BridgeWatcher, BridgeWatcherHandle, TeardownReport};

use crate::classifier::CallType;
use crate::observability::metrics::set_bridges_active;
use crate::registry::SessionRegistry;

/// Publish the live bridge gauges from the registry.
pub async fn report_bridge_gauges(registry: &SessionRegistry) {
    let (calls, conferences) = registry.call_type_counts().await;
    set_bridges_active(CallType::Call.as_str(), calls);
    set_bridges_active(CallType::Conference.as_str(), conferences);
}
