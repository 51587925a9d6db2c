//! Typed signaling events and the in-process event bus.
//!
//! Every subscriber gets its own unbounded queue, so a slow watcher never
//! causes events to be dropped and events for one bridge are observed in
//! publish order.

use common::types::{BridgeId, ChannelId};
use std::fmt;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Inbound event delivered by the signaling backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// A channel entered a bridge.
    PartyJoined {
        bridge_id: BridgeId,
        channel_id: ChannelId,
    },
    /// A channel left a bridge.
    PartyLeft {
        bridge_id: BridgeId,
        channel_id: ChannelId,
    },
    /// The bridge was destroyed by the backend.
    SessionEnded { bridge_id: BridgeId },
}

impl SignalEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            SignalEvent::PartyJoined { .. } => EventKind::PartyJoined,
            SignalEvent::PartyLeft { .. } => EventKind::PartyLeft,
            SignalEvent::SessionEnded { .. } => EventKind::SessionEnded,
        }
    }

    #[must_use]
    pub const fn bridge_id(&self) -> BridgeId {
        match self {
            SignalEvent::PartyJoined { bridge_id, .. }
            | SignalEvent::PartyLeft { bridge_id, .. }
            | SignalEvent::SessionEnded { bridge_id } => *bridge_id,
        }
    }
}

/// Event type, used for subscription filters and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PartyJoined,
    PartyLeft,
    SessionEnded,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::PartyJoined,
        EventKind::PartyLeft,
        EventKind::SessionEnded,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::PartyJoined => "party_joined",
            EventKind::PartyLeft => "party_left",
            EventKind::SessionEnded => "session_ended",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kinds: Vec<EventKind>,
    bridge_id: Option<BridgeId>,
}

impl EventFilter {
    /// Every event for every bridge.
    #[must_use]
    pub fn all() -> Self {
        Self {
            kinds: EventKind::ALL.to_vec(),
            bridge_id: None,
        }
    }

    /// Every event for one bridge.
    #[must_use]
    pub fn for_bridge(bridge_id: BridgeId) -> Self {
        Self {
            kinds: EventKind::ALL.to_vec(),
            bridge_id: Some(bridge_id),
        }
    }

    /// Restrict to the given kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[EventKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    #[must_use]
    pub fn matches(&self, event: &SignalEvent) -> bool {
        self.kinds.contains(&event.kind())
            && self.bridge_id.map_or(true, |id| id == event.bridge_id())
    }
}

/// Receiving half of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: mpsc::UnboundedReceiver<SignalEvent>,
}

impl EventSubscription {
    /// Wait for the next matching event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SignalEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SignalEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: EventFilter,
    sender: mpsc::UnboundedSender<SignalEvent>,
}

/// Fan-out of signaling events to filtered subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub async fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .push(Subscriber { filter, sender });
        EventSubscription { receiver }
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Returns the number of subscribers it was delivered to. Subscribers
    /// whose receiver was dropped are pruned.
    pub async fn publish(&self, event: SignalEvent) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.filter.matches(&event) && subscriber.sender.send(event).is_ok() {
                delivered += 1;
            }
        }

        trace!(
            target: "cc.signaling.bus",
            event = %event.kind(),
            bridge_id = %event.bridge_id(),
            delivered,
            "Event published"
        );
        delivered
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        subscribers.len()
    }
}
