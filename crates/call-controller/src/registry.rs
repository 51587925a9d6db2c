//! Session registry - single source of truth for bridges and channels.
//!
//! # Locking
//!
//! - The bridge map lock is held only long enough to clone a record handle.
//! - Each bridge record has its own mutex; every mutation of a bridge's
//!   member set or call type runs inside it, so updates to one bridge are
//!   linearizable while different bridges proceed concurrently.
//! - The channel table lock is always taken *after* a bridge mutex, never
//!   before, so the two cannot deadlock.
//! - A record removed from the map is flagged `removed` under its mutex;
//!   callers that raced the removal observe `NotFound`.
//!
//! No lock is ever held across a signaling command.

use crate::classifier::{classify, CallType};
use crate::errors::CcError;

use chrono::{DateTime, Utc};
use common::types::{BridgeId, ChannelId, EndpointAddress};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Dial progress of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialState {
    Dialing,
    Connected,
    Ended,
}

impl DialState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DialState::Dialing => "dialing",
            DialState::Connected => "connected",
            DialState::Ended => "ended",
        }
    }
}

/// Channel record (one endpoint leg).
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub channel_id: ChannelId,
    pub endpoint: EndpointAddress,
    pub dial_state: DialState,
    /// Bridge this channel is currently a member of.
    pub bridge_id: Option<BridgeId>,
}

/// Bridge record (one mixing point).
#[derive(Debug)]
struct BridgeRecord {
    bridge_id: BridgeId,
    call_type: CallType,
    /// Members in join order.
    members: Vec<ChannelId>,
    created_at: DateTime<Utc>,
    removed: bool,
}

/// One member of an active call, as listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallMember {
    pub channel_id: ChannelId,
    pub endpoint: EndpointAddress,
    pub dial_state: DialState,
}

/// Point-in-time copy of one bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveCall {
    pub bridge_id: BridgeId,
    pub call_type: CallType,
    pub created_at: DateTime<Utc>,
    pub members: Vec<CallMember>,
}

type BridgeHandle = Arc<Mutex<BridgeRecord>>;

/// Concurrent registry of bridges and channels.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    bridges: RwLock<HashMap<BridgeId, BridgeHandle>>,
    channels: RwLock<HashMap<ChannelId, ChannelRecord>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn bridge(&self, bridge_id: BridgeId) -> Result<BridgeHandle, CcError> {
        self.bridges
            .read()
            .await
            .get(&bridge_id)
            .cloned()
            .ok_or_else(|| CcError::BridgeNotFound(bridge_id.to_string()))
    }

    /// Register a new bridge with its initial call type.
    pub async fn create_bridge(&self, call_type: CallType) -> BridgeId {
        let bridge_id = BridgeId::new();
        let record = BridgeRecord {
            bridge_id,
            call_type,
            members: Vec::new(),
            created_at: Utc::now(),
            removed: false,
        };
        self.bridges
            .write()
            .await
            .insert(bridge_id, Arc::new(Mutex::new(record)));

        debug!(
            target: "cc.registry",
            bridge_id = %bridge_id,
            call_type = %call_type,
            "Bridge registered"
        );
        bridge_id
    }

    /// Register a new channel for `endpoint` in the `Dialing` state.
    pub async fn create_channel(&self, endpoint: EndpointAddress) -> ChannelId {
        let channel_id = ChannelId::new();
        debug!(
            target: "cc.registry",
            channel_id = %channel_id,
            endpoint = %endpoint,
            "Channel registered"
        );
        self.channels.write().await.insert(
            channel_id,
            ChannelRecord {
                channel_id,
                endpoint,
                dial_state: DialState::Dialing,
                bridge_id: None,
            },
        );
        channel_id
    }

    /// Get a copy of a channel record.
    pub async fn channel(&self, channel_id: ChannelId) -> Result<ChannelRecord, CcError> {
        self.channels
            .read()
            .await
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| CcError::ChannelNotFound(channel_id.to_string()))
    }

    /// Update a channel's dial state.
    ///
    /// Membership does not imply an answer; the dialer records `Connected`
    /// once the far end picks up.
    pub async fn set_dial_state(
        &self,
        channel_id: ChannelId,
        dial_state: DialState,
    ) -> Result<(), CcError> {
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(&channel_id)
            .ok_or_else(|| CcError::ChannelNotFound(channel_id.to_string()))?;
        record.dial_state = dial_state;
        Ok(())
    }

    /// Add a channel to a bridge's member set.
    ///
    /// Returns `Ok(true)` if the channel was newly added and `Ok(false)` if it
    /// was already a member. Fails if either record is missing or the channel
    /// already belongs to a different bridge.
    pub async fn add_member(
        &self,
        bridge_id: BridgeId,
        channel_id: ChannelId,
    ) -> Result<bool, CcError> {
        let handle = self.bridge(bridge_id).await?;
        let mut bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }

        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(&channel_id)
            .ok_or_else(|| CcError::ChannelNotFound(channel_id.to_string()))?;

        match channel.bridge_id {
            Some(existing) if existing == bridge_id => return Ok(false),
            Some(existing) => {
                return Err(CcError::InvalidArgument(format!(
                    "channel {channel_id} already belongs to bridge {existing}"
                )));
            }
            None => {}
        }

        channel.bridge_id = Some(bridge_id);
        bridge.members.push(channel_id);

        debug!(
            target: "cc.registry",
            bridge_id = %bridge_id,
            channel_id = %channel_id,
            members = bridge.members.len(),
            "Member added"
        );
        Ok(true)
    }

    /// Remove a channel from a bridge's member set.
    ///
    /// Returns the remaining member count. Unknown bridge or non-member
    /// channel fails with `NotFound` and changes nothing.
    pub async fn remove_member(
        &self,
        bridge_id: BridgeId,
        channel_id: ChannelId,
    ) -> Result<usize, CcError> {
        let handle = self.bridge(bridge_id).await?;
        let mut bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }

        let position = bridge
            .members
            .iter()
            .position(|member| *member == channel_id)
            .ok_or_else(|| CcError::ChannelNotFound(channel_id.to_string()))?;
        bridge.members.remove(position);

        if let Some(channel) = self.channels.write().await.get_mut(&channel_id) {
            channel.bridge_id = None;
            channel.dial_state = DialState::Ended;
        }

        let remaining = bridge.members.len();
        debug!(
            target: "cc.registry",
            bridge_id = %bridge_id,
            channel_id = %channel_id,
            remaining,
            "Member removed"
        );
        Ok(remaining)
    }

    /// Whether `channel_id` is currently a member of `bridge_id`.
    pub async fn is_member(
        &self,
        bridge_id: BridgeId,
        channel_id: ChannelId,
    ) -> Result<bool, CcError> {
        let handle = self.bridge(bridge_id).await?;
        let bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        Ok(bridge.members.contains(&channel_id))
    }

    /// Current members of a bridge, in join order.
    pub async fn members(&self, bridge_id: BridgeId) -> Result<Vec<ChannelId>, CcError> {
        let handle = self.bridge(bridge_id).await?;
        let bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        Ok(bridge.members.clone())
    }

    /// Current member count of a bridge.
    pub async fn member_count(&self, bridge_id: BridgeId) -> Result<usize, CcError> {
        self.members(bridge_id).await.map(|members| members.len())
    }

    /// Current call type of a bridge.
    pub async fn get_call_type(&self, bridge_id: BridgeId) -> Result<CallType, CcError> {
        let handle = self.bridge(bridge_id).await?;
        let bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        Ok(bridge.call_type)
    }

    /// Persist a call type.
    ///
    /// A conference is never downgraded back to a call.
    pub async fn set_call_type(
        &self,
        bridge_id: BridgeId,
        call_type: CallType,
    ) -> Result<(), CcError> {
        let handle = self.bridge(bridge_id).await?;
        let mut bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        if bridge.call_type == CallType::Conference && call_type == CallType::Call {
            return Err(CcError::InvalidArgument(format!(
                "bridge {bridge_id} is a conference and cannot revert to a call"
            )));
        }
        bridge.call_type = call_type;
        Ok(())
    }

    /// Re-run the classifier against the current membership and persist it.
    ///
    /// Returns `(previous, current)` call types.
    pub async fn reclassify(&self, bridge_id: BridgeId) -> Result<(CallType, CallType), CcError> {
        let handle = self.bridge(bridge_id).await?;
        let mut bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        let previous = bridge.call_type;
        bridge.call_type = classify(previous, bridge.members.len());
        if previous != bridge.call_type {
            debug!(
                target: "cc.registry",
                bridge_id = %bridge_id,
                from = %previous,
                to = %bridge.call_type,
                "Bridge reclassified"
            );
        }
        Ok((previous, bridge.call_type))
    }

    /// Delete a bridge record. Member channels stay registered but are
    /// detached from the bridge.
    pub async fn delete_bridge(&self, bridge_id: BridgeId) -> Result<(), CcError> {
        let handle = self.bridge(bridge_id).await?;
        let mut bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        bridge.removed = true;

        {
            let mut channels = self.channels.write().await;
            for member in bridge.members.drain(..) {
                if let Some(channel) = channels.get_mut(&member) {
                    channel.bridge_id = None;
                }
            }
        }

        self.bridges.write().await.remove(&bridge_id);
        debug!(target: "cc.registry", bridge_id = %bridge_id, "Bridge deleted");
        Ok(())
    }

    /// Delete a channel record, detaching it from its bridge first.
    ///
    /// The owner is re-checked under the channel table lock; if the channel
    /// was attached to (or moved between) bridges meanwhile, the delete is
    /// retried under the new owner's mutex.
    pub async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), CcError> {
        loop {
            let owner = self.channel(channel_id).await?.bridge_id;
            let handle = match owner {
                Some(bridge_id) => self.bridge(bridge_id).await.ok(),
                None => None,
            };

            // Bridge mutex (if any) before the channel table.
            let bridge = match &handle {
                Some(handle) => Some(handle.lock().await),
                None => None,
            };
            let mut channels = self.channels.write().await;
            let current = channels
                .get(&channel_id)
                .ok_or_else(|| CcError::ChannelNotFound(channel_id.to_string()))?
                .bridge_id;

            match (current, bridge) {
                (None, _) => {
                    channels.remove(&channel_id);
                }
                (Some(bridge_id), Some(mut bridge)) if bridge.bridge_id == bridge_id => {
                    channels.remove(&channel_id);
                    bridge.members.retain(|member| *member != channel_id);
                }
                _ => continue,
            }

            debug!(target: "cc.registry", channel_id = %channel_id, "Channel deleted");
            return Ok(());
        }
    }

    /// Remove a bridge and every member channel in one step.
    ///
    /// Returns the purged channel IDs. A second purge of the same bridge
    /// fails with `NotFound`, so concurrent drains remove it exactly once.
    pub async fn purge_bridge(&self, bridge_id: BridgeId) -> Result<Vec<ChannelId>, CcError> {
        let handle = self.bridge(bridge_id).await?;
        let mut bridge = handle.lock().await;
        if bridge.removed {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        bridge.removed = true;

        let purged: Vec<ChannelId> = bridge.members.drain(..).collect();
        {
            let mut channels = self.channels.write().await;
            for member in &purged {
                channels.remove(member);
            }
        }

        self.bridges.write().await.remove(&bridge_id);
        debug!(
            target: "cc.registry",
            bridge_id = %bridge_id,
            channels = purged.len(),
            "Bridge purged"
        );
        Ok(purged)
    }

    /// Whether a bridge is registered.
    pub async fn contains_bridge(&self, bridge_id: BridgeId) -> bool {
        self.bridges.read().await.contains_key(&bridge_id)
    }

    /// Number of registered bridges.
    pub async fn bridge_count(&self) -> usize {
        self.bridges.read().await.len()
    }

    /// Number of registered channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Number of live bridges of each call type, as `(calls, conferences)`.
    pub async fn call_type_counts(&self) -> (usize, usize) {
        let handles: Vec<BridgeHandle> = self.bridges.read().await.values().cloned().collect();

        let mut counts = (0, 0);
        for handle in handles {
            let bridge = handle.lock().await;
            match (bridge.removed, bridge.call_type) {
                (true, _) => {}
                (false, CallType::Call) => counts.0 += 1,
                (false, CallType::Conference) => counts.1 += 1,
            }
        }
        counts
    }

    /// Consistent copy of every bridge, oldest first.
    ///
    /// Each bridge is copied under its own mutex, so no bridge is observed
    /// mid-mutation; other bridges are blocked only for their own copy.
    pub async fn snapshot(&self) -> Vec<ActiveCall> {
        let handles: Vec<BridgeHandle> = self.bridges.read().await.values().cloned().collect();

        let mut calls = Vec::with_capacity(handles.len());
        for handle in handles {
            let bridge = handle.lock().await;
            if bridge.removed {
                continue;
            }
            let channels = self.channels.read().await;
            let members = bridge
                .members
                .iter()
                .filter_map(|member| channels.get(member))
                .map(|channel| CallMember {
                    channel_id: channel.channel_id,
                    endpoint: channel.endpoint.clone(),
                    dial_state: channel.dial_state,
                })
                .collect();
            calls.push(ActiveCall {
                bridge_id: bridge.bridge_id,
                call_type: bridge.call_type,
                created_at: bridge.created_at,
                members,
            });
        }

        calls.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.bridge_id.cmp(&b.bridge_id))
        });
        calls
    }

    /// Member references that have no channel record.
    ///
    /// Always empty while the registry's invariants hold.
    pub async fn dangling_members(&self) -> Vec<(BridgeId, ChannelId)> {
        let handles: Vec<BridgeHandle> = self.bridges.read().await.values().cloned().collect();

        let mut dangling = Vec::new();
        for handle in handles {
            let bridge = handle.lock().await;
            let channels = self.channels.read().await;
            dangling.extend(
                bridge
                    .members
                    .iter()
                    .filter(|member| !channels.contains_key(member))
                    .map(|member| (bridge.bridge_id, *member)),
            );
        }
        dangling
    }
}
