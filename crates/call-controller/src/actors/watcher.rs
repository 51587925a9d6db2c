//! `BridgeWatcher` - per-bridge actor running the lifecycle state machine.
//!
//! Each watcher:
//! - Subscribes to signaling events for its bridge before it is spawned, so
//!   no event between bridge creation and the first poll is lost
//! - Applies join/leave/end events to the session registry in delivery order
//! - Reclassifies the bridge and plays the join sound on every join
//! - Drains the bridge (leave sound, hang up members, delete, purge) when an
//!   end condition is observed, then exits
//!
//! Queued events are handled before mailbox messages, so a state query or the
//! origination-complete notice observes every event published before it was
//! sent. The orchestrator announces a party (and waits for the
//! acknowledgement) before adding it to the bridge, so the join event always
//! finds it pending.
//!
//! Cancellation stops the watcher without tearing the bridge down.

use crate::classifier::CallType;
use crate::config::SessionPolicy;
use crate::errors::{CcError, SignalingCommand};
use crate::lifecycle::{
    after_origination, drain_after_leave, DrainReason, LifecycleState, Transition,
};
use crate::observability::metrics::{record_event, record_teardown};
use crate::registry::SessionRegistry;
use crate::signaling::{
    instrumented, EventFilter, EventSubscription, SignalEvent, SignalingBackend,
};

use super::messages::{WatcherMessage, WatcherState};
use super::report_bridge_gauges;

use common::types::{BridgeId, ChannelId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the watcher mailbox.
const WATCHER_CHANNEL_BUFFER: usize = 64;

/// Handle to a `BridgeWatcher`.
#[derive(Clone, Debug)]
pub struct BridgeWatcherHandle {
    sender: mpsc::Sender<WatcherMessage>,
    cancel_token: CancellationToken,
    bridge_id: BridgeId,
}

impl BridgeWatcherHandle {
    #[must_use]
    pub fn bridge_id(&self) -> BridgeId {
        self.bridge_id
    }

    /// Announce a channel that is about to be added. Returns once the watcher
    /// has recorded it.
    ///
    /// Fails with `BridgeNotFound` if the watcher has already exited.
    pub async fn expect_party(&self, channel_id: ChannelId) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WatcherMessage::ExpectParty {
                channel_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Withdraw an announced channel whose origination failed.
    pub async fn abandon_party(&self, channel_id: ChannelId) -> Result<(), CcError> {
        self.sender
            .send(WatcherMessage::AbandonParty { channel_id })
            .await
            .map_err(|_| self.gone())
    }

    /// Tell the watcher the originating dial is done.
    pub async fn origination_complete(&self) -> Result<(), CcError> {
        self.sender
            .send(WatcherMessage::OriginationComplete)
            .await
            .map_err(|_| self.gone())
    }

    /// Query the watcher's state.
    pub async fn get_state(&self) -> Result<WatcherState, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WatcherMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Stop the watcher without tearing the bridge down.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    fn gone(&self) -> CcError {
        CcError::BridgeNotFound(self.bridge_id.to_string())
    }
}

/// The per-bridge actor.
pub struct BridgeWatcher {
    bridge_id: BridgeId,
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn SignalingBackend>,
    policy: Arc<SessionPolicy>,
    receiver: mpsc::Receiver<WatcherMessage>,
    events: EventSubscription,
    cancel_token: CancellationToken,
    state: LifecycleState,
    pending: HashSet<ChannelId>,
    origination_complete: bool,
    events_processed: u64,
}

impl BridgeWatcher {
    /// Subscribe to the bridge's events and spawn the watcher task.
    pub async fn spawn(
        bridge_id: BridgeId,
        registry: Arc<SessionRegistry>,
        backend: Arc<dyn SignalingBackend>,
        policy: Arc<SessionPolicy>,
        cancel_token: CancellationToken,
    ) -> (BridgeWatcherHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(WATCHER_CHANNEL_BUFFER);
        let events = backend.subscribe(EventFilter::for_bridge(bridge_id)).await;

        let watcher = Self {
            bridge_id,
            registry,
            backend,
            policy,
            receiver,
            events,
            cancel_token: cancel_token.clone(),
            state: LifecycleState::Forming,
            pending: HashSet::new(),
            origination_complete: false,
            events_processed: 0,
        };

        let task_handle = tokio::spawn(watcher.run());

        let handle = BridgeWatcherHandle {
            sender,
            cancel_token,
            bridge_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.watcher", fields(bridge_id = %self.bridge_id))]
    async fn run(mut self) {
        debug!(target: "cc.actor.watcher", bridge_id = %self.bridge_id, "BridgeWatcher started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.watcher",
                        bridge_id = %self.bridge_id,
                        state = %self.state,
                        "BridgeWatcher cancelled, leaving bridge in place"
                    );
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!(
                            target: "cc.actor.watcher",
                            bridge_id = %self.bridge_id,
                            "Event stream closed, exiting"
                        );
                        break;
                    }
                },

                msg = self.receiver.recv() => match msg {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        debug!(
                            target: "cc.actor.watcher",
                            bridge_id = %self.bridge_id,
                            "BridgeWatcher mailbox closed, exiting"
                        );
                        break;
                    }
                },
            }

            if self.state == LifecycleState::Destroyed {
                break;
            }
        }

        debug!(
            target: "cc.actor.watcher",
            bridge_id = %self.bridge_id,
            state = %self.state,
            events_processed = self.events_processed,
            "BridgeWatcher stopped"
        );
    }

    async fn handle_message(&mut self, message: WatcherMessage) {
        match message {
            WatcherMessage::ExpectParty {
                channel_id,
                respond_to,
            } => {
                let joined = self
                    .registry
                    .is_member(self.bridge_id, channel_id)
                    .await
                    .unwrap_or(false);
                if !joined {
                    self.pending.insert(channel_id);
                }
                let _ = respond_to.send(());
            }

            WatcherMessage::AbandonParty { channel_id } => {
                self.pending.remove(&channel_id);
                self.check_formed().await;
            }

            WatcherMessage::OriginationComplete => {
                self.origination_complete = true;
                self.check_formed().await;
            }

            WatcherMessage::GetState { respond_to } => {
                let _ = respond_to.send(WatcherState {
                    bridge_id: self.bridge_id,
                    lifecycle: self.state,
                    pending_parties: self.pending.len(),
                    events_processed: self.events_processed,
                });
            }
        }
    }

    async fn handle_event(&mut self, event: SignalEvent) {
        self.events_processed += 1;
        record_event(event.kind().as_str());

        if !self.state.is_live() {
            return;
        }

        match event {
            SignalEvent::PartyJoined { channel_id, .. } => self.on_party_joined(channel_id).await,
            SignalEvent::PartyLeft { channel_id, .. } => self.on_party_left(channel_id).await,
            SignalEvent::SessionEnded { .. } => self.drain(DrainReason::SessionEnded).await,
        }
    }

    async fn on_party_joined(&mut self, channel_id: ChannelId) {
        match self.registry.add_member(self.bridge_id, channel_id).await {
            Ok(_) => {}
            Err(CcError::BridgeNotFound(_)) => {
                self.state = LifecycleState::Destroyed;
                return;
            }
            Err(e) => {
                debug!(
                    target: "cc.actor.watcher",
                    bridge_id = %self.bridge_id,
                    channel_id = %channel_id,
                    error = %e,
                    "Ignoring join of unknown channel"
                );
                return;
            }
        }
        self.pending.remove(&channel_id);

        match self.registry.reclassify(self.bridge_id).await {
            Ok((previous, current)) if previous != current => {
                info!(
                    target: "cc.actor.watcher",
                    bridge_id = %self.bridge_id,
                    from = %previous,
                    to = %current,
                    "Bridge reclassified"
                );
                report_bridge_gauges(&self.registry).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "cc.actor.watcher", bridge_id = %self.bridge_id, error = %e, "Reclassification failed");
            }
        }

        if let Err(e) = instrumented(
            SignalingCommand::PlayAnnouncement,
            self.backend
                .play_announcement(self.bridge_id, &self.policy.join_sound),
        )
        .await
        {
            warn!(target: "cc.actor.watcher", bridge_id = %self.bridge_id, error = %e, "Join announcement failed");
        }

        self.check_formed().await;
    }

    async fn on_party_left(&mut self, channel_id: ChannelId) {
        self.pending.remove(&channel_id);

        let remaining = match self.registry.remove_member(self.bridge_id, channel_id).await {
            Ok(remaining) => remaining,
            Err(CcError::BridgeNotFound(_)) => {
                self.state = LifecycleState::Destroyed;
                return;
            }
            Err(e) => {
                debug!(
                    target: "cc.actor.watcher",
                    bridge_id = %self.bridge_id,
                    channel_id = %channel_id,
                    error = %e,
                    "Ignoring leave of non-member channel"
                );
                return;
            }
        };

        if let Err(e) = self.registry.delete_channel(channel_id).await {
            debug!(target: "cc.actor.watcher", channel_id = %channel_id, error = %e, "Channel already deleted");
        }

        let call_type = self
            .registry
            .get_call_type(self.bridge_id)
            .await
            .unwrap_or(CallType::Call);

        info!(
            target: "cc.actor.watcher",
            bridge_id = %self.bridge_id,
            channel_id = %channel_id,
            call_type = %call_type,
            remaining,
            "Party left"
        );

        match drain_after_leave(call_type, remaining, self.policy.conference_min_members) {
            Some(reason) => self.drain(reason).await,
            None => self.check_formed().await,
        }
    }

    /// Leave `Forming` once the dial is done and nobody is pending.
    async fn check_formed(&mut self) {
        if self.state != LifecycleState::Forming || !self.origination_complete {
            return;
        }

        let members = match self.registry.member_count(self.bridge_id).await {
            Ok(members) => members,
            Err(_) => {
                self.state = LifecycleState::Destroyed;
                return;
            }
        };

        match after_origination(members, self.pending.len()) {
            Transition::Stay => {}
            Transition::To(state) => {
                info!(
                    target: "cc.actor.watcher",
                    bridge_id = %self.bridge_id,
                    members,
                    "Bridge active"
                );
                self.state = state;
            }
            Transition::Drain(reason) => self.drain(reason).await,
        }
    }

    async fn drain(&mut self, reason: DrainReason) {
        self.state = LifecycleState::Draining;
        info!(
            target: "cc.actor.watcher",
            bridge_id = %self.bridge_id,
            reason = reason.as_str(),
            "Draining bridge"
        );

        if let Err(e) = drain_bridge(
            &self.registry,
            self.backend.as_ref(),
            &self.policy,
            self.bridge_id,
        )
        .await
        {
            debug!(target: "cc.actor.watcher", bridge_id = %self.bridge_id, error = %e, "Bridge already drained");
        }

        self.state = LifecycleState::Destroyed;
    }
}

/// Result of a bridge drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub bridge_id: BridgeId,
    /// Channels that were still members and were hung up.
    pub hung_up: Vec<ChannelId>,
    /// Teardown commands that failed (logged, never fatal).
    pub failed_commands: usize,
}

/// Tear a bridge down and purge it from the registry.
///
/// Plays the leave sound, hangs up every remaining member and deletes the
/// bridge, all best-effort. The registry purge is unconditional. A bridge
/// that is already gone fails with `BridgeNotFound`, so of two concurrent
/// drains exactly one succeeds.
pub async fn drain_bridge(
    registry: &SessionRegistry,
    backend: &dyn SignalingBackend,
    policy: &SessionPolicy,
    bridge_id: BridgeId,
) -> Result<TeardownReport, CcError> {
    let members = registry.members(bridge_id).await.map_err(|e| {
        record_teardown("already_gone");
        e
    })?;
    let mut failed_commands = 0;

    if let Err(e) = instrumented(
        SignalingCommand::PlayAnnouncement,
        backend.play_announcement(bridge_id, &policy.leave_sound),
    )
    .await
    {
        warn!(target: "cc.actor.watcher", bridge_id = %bridge_id, error = %e, "Leave announcement failed");
        failed_commands += 1;
    }

    for channel_id in &members {
        if let Err(e) = instrumented(SignalingCommand::HangUp, backend.hang_up(*channel_id)).await {
            warn!(
                target: "cc.actor.watcher",
                bridge_id = %bridge_id,
                channel_id = %channel_id,
                error = %e,
                "Hang-up failed during teardown"
            );
            failed_commands += 1;
        }
    }

    if let Err(e) =
        instrumented(SignalingCommand::DeleteBridge, backend.delete_bridge(bridge_id)).await
    {
        warn!(target: "cc.actor.watcher", bridge_id = %bridge_id, error = %e, "Bridge delete failed during teardown");
        failed_commands += 1;
    }

    registry.purge_bridge(bridge_id).await.map_err(|e| {
        record_teardown("already_gone");
        e
    })?;

    record_teardown(if failed_commands == 0 { "clean" } else { "partial" });
    report_bridge_gauges(registry).await;

    info!(
        target: "cc.actor.watcher",
        bridge_id = %bridge_id,
        hung_up = members.len(),
        failed_commands,
        "Bridge destroyed"
    );

    Ok(TeardownReport {
        bridge_id,
        hung_up: members,
        failed_commands,
    })
}
