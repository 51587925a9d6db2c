//! `SessionOrchestrator` - control-plane entry points.
//!
//! Translates `dial`, `join` and `list_active_calls` into registry mutations
//! and signaling commands, and supervises one [`BridgeWatcher`] per bridge it
//! creates. The orchestrator never consumes events itself.
//!
//! # Origination
//!
//! Endpoints are originated one at a time: register the channel, announce it
//! to the watcher, create it, dial it and wait for the answer (bounded by the
//! dial timeout), mark it connected, add it to the bridge, record the
//! membership. The first failure stops the loop;
//! parties already in the bridge stay there and the error is returned.

use crate::actors::{report_bridge_gauges, BridgeWatcher, BridgeWatcherHandle, WatcherState};
use crate::classifier::initial_type;
use crate::config::SessionPolicy;
use crate::errors::{CcError, SignalingCommand};
use crate::observability::metrics::{record_watcher_panic, set_watchers_active};
use crate::registry::{ActiveCall, DialState, SessionRegistry};
use crate::signaling::{instrumented, SignalingBackend};

use common::types::{BridgeId, ChannelId, EndpointAddress};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Minimum number of endpoints for a dial.
pub const MIN_DIAL_ENDPOINTS: usize = 2;

/// Managed watcher with its task handle.
struct ManagedWatcher {
    handle: BridgeWatcherHandle,
    task_handle: JoinHandle<()>,
}

/// Controller status, as shown by the `status` console command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub bridges: usize,
    pub channels: usize,
    pub watchers: usize,
    pub draining: bool,
}

/// Public API over the session registry and signaling backend.
pub struct SessionOrchestrator {
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn SignalingBackend>,
    policy: Arc<SessionPolicy>,
    cancel_token: CancellationToken,
    watchers: Mutex<HashMap<BridgeId, ManagedWatcher>>,
    accepting: AtomicBool,
}

impl SessionOrchestrator {
    /// Create an orchestrator. Watchers get child tokens of `cancel_token`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        backend: Arc<dyn SignalingBackend>,
        policy: SessionPolicy,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            backend,
            policy: Arc::new(policy),
            cancel_token,
            watchers: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Create a bridge and connect every endpoint to it.
    ///
    /// Requires at least two endpoints. On a mid-way failure the bridge is
    /// kept with the parties that did join, and the failure is returned.
    #[instrument(skip_all, name = "cc.orchestrator.dial", fields(endpoints = endpoints.len()))]
    pub async fn dial<S: AsRef<str>>(&self, endpoints: &[S]) -> Result<BridgeId, CcError> {
        self.ensure_accepting()?;
        self.reap_watchers().await;

        if endpoints.len() < MIN_DIAL_ENDPOINTS {
            return Err(CcError::InvalidArgument(format!(
                "a call needs at least {MIN_DIAL_ENDPOINTS} endpoints, got {}",
                endpoints.len()
            )));
        }
        let endpoints = self.normalize_endpoints(endpoints)?;

        let call_type = initial_type(endpoints.len());
        let bridge_id = self.registry.create_bridge(call_type).await;

        if let Err(e) = instrumented(
            SignalingCommand::CreateBridge,
            self.backend.create_bridge(bridge_id),
        )
        .await
        {
            warn!(target: "cc.orchestrator", bridge_id = %bridge_id, error = %e, "Bridge creation failed");
            if let Err(cleanup) = self.registry.delete_bridge(bridge_id).await {
                debug!(target: "cc.orchestrator", bridge_id = %bridge_id, error = %cleanup, "Bridge record already gone");
            }
            return Err(e);
        }

        let (handle, task_handle) = BridgeWatcher::spawn(
            bridge_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            Arc::clone(&self.policy),
            self.cancel_token.child_token(),
        )
        .await;
        {
            let mut watchers = self.watchers.lock().await;
            watchers.insert(
                bridge_id,
                ManagedWatcher {
                    handle: handle.clone(),
                    task_handle,
                },
            );
            set_watchers_active(watchers.len());
        }
        report_bridge_gauges(&self.registry).await;

        info!(
            target: "cc.orchestrator",
            bridge_id = %bridge_id,
            call_type = %call_type,
            endpoints = endpoints.len(),
            "Dialing"
        );

        let result = self.originate_all(&handle, &endpoints).await;

        if let Err(e) = handle.origination_complete().await {
            debug!(target: "cc.orchestrator", bridge_id = %bridge_id, error = %e, "Watcher exited before origination completed");
        }

        match result {
            Ok(channels) => {
                info!(
                    target: "cc.orchestrator",
                    bridge_id = %bridge_id,
                    channels = channels.len(),
                    "Dial complete"
                );
                Ok(bridge_id)
            }
            Err(e) => {
                warn!(
                    target: "cc.orchestrator",
                    bridge_id = %bridge_id,
                    error = %e,
                    "Dial stopped at first failure, bridge keeps joined parties"
                );
                Err(e)
            }
        }
    }

    /// Connect more endpoints to an existing bridge.
    ///
    /// Fails with `BridgeNotFound` (and changes nothing) if the bridge does
    /// not exist. Reclassifies the bridge once every endpoint has joined.
    #[instrument(
        skip_all,
        name = "cc.orchestrator.join",
        fields(bridge_id = %bridge_id, endpoints = endpoints.len())
    )]
    pub async fn join<S: AsRef<str>>(
        &self,
        bridge_id: BridgeId,
        endpoints: &[S],
    ) -> Result<(), CcError> {
        self.ensure_accepting()?;
        self.reap_watchers().await;

        if !self.registry.contains_bridge(bridge_id).await {
            return Err(CcError::BridgeNotFound(bridge_id.to_string()));
        }
        let handle = self
            .watchers
            .lock()
            .await
            .get(&bridge_id)
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| CcError::BridgeNotFound(bridge_id.to_string()))?;

        if endpoints.is_empty() {
            return Err(CcError::InvalidArgument(
                "join needs at least one endpoint".to_string(),
            ));
        }
        let endpoints = self.normalize_endpoints(endpoints)?;

        self.originate_all(&handle, &endpoints).await?;

        let (previous, current) = self.registry.reclassify(bridge_id).await?;
        report_bridge_gauges(&self.registry).await;

        info!(
            target: "cc.orchestrator",
            bridge_id = %bridge_id,
            added = endpoints.len(),
            from = %previous,
            to = %current,
            "Join complete"
        );
        Ok(())
    }

    /// Every live bridge with its call type and members, oldest first.
    pub async fn list_active_calls(&self) -> Vec<ActiveCall> {
        self.reap_watchers().await;
        self.registry.snapshot().await
    }

    /// Counts for the `status` command.
    pub async fn status(&self) -> OrchestratorStatus {
        self.reap_watchers().await;
        OrchestratorStatus {
            bridges: self.registry.bridge_count().await,
            channels: self.registry.channel_count().await,
            watchers: self.watchers.lock().await.len(),
            draining: !self.accepting.load(Ordering::SeqCst),
        }
    }

    /// State of the watcher for `bridge_id`.
    pub async fn watcher_state(&self, bridge_id: BridgeId) -> Result<WatcherState, CcError> {
        let handle = self
            .watchers
            .lock()
            .await
            .get(&bridge_id)
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| CcError::BridgeNotFound(bridge_id.to_string()))?;
        handle.get_state().await
    }

    /// Stop accepting work, cancel every watcher and wait for them.
    ///
    /// Live bridges are left in place. Watchers still running at the
    /// deadline are aborted and reported as a `Timeout`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), CcError> {
        self.accepting.store(false, Ordering::SeqCst);
        self.cancel_token.cancel();

        let watchers: Vec<(BridgeId, ManagedWatcher)> =
            self.watchers.lock().await.drain().collect();
        info!(
            target: "cc.orchestrator",
            watchers = watchers.len(),
            "Shutting down session orchestrator"
        );

        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut timed_out = 0usize;

        for (bridge_id, mut managed) in watchers {
            managed.handle.cancel();
            match tokio::time::timeout_at(deadline_at, &mut managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(target: "cc.orchestrator", bridge_id = %bridge_id, "Watcher stopped");
                }
                Ok(Err(e)) => {
                    if e.is_panic() {
                        record_watcher_panic();
                    }
                    warn!(target: "cc.orchestrator", bridge_id = %bridge_id, error = ?e, "Watcher failed during shutdown");
                }
                Err(_) => {
                    warn!(target: "cc.orchestrator", bridge_id = %bridge_id, "Watcher shutdown timed out");
                    managed.task_handle.abort();
                    timed_out += 1;
                }
            }
        }
        set_watchers_active(0);

        if timed_out > 0 {
            return Err(CcError::Timeout(format!(
                "{timed_out} watcher(s) to stop"
            )));
        }
        info!(target: "cc.orchestrator", "Session orchestrator shutdown complete");
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<(), CcError> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CcError::Draining)
        }
    }

    fn normalize_endpoints<S: AsRef<str>>(
        &self,
        endpoints: &[S],
    ) -> Result<Vec<EndpointAddress>, CcError> {
        endpoints
            .iter()
            .map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.is_empty() || raw.starts_with('/') || raw.ends_with('/') {
                    return Err(CcError::InvalidArgument(format!(
                        "invalid endpoint address: {raw:?}"
                    )));
                }
                Ok(EndpointAddress::normalize(
                    raw,
                    &self.policy.default_technology,
                ))
            })
            .collect()
    }

    /// Originate endpoints in order, stopping at the first failure.
    async fn originate_all(
        &self,
        watcher: &BridgeWatcherHandle,
        endpoints: &[EndpointAddress],
    ) -> Result<Vec<ChannelId>, CcError> {
        let mut joined = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            joined.push(self.originate(watcher, endpoint).await?);
        }
        Ok(joined)
    }

    async fn originate(
        &self,
        watcher: &BridgeWatcherHandle,
        endpoint: &EndpointAddress,
    ) -> Result<ChannelId, CcError> {
        let bridge_id = watcher.bridge_id();
        let channel_id = self.registry.create_channel(endpoint.clone()).await;

        if let Err(e) = watcher.expect_party(channel_id).await {
            self.discard_channel(channel_id).await;
            return Err(e);
        }

        let mut channel_created = false;
        let result = self
            .connect_party(bridge_id, channel_id, endpoint, &mut channel_created)
            .await;

        match result {
            Ok(()) => {
                debug!(
                    target: "cc.orchestrator",
                    bridge_id = %bridge_id,
                    channel_id = %channel_id,
                    endpoint = %endpoint,
                    "Party connected"
                );
                Ok(channel_id)
            }
            Err(e) => {
                warn!(
                    target: "cc.orchestrator",
                    bridge_id = %bridge_id,
                    channel_id = %channel_id,
                    endpoint = %endpoint,
                    error = %e,
                    "Origination failed"
                );
                if channel_created {
                    if let Err(hang_up) =
                        instrumented(SignalingCommand::HangUp, self.backend.hang_up(channel_id))
                            .await
                    {
                        debug!(target: "cc.orchestrator", channel_id = %channel_id, error = %hang_up, "Hang-up after failed origination failed");
                    }
                }
                self.discard_channel(channel_id).await;
                if let Err(abandon) = watcher.abandon_party(channel_id).await {
                    debug!(target: "cc.orchestrator", channel_id = %channel_id, error = %abandon, "Watcher already gone");
                }
                Err(e)
            }
        }
    }

    async fn connect_party(
        &self,
        bridge_id: BridgeId,
        channel_id: ChannelId,
        endpoint: &EndpointAddress,
        channel_created: &mut bool,
    ) -> Result<(), CcError> {
        instrumented(
            SignalingCommand::CreateChannel,
            self.backend.create_channel(channel_id, endpoint),
        )
        .await?;
        *channel_created = true;

        let dial_timeout = self.policy.dial_timeout;
        instrumented(SignalingCommand::Dial, async {
            tokio::time::timeout(dial_timeout, self.backend.dial(channel_id, dial_timeout))
                .await
                .map_err(|_| CcError::Timeout(format!("{endpoint} to answer")))
                .and_then(|result| result)
        })
        .await?;
        self.registry
            .set_dial_state(channel_id, DialState::Connected)
            .await?;

        instrumented(
            SignalingCommand::AddToBridge,
            self.backend.add_to_bridge(bridge_id, channel_id),
        )
        .await?;

        self.registry.add_member(bridge_id, channel_id).await?;
        Ok(())
    }

    async fn discard_channel(&self, channel_id: ChannelId) {
        if let Err(e) = self.registry.delete_channel(channel_id).await {
            debug!(target: "cc.orchestrator", channel_id = %channel_id, error = %e, "Channel record already gone");
        }
    }

    /// Remove finished watchers, logging any that panicked.
    async fn reap_watchers(&self) {
        let finished: Vec<(BridgeId, ManagedWatcher)> = {
            let mut watchers = self.watchers.lock().await;
            let ids: Vec<BridgeId> = watchers
                .iter()
                .filter(|(_, managed)| managed.task_handle.is_finished())
                .map(|(bridge_id, _)| *bridge_id)
                .collect();
            let finished = ids
                .into_iter()
                .filter_map(|bridge_id| watchers.remove(&bridge_id).map(|m| (bridge_id, m)))
                .collect();
            set_watchers_active(watchers.len());
            finished
        };

        for (bridge_id, managed) in finished {
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(target: "cc.orchestrator", bridge_id = %bridge_id, "Watcher reaped");
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "cc.orchestrator",
                        bridge_id = %bridge_id,
                        error = ?join_error,
                        "Watcher panicked"
                    );
                    record_watcher_panic();
                }
                Err(join_error) => {
                    debug!(target: "cc.orchestrator", bridge_id = %bridge_id, error = ?join_error, "Watcher cancelled");
                }
            }
        }
    }
}
