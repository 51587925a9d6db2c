//! Session scenarios for the Call Controller.
//!
//! Drives the orchestrator against the in-memory signaling backend and
//! injects membership events the way the telephony backend would:
//!
//! - Dial/Join argument validation
//! - Two-party teardown on leave
//! - Conference persistence and monotonic classification
//! - Partial failures and dial timeouts
//! - Idempotent teardown and registry consistency
//! - Shutdown without teardown

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use call_controller::actors::drain_bridge;
use call_controller::classifier::CallType;
use call_controller::config::SessionPolicy;
use call_controller::errors::{CcError, SignalingCommand};
use call_controller::lifecycle::LifecycleState;
use call_controller::orchestrator::SessionOrchestrator;
use call_controller::registry::{ActiveCall, DialState, SessionRegistry};
use call_controller::signaling::mock::{MockSignaling, RecordedCommand};
use call_controller::signaling::SignalingBackend;
use cc_test_utils::{assert_eventually, TestEndpoints, WAIT};
use common::types::{BridgeId, ChannelId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    orchestrator: Arc<SessionOrchestrator>,
    registry: Arc<SessionRegistry>,
    mock: Arc<MockSignaling>,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(SessionPolicy::default())
    }

    fn with_policy(policy: SessionPolicy) -> Self {
        let registry = SessionRegistry::new();
        let mock = Arc::new(MockSignaling::new());
        let backend: Arc<dyn SignalingBackend> = mock.clone();
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::clone(&registry),
            backend,
            policy,
            CancellationToken::new(),
        ));
        Self {
            orchestrator,
            registry,
            mock,
        }
    }

    async fn call(&self, bridge_id: BridgeId) -> Option<ActiveCall> {
        self.orchestrator
            .list_active_calls()
            .await
            .into_iter()
            .find(|call| call.bridge_id == bridge_id)
    }

    async fn members(&self, bridge_id: BridgeId) -> Vec<ChannelId> {
        self.registry.members(bridge_id).await.unwrap()
    }

    async fn wait_for_state(&self, bridge_id: BridgeId, state: LifecycleState) {
        let orchestrator = Arc::clone(&self.orchestrator);
        assert_eventually(WAIT, &format!("bridge reaches {state}"), move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                matches!(
                    orchestrator.watcher_state(bridge_id).await,
                    Ok(watcher) if watcher.lifecycle == state
                )
            }
        })
        .await;
    }

    async fn wait_for_removal(&self, bridge_id: BridgeId) {
        let registry = Arc::clone(&self.registry);
        assert_eventually(WAIT, "bridge removed from registry", move || {
            let registry = Arc::clone(&registry);
            async move { !registry.contains_bridge(bridge_id).await }
        })
        .await;
    }

    async fn wait_for_members(&self, bridge_id: BridgeId, count: usize) {
        let registry = Arc::clone(&self.registry);
        assert_eventually(WAIT, &format!("bridge has {count} members"), move || {
            let registry = Arc::clone(&registry);
            async move { registry.member_count(bridge_id).await.ok() == Some(count) }
        })
        .await;
    }
}

// ============================================================================
// Argument Validation
// ============================================================================

#[tokio::test]
async fn test_dial_needs_two_endpoints() {
    let harness = Harness::new();

    for endpoints in [Vec::new(), TestEndpoints::new(1).build()] {
        let result = harness.orchestrator.dial(&endpoints).await;
        assert!(matches!(result, Err(CcError::InvalidArgument(_))));
    }

    assert_eq!(harness.registry.bridge_count().await, 0);
    assert_eq!(harness.registry.channel_count().await, 0);
    assert!(harness.mock.commands().await.is_empty());
}

#[tokio::test]
async fn test_join_unknown_bridge_changes_nothing() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();
    let before = harness.orchestrator.list_active_calls().await;
    let commands_before = harness.mock.commands().await.len();

    let result = harness
        .orchestrator
        .join(BridgeId::new(), &TestEndpoints::new(1).starting_at(6000).build())
        .await;

    assert!(matches!(result, Err(CcError::BridgeNotFound(_))));
    assert!(result.unwrap_err().is_not_found());
    assert_eq!(harness.orchestrator.list_active_calls().await, before);
    assert_eq!(harness.registry.channel_count().await, 2);
    assert!(harness.registry.contains_bridge(bridge_id).await);
    // No signaling command beyond the join/announce traffic of the dial.
    let commands = harness.mock.commands().await;
    assert!(commands[commands_before..]
        .iter()
        .all(|c| c.command() == SignalingCommand::PlayAnnouncement));
}

#[tokio::test]
async fn test_join_with_no_endpoints() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();

    let empty: [&str; 0] = [];
    let result = harness.orchestrator.join(bridge_id, &empty).await;

    assert!(matches!(result, Err(CcError::InvalidArgument(_))));
    assert_eq!(harness.registry.member_count(bridge_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_bare_extensions_get_default_technology() {
    let harness = Harness::new();

    let bridge_id = harness
        .orchestrator
        .dial(&["5000", "SIP/alice"])
        .await
        .unwrap();

    let call = harness.call(bridge_id).await.unwrap();
    let endpoints: Vec<&str> = call.members.iter().map(|m| m.endpoint.as_str()).collect();
    assert_eq!(endpoints, vec!["PJSIP/5000", "SIP/alice"]);

    let created: Vec<String> = harness
        .mock
        .commands()
        .await
        .into_iter()
        .filter_map(|c| match c {
            RecordedCommand::CreateChannel(_, endpoint) => Some(endpoint.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec!["PJSIP/5000", "SIP/alice"]);
}

// ============================================================================
// Two-Party Calls
// ============================================================================

#[tokio::test]
async fn test_two_party_dial_becomes_active_call() {
    let harness = Harness::new();

    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();

    harness.wait_for_state(bridge_id, LifecycleState::Active).await;
    let call = harness.call(bridge_id).await.unwrap();
    assert_eq!(call.call_type, CallType::Call);
    assert_eq!(call.members.len(), 2);
    assert!(call
        .members
        .iter()
        .all(|m| m.dial_state == DialState::Connected));
    assert_eq!(harness.mock.count(SignalingCommand::CreateBridge).await, 1);
    assert_eq!(harness.mock.count(SignalingCommand::Dial).await, 2);
}

#[tokio::test]
async fn test_call_drains_when_one_party_leaves() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;
    let members = harness.members(bridge_id).await;

    harness.mock.emit_party_left(bridge_id, members[0]).await;
    harness.wait_for_removal(bridge_id).await;

    assert_eq!(harness.mock.hung_up().await, vec![members[1]]);
    assert_eq!(harness.mock.deleted_bridges().await, vec![bridge_id]);
    assert!(harness.orchestrator.list_active_calls().await.is_empty());
    assert_eq!(harness.registry.channel_count().await, 0);

    let announcements = harness.mock.announcements(bridge_id).await;
    assert_eq!(
        announcements.last().map(String::as_str),
        Some(harness.orchestrator.policy().leave_sound.as_str())
    );
}

#[tokio::test]
async fn test_session_end_drains_regardless_of_membership() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(3).build())
        .await
        .unwrap();
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;
    let members = harness.members(bridge_id).await;

    harness.mock.emit_session_ended(bridge_id).await;
    harness.wait_for_removal(bridge_id).await;

    assert_eq!(harness.mock.hung_up().await, members);
    assert_eq!(harness.mock.deleted_bridges().await, vec![bridge_id]);
}

// ============================================================================
// Conferences
// ============================================================================

#[tokio::test]
async fn test_conference_survives_leave_and_never_reverts() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(3).build())
        .await
        .unwrap();
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;
    assert_eq!(
        harness.registry.get_call_type(bridge_id).await.unwrap(),
        CallType::Conference
    );
    let members = harness.members(bridge_id).await;

    harness.mock.emit_party_left(bridge_id, members[0]).await;
    harness.wait_for_members(bridge_id, 2).await;

    let call = harness.call(bridge_id).await.unwrap();
    assert_eq!(call.call_type, CallType::Conference);
    assert!(harness.mock.hung_up().await.is_empty());
    assert!(harness.mock.deleted_bridges().await.is_empty());
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;

    harness.mock.emit_party_left(bridge_id, members[1]).await;
    harness.wait_for_members(bridge_id, 1).await;
    assert_eq!(
        harness.registry.get_call_type(bridge_id).await.unwrap(),
        CallType::Conference
    );

    // Below the floor of one member.
    harness.mock.emit_party_left(bridge_id, members[2]).await;
    harness.wait_for_removal(bridge_id).await;
    assert_eq!(harness.mock.deleted_bridges().await, vec![bridge_id]);
    assert!(harness.mock.hung_up().await.is_empty());
}

#[tokio::test]
async fn test_conference_floor_is_configurable() {
    let harness = Harness::with_policy(SessionPolicy {
        conference_min_members: 3,
        ..SessionPolicy::default()
    });
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(3).build())
        .await
        .unwrap();
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;
    let members = harness.members(bridge_id).await;

    harness.mock.emit_party_left(bridge_id, members[0]).await;
    harness.wait_for_removal(bridge_id).await;

    assert_eq!(harness.mock.hung_up().await, members[1..].to_vec());
}

#[tokio::test]
async fn test_join_turns_call_into_conference() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();
    assert_eq!(
        harness.registry.get_call_type(bridge_id).await.unwrap(),
        CallType::Call
    );

    harness
        .orchestrator
        .join(bridge_id, &TestEndpoints::new(1).starting_at(6000).build())
        .await
        .unwrap();

    let call = harness.call(bridge_id).await.unwrap();
    assert_eq!(call.call_type, CallType::Conference);
    assert_eq!(call.members.len(), 3);
    assert_eq!(call.members[2].endpoint.as_str(), "PJSIP/6000");

    // A leave now keeps the bridge alive.
    harness.mock.emit_party_left(bridge_id, call.members[0].channel_id).await;
    harness.wait_for_members(bridge_id, 2).await;
    assert!(harness.registry.contains_bridge(bridge_id).await);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_endpoint_keeps_joined_parties() {
    let harness = Harness::new();
    let endpoints = TestEndpoints::new(3).build();
    harness.mock.fail_endpoint(endpoints[1].as_str()).await;

    let result = harness.orchestrator.dial(&endpoints).await;

    assert!(matches!(
        result,
        Err(CcError::CommandFailed {
            command: SignalingCommand::CreateChannel,
            ..
        })
    ));
    // The third endpoint was never attempted.
    assert_eq!(harness.mock.count(SignalingCommand::CreateChannel).await, 2);

    let calls = harness.orchestrator.list_active_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].members.len(), 1);
    assert_eq!(calls[0].members[0].endpoint.as_str(), "PJSIP/5000");
    assert_eq!(harness.registry.channel_count().await, 1);
    harness
        .wait_for_state(calls[0].bridge_id, LifecycleState::Active)
        .await;
}

#[tokio::test]
async fn test_failed_add_hangs_up_the_orphan_channel() {
    let harness = Harness::new();
    harness.mock.fail_command(SignalingCommand::AddToBridge).await;

    let result = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await;

    assert!(matches!(
        result,
        Err(CcError::CommandFailed {
            command: SignalingCommand::AddToBridge,
            ..
        })
    ));
    assert_eq!(harness.mock.hung_up().await.len(), 1);
    assert_eq!(harness.registry.channel_count().await, 0);

    // Nobody joined, so the bridge drains on its own.
    let bridge_id = match harness.mock.commands().await.first() {
        Some(RecordedCommand::CreateBridge(bridge_id)) => *bridge_id,
        other => unreachable!("first command was {other:?}"),
    };
    harness.wait_for_removal(bridge_id).await;
    assert_eq!(harness.mock.deleted_bridges().await, vec![bridge_id]);
}

#[tokio::test(start_paused = true)]
async fn test_dial_times_out_on_unanswered_endpoint() {
    let harness = Harness::with_policy(SessionPolicy {
        dial_timeout: Duration::from_secs(20),
        ..SessionPolicy::default()
    });
    let endpoints = TestEndpoints::new(2).build();
    harness.mock.stall_endpoint(endpoints[1].as_str()).await;

    let started = tokio::time::Instant::now();
    let result = harness.orchestrator.dial(&endpoints).await;

    assert!(matches!(result, Err(CcError::Timeout(_))));
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert_eq!(harness.mock.hung_up().await.len(), 1);

    let calls = harness.orchestrator.list_active_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].members.len(), 1);
    assert_eq!(harness.registry.channel_count().await, 1);
}

#[tokio::test]
async fn test_bridge_creation_failure_is_reported() {
    let harness = Harness::new();
    harness.mock.fail_command(SignalingCommand::CreateBridge).await;

    let err = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "command_failed");
    assert!(harness.orchestrator.list_active_calls().await.is_empty());
    assert_eq!(harness.mock.count(SignalingCommand::CreateChannel).await, 0);
}

#[tokio::test]
async fn test_teardown_failures_still_purge_registry() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;
    harness.mock.fail_command(SignalingCommand::HangUp).await;
    harness.mock.fail_command(SignalingCommand::DeleteBridge).await;

    harness.mock.emit_session_ended(bridge_id).await;
    harness.wait_for_removal(bridge_id).await;

    assert_eq!(harness.registry.channel_count().await, 0);
    assert_eq!(harness.mock.count(SignalingCommand::HangUp).await, 2);
}

// ============================================================================
// Teardown Consistency
// ============================================================================

#[tokio::test]
async fn test_racing_drains_remove_bridge_once() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;

    let backend: Arc<dyn SignalingBackend> = harness.mock.clone();
    let policy = harness.orchestrator.policy().clone();
    let (first, second) = tokio::join!(
        drain_bridge(&harness.registry, backend.as_ref(), &policy, bridge_id),
        drain_bridge(&harness.registry, backend.as_ref(), &policy, bridge_id),
    );

    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let failure = if first.is_err() { first } else { second };
    assert!(failure.unwrap_err().is_not_found());

    assert!(!harness.registry.contains_bridge(bridge_id).await);
    assert!(matches!(
        harness.registry.members(bridge_id).await,
        Err(CcError::BridgeNotFound(_))
    ));
}

#[tokio::test]
async fn test_duplicate_end_events_tear_down_once() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();
    let members = harness.members(bridge_id).await;

    harness.mock.emit_party_left(bridge_id, members[0]).await;
    harness.mock.emit_party_left(bridge_id, members[1]).await;
    harness.mock.emit_session_ended(bridge_id).await;
    harness.wait_for_removal(bridge_id).await;

    // Once the watcher has exited nothing else can tear the bridge down.
    let orchestrator = Arc::clone(&harness.orchestrator);
    assert_eventually(WAIT, "watcher exits", move || {
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.status().await.watchers == 0 }
    })
    .await;

    assert_eq!(harness.mock.deleted_bridges().await, vec![bridge_id]);
}

#[tokio::test]
async fn test_no_dangling_references_under_churn() {
    let harness = Harness::new();
    let mut bridges = Vec::new();
    for i in 0..8u32 {
        let count = 2 + (i as usize % 3);
        let endpoints = TestEndpoints::new(count).starting_at(7000 + i * 10).build();
        let bridge_id = harness.orchestrator.dial(&endpoints).await.unwrap();
        bridges.push((bridge_id, count));
    }

    for (i, (bridge_id, _)) in bridges.iter().enumerate() {
        let members = harness.members(*bridge_id).await;
        if i % 2 == 0 {
            harness.mock.emit_party_left(*bridge_id, members[0]).await;
        } else {
            harness.mock.emit_session_ended(*bridge_id).await;
        }
        assert!(harness.registry.dangling_members().await.is_empty());
    }

    // Calls and ended sessions drain; conferences lose one member.
    for (i, (bridge_id, count)) in bridges.iter().enumerate() {
        if i % 2 == 1 || *count == 2 {
            harness.wait_for_removal(*bridge_id).await;
        } else {
            harness.wait_for_members(*bridge_id, count - 1).await;
        }
    }

    assert!(harness.registry.dangling_members().await.is_empty());
    let calls = harness.orchestrator.list_active_calls().await;
    assert_eq!(calls.len(), 2);
    for call in calls {
        assert_eq!(call.call_type, CallType::Conference);
        for member in call.members {
            let channel = harness.registry.channel(member.channel_id).await.unwrap();
            assert_eq!(channel.bridge_id, Some(call.bridge_id));
        }
    }
    assert_eq!(harness.registry.channel_count().await, 5);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_keeps_live_bridges() {
    let harness = Harness::new();
    let bridge_id = harness
        .orchestrator
        .dial(&TestEndpoints::new(2).build())
        .await
        .unwrap();
    harness.wait_for_state(bridge_id, LifecycleState::Active).await;

    harness
        .orchestrator
        .shutdown(Duration::from_secs(1))
        .await
        .unwrap();

    assert!(harness.registry.contains_bridge(bridge_id).await);
    assert!(harness.mock.hung_up().await.is_empty());
    assert!(harness.mock.deleted_bridges().await.is_empty());
    assert!(matches!(
        harness
            .orchestrator
            .dial(&TestEndpoints::new(2).build())
            .await,
        Err(CcError::Draining)
    ));

    // Watchers are gone, so events no longer drive teardown.
    harness.mock.emit_session_ended(bridge_id).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.registry.contains_bridge(bridge_id).await);
}
