//! ARI adapter integration tests.
//!
//! Runs the REST side of the adapter against a wiremock server standing in
//! for Asterisk and checks paths, query parameters, authentication and error
//! mapping for every command. Event frames that Asterisk would push over the
//! WebSocket are fed in through `dispatch_event`.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use call_controller::config::{Config, SessionPolicy};
use call_controller::errors::{CcError, SignalingCommand};
use call_controller::observability::HealthState;
use call_controller::orchestrator::SessionOrchestrator;
use call_controller::registry::SessionRegistry;
use call_controller::signaling::ari::AriBackend;
use call_controller::signaling::SignalingBackend;
use cc_test_utils::{assert_eventually, test_config_vars_for, TEST_ARI_PASSWORD, WAIT};
use common::types::{BridgeId, ChannelId, EndpointAddress, InboundChannelId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

fn backend_for(server: &MockServer) -> Result<AriBackend> {
    let mut vars = test_config_vars_for(&server.uri());
    vars.insert("CC_ARI_USERNAME".to_string(), "asterisk".to_string());
    vars.insert("CC_ARI_APPLICATION".to_string(), "callctl".to_string());
    let config = Config::from_vars(&vars)?;
    Ok(AriBackend::new(&config)?)
}

/// Wait until the dial request for `channel_id` reached the server, then
/// deliver `event` as if Asterisk had pushed it.
async fn after_dial_sent(
    server: &MockServer,
    backend: &AriBackend,
    channel_id: ChannelId,
    event: String,
) {
    let dial_path = format!("/ari/channels/{channel_id}/dial");
    let path = dial_path.as_str();
    assert_eventually(WAIT, "dial request sent", move || async move {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .any(|request| request.url.path() == path)
    })
    .await;
    backend.dispatch_event(&event).await;
}

async fn mount_dial(server: &MockServer, channel_id: ChannelId) {
    Mock::given(method("POST"))
        .and(path(format!("/ari/channels/{channel_id}/dial")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(server)
        .await;
}

fn expected_authorization() -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("asterisk:{TEST_ARI_PASSWORD}"))
    )
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_create_bridge_posts_mixing_bridge() -> Result<()> {
    let server = MockServer::start().await;
    let bridge_id = BridgeId::new();

    Mock::given(method("POST"))
        .and(path(format!("/ari/bridges/{bridge_id}")))
        .and(query_param("type", "mixing"))
        .and(header("authorization", expected_authorization().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server)?;
    backend.create_bridge(bridge_id).await?;
    Ok(())
}

#[tokio::test]
async fn test_channel_lifecycle_commands() -> Result<()> {
    let server = MockServer::start().await;
    let bridge_id = BridgeId::new();
    let channel_id = ChannelId::new();

    Mock::given(method("POST"))
        .and(path("/ari/channels/create"))
        .and(query_param("endpoint", "PJSIP/5001"))
        .and(query_param("app", "callctl"))
        .and(query_param("channelId", channel_id.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/ari/bridges/{bridge_id}/addChannel")))
        .and(query_param("channel", channel_id.to_string().as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/ari/bridges/{bridge_id}/play")))
        .and(query_param("media", "sound:confbridge-join"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/ari/channels/{channel_id}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/ari/bridges/{bridge_id}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server)?;
    backend
        .create_channel(channel_id, &EndpointAddress::from("PJSIP/5001"))
        .await?;
    backend.add_to_bridge(bridge_id, channel_id).await?;
    backend
        .play_announcement(bridge_id, "sound:confbridge-join")
        .await?;
    backend.hang_up(channel_id).await?;
    backend.delete_bridge(bridge_id).await?;
    Ok(())
}

#[tokio::test]
async fn test_inbound_answer_and_greeting() -> Result<()> {
    let server = MockServer::start().await;
    let channel = InboundChannelId::from("1700000000.42");

    Mock::given(method("POST"))
        .and(path("/ari/channels/1700000000.42/answer"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/ari/channels/1700000000.42/play"))
        .and(query_param("media", "sound:hello-world"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server)?;
    backend.answer(&channel).await?;
    backend.play_to_channel(&channel, "sound:hello-world").await?;
    Ok(())
}

// ============================================================================
// Dial
// ============================================================================

#[tokio::test]
async fn test_dial_returns_once_answered() -> Result<()> {
    let server = MockServer::start().await;
    let channel_id = ChannelId::new();

    Mock::given(method("POST"))
        .and(path(format!("/ari/channels/{channel_id}/dial")))
        .and(query_param("timeout", "30"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server)?;
    let answered = format!(
        r#"{{"type":"ChannelStateChange","channel":{{"id":"{channel_id}","state":"Up"}}}}"#
    );

    let (result, ()) = tokio::join!(
        backend.dial(channel_id, Duration::from_secs(30)),
        after_dial_sent(&server, &backend, channel_id, answered),
    );
    result?;
    Ok(())
}

#[tokio::test]
async fn test_dial_answer_reported_by_dial_status() -> Result<()> {
    let server = MockServer::start().await;
    let channel_id = ChannelId::new();
    mount_dial(&server, channel_id).await;

    let backend = backend_for(&server)?;
    let answered = format!(
        r#"{{"type":"Dial","caller":{{"id":"1700000000.1"}},"peer":{{"id":"{channel_id}"}},"dialstatus":"ANSWER"}}"#
    );

    let (result, ()) = tokio::join!(
        backend.dial(channel_id, Duration::from_secs(5)),
        after_dial_sent(&server, &backend, channel_id, answered),
    );
    result?;
    Ok(())
}

#[tokio::test]
async fn test_busy_dial_maps_to_command_failed() -> Result<()> {
    let server = MockServer::start().await;
    let channel_id = ChannelId::new();
    mount_dial(&server, channel_id).await;

    let backend = backend_for(&server)?;
    let busy = format!(
        r#"{{"type":"Dial","peer":{{"id":"{channel_id}"}},"dialstatus":"BUSY"}}"#
    );

    let (result, ()) = tokio::join!(
        backend.dial(channel_id, Duration::from_secs(5)),
        after_dial_sent(&server, &backend, channel_id, busy),
    );

    match result {
        Err(CcError::CommandFailed { command, reason }) => {
            assert_eq!(command, SignalingCommand::Dial);
            assert!(reason.contains("BUSY"), "reason: {reason}");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_unanswered_dial_times_out() -> Result<()> {
    let server = MockServer::start().await;
    let channel_id = ChannelId::new();
    mount_dial(&server, channel_id).await;

    let backend = backend_for(&server)?;
    let started = std::time::Instant::now();
    let result = backend.dial(channel_id, Duration::from_millis(200)).await;

    assert!(matches!(result, Err(CcError::Timeout(_))), "got {result:?}");
    assert!(started.elapsed() >= Duration::from_millis(200));

    // A late answer for the abandoned dial is harmless.
    backend
        .dispatch_event(&format!(
            r#"{{"type":"ChannelStateChange","channel":{{"id":"{channel_id}","state":"Up"}}}}"#
        ))
        .await;
    Ok(())
}

#[tokio::test]
async fn test_orchestrated_dial_without_answer_connects_nobody() -> Result<()> {
    let server = MockServer::start().await;

    // Asterisk accepts every command but no endpoint ever picks up.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let backend: Arc<dyn SignalingBackend> = Arc::new(backend_for(&server)?);
    let registry = SessionRegistry::new();
    let orchestrator = SessionOrchestrator::new(
        Arc::clone(&registry),
        backend,
        SessionPolicy {
            dial_timeout: Duration::from_millis(300),
            ..SessionPolicy::default()
        },
        CancellationToken::new(),
    );

    let result = orchestrator.dial(&["5000", "5001"]).await;

    assert!(matches!(result, Err(CcError::Timeout(_))), "got {result:?}");
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(!requests
        .iter()
        .any(|request| request.url.path().ends_with("/addChannel")));
    assert!(requests
        .iter()
        .any(|request| request.method.as_str() == "DELETE"
            && request.url.path().starts_with("/ari/channels/")));

    // Nobody joined, so the bridge drains on its own.
    let observed = Arc::clone(&registry);
    assert_eventually(WAIT, "bridge drained", move || {
        let registry = Arc::clone(&observed);
        async move { registry.bridge_count().await == 0 && registry.channel_count().await == 0 }
    })
    .await;
    Ok(())
}

// ============================================================================
// Error Mapping
// ============================================================================

#[tokio::test]
async fn test_rejected_command_maps_to_command_failed() -> Result<()> {
    let server = MockServer::start().await;
    let bridge_id = BridgeId::new();

    Mock::given(method("DELETE"))
        .and(path(format!("/ari/bridges/{bridge_id}")))
        .respond_with(ResponseTemplate::new(404).set_body_string("Bridge not found"))
        .mount(&server)
        .await;

    let backend = backend_for(&server)?;
    let result = backend.delete_bridge(bridge_id).await;

    match result {
        Err(CcError::CommandFailed { command, reason }) => {
            assert_eq!(command, SignalingCommand::DeleteBridge);
            assert!(reason.contains("404"), "reason: {reason}");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_not_shown_to_operator() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal detail"))
        .mount(&server)
        .await;

    let backend = backend_for(&server)?;
    let err = backend.create_bridge(BridgeId::new()).await.unwrap_err();

    assert_eq!(err.kind(), "command_failed");
    assert!(!err.client_message().contains("internal detail"));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_backend_is_command_failure() -> Result<()> {
    // Nothing listens on port 1.
    let mut vars = test_config_vars_for("http://127.0.0.1:1");
    vars.insert("CC_ARI_USERNAME".to_string(), "asterisk".to_string());
    let backend = AriBackend::new(&Config::from_vars(&vars)?)?;

    let err = backend.hang_up(ChannelId::new()).await.unwrap_err();
    assert!(matches!(
        err,
        CcError::CommandFailed {
            command: SignalingCommand::HangUp,
            ..
        }
    ));
    Ok(())
}

// ============================================================================
// Event Listener
// ============================================================================

#[tokio::test]
async fn test_event_listener_stays_not_ready_without_stream() -> Result<()> {
    let server = MockServer::start().await;
    let backend = backend_for(&server)?;
    let health = Arc::new(HealthState::new());
    let cancel_token = CancellationToken::new();

    // The mock server speaks plain HTTP, so the WebSocket upgrade fails.
    let handle = backend.spawn_event_listener(Arc::clone(&health), cancel_token.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!health.is_ready());

    cancel_token.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;
    assert!(!health.is_ready());
    Ok(())
}
