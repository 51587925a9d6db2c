//! Call Controller
//!
//! Event-driven call session manager on top of Asterisk ARI.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Start health HTTP server (liveness, readiness, metrics)
//! 4. Create the ARI backend and start its event listener
//! 5. Start the inbound call intake (if enabled)
//! 6. Create the session orchestrator
//! 7. Start the console intake (if enabled)
//! 8. Wait for a shutdown signal or `quit`

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use call_controller::config::Config;
use call_controller::console::{run_console, ConsoleExit};
use call_controller::inbound::InboundIntake;
use call_controller::observability::{health_router, init_metrics_recorder, HealthState};
use call_controller::orchestrator::SessionOrchestrator;
use call_controller::registry::SessionRegistry;
use call_controller::signaling::ari::AriBackend;
use call_controller::signaling::SignalingBackend;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Call Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        cc_id = %config.cc_id,
        ari_url = %config.ari_url,
        ari_ws_url = %config.ari_ws_url,
        ari_application = %config.ari_application,
        health_bind_address = %config.health_bind_address,
        console_enabled = config.console_enabled,
        inbound_enabled = config.inbound_enabled,
        dial_timeout_seconds = config.policy.dial_timeout.as_secs(),
        conference_min_members = config.policy.conference_min_members,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = health_router(Arc::clone(&health_state))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // ARI backend: REST commands plus the event stream
    let ari = AriBackend::new(&config).map_err(|e| {
        error!(error = %e, "Failed to create ARI backend");
        e
    })?;
    let listener_handle =
        ari.spawn_event_listener(Arc::clone(&health_state), shutdown_token.child_token());
    let inbound_calls = ari.take_inbound_calls().await;
    let backend: Arc<dyn SignalingBackend> = Arc::new(ari);
    info!(ari_url = %config.ari_url, "ARI backend initialized");

    // Inbound calls are answered and greeted; dropping the queue leaves them ringing
    let inbound_handle = match inbound_calls {
        Some(calls) if config.inbound_enabled => {
            let intake = InboundIntake::new(Arc::clone(&backend), config.greeting_sound.clone());
            Some(tokio::spawn(intake.run(calls, shutdown_token.child_token())))
        }
        _ => None,
    };

    let orchestrator = Arc::new(SessionOrchestrator::new(
        SessionRegistry::new(),
        backend,
        config.policy.clone(),
        shutdown_token.child_token(),
    ));

    // Console intake; `quit` ends it and triggers shutdown
    let console_token = shutdown_token.child_token();
    let console_handle = if config.console_enabled {
        let orchestrator = Arc::clone(&orchestrator);
        let token = console_token.clone();
        Some(tokio::spawn(async move {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            match run_console(orchestrator, input, tokio::io::stdout(), token).await {
                Ok(exit) => exit,
                Err(e) => {
                    warn!(target: "cc.console", error = %e, "Console I/O failed");
                    ConsoleExit::EndOfInput
                }
            }
        }))
    } else {
        None
    };

    info!("Call Controller running - press Ctrl+C to shutdown");
    wait_for_shutdown(console_handle).await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so traffic stops
    health_state.set_not_ready();
    console_token.cancel();

    if let Err(e) = orchestrator.shutdown(config.shutdown_timeout).await {
        warn!(error = %e, "Orchestrator shutdown error");
    }

    shutdown_token.cancel();
    if let Err(e) = listener_handle.await {
        warn!(error = %e, "Event listener task failed");
    }
    if let Some(handle) = inbound_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Inbound intake task failed");
        }
    }

    info!("Call Controller shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, or for the console to quit.
///
/// Closed console input alone does not stop the controller.
async fn wait_for_shutdown(console: Option<tokio::task::JoinHandle<ConsoleExit>>) {
    let console_quit = async move {
        match console {
            Some(handle) => match handle.await {
                Ok(ConsoleExit::Quit) => {}
                Ok(_) => std::future::pending::<()>().await,
                Err(e) => {
                    error!(error = %e, "Console task failed");
                    std::future::pending::<()>().await;
                }
            },
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = shutdown_signal() => {}
        () = console_quit => {
            info!("Console requested shutdown");
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
