//! Inbound call intake.
//!
//! Channels that enter the Stasis application without being originated here
//! are answered and greeted, each on its own task so a slow greeting never
//! holds up the next caller. Inbound channels are not registered as session
//! members; connecting them to a bridge is left to the operator.

use crate::errors::{CcError, SignalingCommand};
use crate::observability::metrics::record_inbound_call;
use crate::signaling::{instrumented, SignalingBackend};

use common::types::InboundChannelId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Answers inbound calls and plays the greeting.
pub struct InboundIntake {
    backend: Arc<dyn SignalingBackend>,
    greeting_sound: String,
}

impl InboundIntake {
    /// `greeting_sound` may be empty to answer without a greeting.
    pub fn new(backend: Arc<dyn SignalingBackend>, greeting_sound: impl Into<String>) -> Self {
        Self {
            backend,
            greeting_sound: greeting_sound.into(),
        }
    }

    /// Answer and greet one inbound channel.
    #[instrument(skip_all, name = "cc.inbound.greet", fields(channel = %channel))]
    pub async fn greet(&self, channel: &InboundChannelId) -> Result<(), CcError> {
        if let Err(e) = instrumented(SignalingCommand::Answer, self.backend.answer(channel)).await
        {
            warn!(target: "cc.inbound", channel = %channel, error = %e, "Failed to answer inbound call");
            record_inbound_call("answer_failed");
            return Err(e);
        }

        if !self.greeting_sound.is_empty() {
            if let Err(e) = instrumented(
                SignalingCommand::PlayToChannel,
                self.backend.play_to_channel(channel, &self.greeting_sound),
            )
            .await
            {
                warn!(target: "cc.inbound", channel = %channel, error = %e, "Failed to play greeting");
                record_inbound_call("greeting_failed");
                return Err(e);
            }
        }

        info!(target: "cc.inbound", channel = %channel, "Inbound call answered");
        record_inbound_call("greeted");
        Ok(())
    }

    /// Greet every channel received on `calls` until cancelled or the queue
    /// closes. Greetings in flight at cancellation are abandoned.
    pub async fn run(
        self,
        mut calls: mpsc::UnboundedReceiver<InboundChannelId>,
        cancel_token: CancellationToken,
    ) {
        let intake = Arc::new(self);
        let mut in_flight = JoinSet::new();
        info!(target: "cc.inbound", "Inbound intake started");

        loop {
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => break,

                Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = finished {
                        warn!(target: "cc.inbound", error = ?e, "Greeting task failed");
                    }
                }

                call = calls.recv() => {
                    let Some(channel) = call else {
                        debug!(target: "cc.inbound", "Inbound queue closed");
                        break;
                    };
                    let intake = Arc::clone(&intake);
                    in_flight.spawn(async move {
                        // Failures are logged and counted by `greet`.
                        let _ = intake.greet(&channel).await;
                    });
                }
            }
        }

        in_flight.abort_all();
        info!(target: "cc.inbound", "Inbound intake stopped");
    }
}
