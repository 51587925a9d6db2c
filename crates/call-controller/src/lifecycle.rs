//! Bridge lifecycle states and transition decisions.
//!
//! ```text
//! Forming ──all parties joined──▶ Active ──end condition──▶ Draining ──purged──▶ Destroyed
//!    │                              ↺ party joined (reclassify)
//!    └──────────────end condition──────────────────────────────▲
//! ```
//!
//! The functions here are pure; the watcher actor applies them against the
//! session registry and issues the resulting signaling commands.

use crate::classifier::CallType;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Endpoints are being originated; not all have joined yet.
    Forming,
    /// Every requested party has joined (or origination finished).
    Active,
    /// An end condition was observed; teardown is in progress.
    Draining,
    /// Terminal; the bridge has been purged from the registry.
    Destroyed,
}

impl LifecycleState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Forming => "forming",
            LifecycleState::Active => "active",
            LifecycleState::Draining => "draining",
            LifecycleState::Destroyed => "destroyed",
        }
    }

    /// Whether the bridge still reacts to membership events.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, LifecycleState::Forming | LifecycleState::Active)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a bridge started draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// A party left a two-party call.
    CallPartyLeft,
    /// Membership fell below the conference floor.
    BelowFloor,
    /// The session ended (bridge destroyed by the backend).
    SessionEnded,
    /// Origination finished without a single party joining.
    NoParties,
}

impl DrainReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DrainReason::CallPartyLeft => "call_party_left",
            DrainReason::BelowFloor => "below_floor",
            DrainReason::SessionEnded => "session_ended",
            DrainReason::NoParties => "no_parties",
        }
    }
}

/// Decide whether a party leaving must drain the bridge.
///
/// Two-party calls end as soon as anyone leaves. Conferences persist until
/// fewer than `conference_min_members` remain.
#[must_use]
pub fn drain_after_leave(
    call_type: CallType,
    remaining: usize,
    conference_min_members: usize,
) -> Option<DrainReason> {
    match call_type {
        CallType::Call => Some(DrainReason::CallPartyLeft),
        CallType::Conference if remaining < conference_min_members => {
            Some(DrainReason::BelowFloor)
        }
        CallType::Conference => None,
    }
}

/// State to enter once the originating request has finished.
///
/// A bridge nobody joined can never see a leave event, so it drains.
#[must_use]
pub fn after_origination(member_count: usize, pending_parties: usize) -> Transition {
    if member_count == 0 && pending_parties == 0 {
        Transition::Drain(DrainReason::NoParties)
    } else if pending_parties == 0 {
        Transition::To(LifecycleState::Active)
    } else {
        Transition::Stay
    }
}

/// Outcome of a transition decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Remain in the current state.
    Stay,
    /// Move to the given (non-draining) state.
    To(LifecycleState),
    /// Start draining.
    Drain(DrainReason),
}
