//! Call-type classification.
//!
//! A bridge is a two-party `Call` until a third party joins, at which point it
//! becomes a `Conference` for the rest of its life. Classification never
//! reverts: a conference that shrinks back to two members stays a conference.

use serde::Serialize;
use std::fmt;

/// Call type of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Strictly two-party call.
    Call,
    /// Three-or-more-party conference (monotonic once reached).
    Conference,
}

impl CallType {
    /// Returns the call type as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallType::Call => "call",
            CallType::Conference => "conference",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Largest membership a `Call` can have.
pub const CALL_MAX_MEMBERS: usize = 2;

/// Recompute the call type after a membership change.
#[must_use]
pub fn classify(current: CallType, member_count: usize) -> CallType {
    if member_count > CALL_MAX_MEMBERS {
        CallType::Conference
    } else {
        current
    }
}

/// Call type of a bridge created for `endpoint_count` invited endpoints,
/// before any membership event is observed.
#[must_use]
pub fn initial_type(endpoint_count: usize) -> CallType {
    classify(CallType::Call, endpoint_count)
}
