//! Centralized error types for duocall.
//!
//! Uses `thiserror` for ergonomic error definitions. The taxonomy follows
//! the containment policy of the negotiation layer: media failures are
//! user-facing, negotiation failures abort only the current attempt, relay
//! delivery is best-effort, and stale async results are not errors at all
//! (they are discarded with a debug log, so no variant exists for them).

use crate::types::{ParticipantId, RoomId};

/// Failure to acquire the local capture capability. Surfaced to the user;
/// the call is not started.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("media permission denied")]
    PermissionDenied,

    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// A negotiation step that could not be carried out. Contained within the
/// coordinator: the current attempt is abandoned, invariants are restored
/// and the call itself stays up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NegotiationError {
    #[error("an offer is already in flight")]
    OfferInFlight,

    #[error("operation {operation} invalid in signaling state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    #[error("peer connection closed")]
    Closed,
}

/// Signaling delivery failure. Delivery is best-effort; a failed `CallEnd`
/// never blocks local cleanup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("not connected to the relay")]
    Disconnected,

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("no such participant: {0}")]
    UnknownRecipient(ParticipantId),
}

/// Umbrella error for the call session API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    // === API misuse ===
    #[error("{operation} is not valid while the session is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: &'static str,
    },
}

/// Convenience alias for Results using CallError.
pub type CallResult<T> = Result<T, CallError>;
