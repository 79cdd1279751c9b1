//! Signaling messages between call clients and the relay.
//!
//! One tagged union covers both directions. Room bookkeeping variants
//! (`RoomJoin`, `RoomJoined`, `UserJoined`) flow between a client and the
//! relay; the remaining variants are forwarded point-to-point within a
//! room, addressed by the `to` field and stamped with `from` so the
//! receiver learns who sent them.

use duocall_common::{ParticipantId, RoomId, Sdp};
use serde::{Deserialize, Serialize};

/// Signaling messages between call clients and the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SignalingMessage {
    // === Room membership ===
    /// Client → Relay: join (or create) a room.
    #[serde(rename = "room:join")]
    RoomJoin { email: String, room: RoomId },

    /// Relay → Client: join acknowledged, participant id assigned.
    #[serde(rename = "room:joined")]
    RoomJoined {
        email: String,
        room: RoomId,
        participant_id: ParticipantId,
    },

    /// Relay → Client: a second participant joined the room.
    #[serde(rename = "user:joined")]
    UserJoined {
        email: String,
        participant_id: ParticipantId,
    },

    // === Point-to-point (forwarded by the relay) ===
    /// Initial call invitation. Distinct from later renegotiation offers
    /// so the callee knows to also acquire its local media.
    #[serde(rename = "user:call")]
    CallOffer {
        to: ParticipantId,
        from: ParticipantId,
        sdp: Sdp,
    },

    /// Answer to the initial invitation.
    #[serde(rename = "call:accepted")]
    CallAccepted {
        to: ParticipantId,
        from: ParticipantId,
        sdp: Sdp,
    },

    /// Renegotiation offer (tracks changed on an established call).
    #[serde(rename = "peer:nego:needed")]
    NegotiationOffer {
        to: ParticipantId,
        from: ParticipantId,
        sdp: Sdp,
    },

    /// Renegotiation answer.
    #[serde(rename = "peer:nego:final")]
    NegotiationAnswer {
        to: ParticipantId,
        from: ParticipantId,
        sdp: Sdp,
    },

    /// Terminate the call; the receiver releases resources without
    /// replying.
    #[serde(rename = "call:end")]
    CallEnd {
        to: ParticipantId,
        from: ParticipantId,
    },
}

impl SignalingMessage {
    /// Routing target for point-to-point variants. Room bookkeeping
    /// variants are not addressed to a participant.
    pub fn recipient(&self) -> Option<ParticipantId> {
        match self {
            Self::CallOffer { to, .. }
            | Self::CallAccepted { to, .. }
            | Self::NegotiationOffer { to, .. }
            | Self::NegotiationAnswer { to, .. }
            | Self::CallEnd { to, .. } => Some(*to),
            _ => None,
        }
    }

    /// Wire tag, for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RoomJoin { .. } => "room:join",
            Self::RoomJoined { .. } => "room:joined",
            Self::UserJoined { .. } => "user:joined",
            Self::CallOffer { .. } => "user:call",
            Self::CallAccepted { .. } => "call:accepted",
            Self::NegotiationOffer { .. } => "peer:nego:needed",
            Self::NegotiationAnswer { .. } => "peer:nego:final",
            Self::CallEnd { .. } => "call:end",
        }
    }
}
