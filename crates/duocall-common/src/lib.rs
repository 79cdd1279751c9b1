//! Shared building blocks for duocall: identifiers, session descriptions,
//! the error taxonomy and application configuration.

pub mod config;
pub mod error;
pub mod types;

pub use error::{CallError, CallResult, MediaError, NegotiationError, RelayError};
pub use types::{ParticipantId, RoomId, Sdp, SdpKind};
