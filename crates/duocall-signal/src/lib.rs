//! Signaling for duocall — the message protocol exchanged through the
//! relay, and an in-process relay hub implementing the relay contract
//! for tests and demos.
//!
//! The relay is deliberately dumb: it assigns participant ids, tracks
//! room membership (capacity two) and forwards addressed frames
//! point-to-point. No negotiation logic lives here — media flows
//! directly between peers once negotiation completes, bypassing the
//! relay entirely.

pub mod message;
pub mod relay;

pub use message::SignalingMessage;
pub use relay::{LocalRelay, RelayConnection, RelayReceiver, RelaySender, SignalSender};
