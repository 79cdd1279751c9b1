//! Call session core for duocall: per-call state machine, perfect
//! negotiation, media handle lifecycle and the single-task event loop
//! that drives them.
//!
//! The crate is written against three capability seams — [`PeerBackend`]
//! for the peer-connection primitive, [`MediaDevices`] for capture, and
//! the relay's `SignalSender` — so the core can run unchanged against a
//! real WebRTC stack or the deterministic loopback doubles in
//! [`loopback`].

pub mod adapter;
pub mod driver;
pub mod loopback;
pub mod media;
pub mod negotiation;
pub mod session;

pub use adapter::{PeerAdapter, PeerBackend, PeerEvent, PeerEventKind, SignalingState};
pub use driver::{SessionCommand, drive};
pub use media::{MediaConstraints, MediaDevices, MediaHandle, MediaTrack, TrackKind};
pub use negotiation::{Coordinator, NegotiationPhase, NegotiationState};
pub use session::{CallSession, CallStatus, RemotePeer, SessionNotice, new_session_id};
