//! Deterministic in-process stand-ins for the external capabilities:
//! a peer-connection backend that tracks signaling state faithfully and
//! fabricates SDP text, and a media capability that yields static
//! handles. Used by the integration tests and the demo binary.

use crate::adapter::{PeerBackend, PeerEvent, PeerEventKind, SignalingState};
use crate::media::{MediaConstraints, MediaDevices, MediaHandle, MediaTrack};
use duocall_common::{MediaError, NegotiationError, Sdp, SdpKind};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fault injection hooks shared with the test that owns the backend.
#[derive(Debug, Default)]
pub struct LoopbackFaults {
    /// Fail the next `create_offer` call, then reset.
    pub fail_create_offer: bool,
    /// Fail the next `set_remote_description` call, then reset.
    pub fail_set_remote: bool,
}

/// A peer-connection primitive that negotiates against thin air.
///
/// Signaling-state transitions mirror the real primitive, including the
/// implicit rollback when a remote offer lands on top of a pending local
/// offer. `negotiationneeded` fires when a track is added to an already
/// negotiated, stable connection.
pub struct LoopbackBackend {
    session_id: Uuid,
    state: SignalingState,
    events: mpsc::UnboundedSender<PeerEvent>,
    faults: Arc<Mutex<LoopbackFaults>>,
    negotiated: bool,
    closed: bool,
    seq: u32,
}

impl LoopbackBackend {
    pub fn new(session_id: Uuid, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            session_id,
            state: SignalingState::Stable,
            events,
            faults: Arc::new(Mutex::new(LoopbackFaults::default())),
            negotiated: false,
            closed: false,
            seq: 0,
        }
    }

    /// Handle for injecting failures after the backend has been moved
    /// into a session.
    pub fn faults(&self) -> Arc<Mutex<LoopbackFaults>> {
        Arc::clone(&self.faults)
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.closed {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, kind: PeerEventKind) {
        let _ = self.events.send(PeerEvent {
            session_id: self.session_id,
            kind,
        });
    }
}

impl PeerBackend for LoopbackBackend {
    async fn create_offer(&mut self) -> Result<Sdp, NegotiationError> {
        self.ensure_open()?;
        {
            let mut faults = self.faults.lock().expect("faults lock");
            if faults.fail_create_offer {
                faults.fail_create_offer = false;
                return Err(NegotiationError::MalformedDescription(
                    "injected offer failure".into(),
                ));
            }
        }
        if self.state != SignalingState::Stable {
            return Err(NegotiationError::InvalidState {
                operation: "create_offer",
                state: self.state.as_str(),
            });
        }
        self.seq += 1;
        Ok(Sdp::offer(format!(
            "v=0 o=loopback-{} seq={}",
            self.session_id, self.seq
        )))
    }

    async fn create_answer(&mut self) -> Result<Sdp, NegotiationError> {
        self.ensure_open()?;
        if self.state != SignalingState::HaveRemoteOffer {
            return Err(NegotiationError::InvalidState {
                operation: "create_answer",
                state: self.state.as_str(),
            });
        }
        self.seq += 1;
        Ok(Sdp::answer(format!(
            "v=0 o=loopback-{} seq={}",
            self.session_id, self.seq
        )))
    }

    async fn set_local_description(&mut self, sdp: Sdp) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        match (sdp.kind, self.state) {
            (SdpKind::Offer, SignalingState::Stable) => {
                self.state = SignalingState::HaveLocalOffer;
                Ok(())
            }
            (SdpKind::Answer, SignalingState::HaveRemoteOffer) => {
                self.state = SignalingState::Stable;
                self.negotiated = true;
                Ok(())
            }
            (_, state) => Err(NegotiationError::InvalidState {
                operation: "set_local_description",
                state: state.as_str(),
            }),
        }
    }

    async fn set_remote_description(&mut self, sdp: Sdp) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        {
            let mut faults = self.faults.lock().expect("faults lock");
            if faults.fail_set_remote {
                faults.fail_set_remote = false;
                return Err(NegotiationError::MalformedDescription(
                    "injected remote description failure".into(),
                ));
            }
        }
        match (sdp.kind, self.state) {
            (SdpKind::Offer, SignalingState::Stable) => {
                self.state = SignalingState::HaveRemoteOffer;
                Ok(())
            }
            (SdpKind::Offer, SignalingState::HaveLocalOffer) => {
                // Implicit rollback of our pending offer.
                tracing::debug!(
                    session = %self.session_id,
                    "Rolling back pending local offer for remote offer"
                );
                self.state = SignalingState::HaveRemoteOffer;
                Ok(())
            }
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                self.state = SignalingState::Stable;
                self.negotiated = true;
                Ok(())
            }
            (_, state) => Err(NegotiationError::InvalidState {
                operation: "set_remote_description",
                state: state.as_str(),
            }),
        }
    }

    async fn add_track(&mut self, track: MediaTrack) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        tracing::debug!(
            session = %self.session_id,
            track = %track.id,
            "Track attached"
        );
        // A track added to an established connection requires a fresh
        // offer; before the first negotiation the initial offer covers it.
        if self.negotiated && self.state == SignalingState::Stable {
            self.emit(PeerEventKind::NegotiationNeeded);
        }
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// Media capability returning static handles, with an optional injected
/// denial for the acquisition-failure path.
pub struct StaticMediaDevices {
    deny: Option<MediaError>,
    acquired: Arc<Mutex<Vec<MediaHandle>>>,
}

impl StaticMediaDevices {
    pub fn new() -> Self {
        Self {
            deny: None,
            acquired: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A capability that refuses every acquisition with `error`.
    pub fn denying(error: MediaError) -> Self {
        Self {
            deny: Some(error),
            acquired: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handles handed out so far; grab the Arc before moving the
    /// capability into a session.
    pub fn acquired(&self) -> Arc<Mutex<Vec<MediaHandle>>> {
        Arc::clone(&self.acquired)
    }
}

impl Default for StaticMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDevices for StaticMediaDevices {
    async fn acquire(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<MediaHandle, MediaError> {
        if let Some(err) = self.deny.clone() {
            return Err(err);
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::audio("loopback-mic"));
        }
        if constraints.video {
            tracks.push(MediaTrack::video("loopback-camera"));
        }
        let handle = MediaHandle::new(tracks);
        self.acquired
            .lock()
            .expect("acquired lock")
            .push(handle.clone());
        Ok(handle)
    }
}
