//! Peer connection adapter.
//!
//! Wraps the opaque peer-connection primitive behind [`PeerBackend`] and
//! exposes the negotiation operations the coordinator needs. The
//! primitive owns ICE gathering, candidate trickling, DTLS and transport;
//! none of that is modeled here. The adapter adds two things the
//! primitive does not give us: idempotent track attachment, and event
//! tagging with the owning session's identity so a stale backend's
//! events can be recognized and discarded.

use crate::media::{MediaHandle, MediaTrack};
use duocall_common::{NegotiationError, Sdp, SdpKind};
use std::collections::HashSet;
use uuid::Uuid;

/// Local view of the underlying connection's signaling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

impl SignalingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::HaveLocalOffer => "have-local-offer",
            Self::HaveRemoteOffer => "have-remote-offer",
        }
    }
}

/// Events the primitive pushes up to the session, tagged with the
/// session identity the backend was built for.
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub session_id: Uuid,
    pub kind: PeerEventKind,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    /// Tracks or transceivers changed; a fresh offer should be produced.
    NegotiationNeeded,
    /// Inbound media arrived from the remote peer.
    TrackReceived(MediaHandle),
}

/// The opaque peer-connection primitive.
///
/// Implementations must reject operations that are invalid in the
/// current signaling state with [`NegotiationError`], and must treat a
/// remote offer arriving in `have-local-offer` as an implicit rollback
/// of the pending local offer (the coordinator only takes that path on
/// the polite side).
pub trait PeerBackend {
    fn create_offer(
        &mut self,
    ) -> impl Future<Output = Result<Sdp, NegotiationError>> + Send;

    fn create_answer(
        &mut self,
    ) -> impl Future<Output = Result<Sdp, NegotiationError>> + Send;

    fn set_local_description(
        &mut self,
        sdp: Sdp,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    fn set_remote_description(
        &mut self,
        sdp: Sdp,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    fn add_track(
        &mut self,
        track: MediaTrack,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    fn signaling_state(&self) -> SignalingState;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Adapter owned by a call session.
pub struct PeerAdapter<B: PeerBackend> {
    backend: B,
    attached: HashSet<Uuid>,
}

impl<B: PeerBackend> PeerAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            attached: HashSet::new(),
        }
    }

    /// Generate a local offer. Does not change signaling state; that
    /// happens when the offer is applied locally.
    pub async fn create_offer(&mut self) -> Result<Sdp, NegotiationError> {
        self.backend.create_offer().await
    }

    /// Apply the remote offer, then generate the matching local answer.
    pub async fn create_answer(&mut self, remote: Sdp) -> Result<Sdp, NegotiationError> {
        if remote.kind != SdpKind::Offer {
            return Err(NegotiationError::MalformedDescription(
                "create_answer requires an offer".into(),
            ));
        }
        self.backend.set_remote_description(remote).await?;
        self.backend.create_answer().await
    }

    /// Apply a remote description (answer path; the offer path goes
    /// through [`create_answer`](Self::create_answer)).
    pub async fn apply_remote_description(
        &mut self,
        sdp: Sdp,
    ) -> Result<(), NegotiationError> {
        self.backend.set_remote_description(sdp).await
    }

    /// Complete the local half of an offer/answer handshake.
    pub async fn apply_local_description(
        &mut self,
        sdp: Sdp,
    ) -> Result<(), NegotiationError> {
        self.backend.set_local_description(sdp).await
    }

    /// Attach a local track for outbound sending. Re-attaching an
    /// already-attached track id is a no-op; returns whether the track
    /// was newly attached.
    pub async fn attach_track(
        &mut self,
        track: &MediaTrack,
    ) -> Result<bool, NegotiationError> {
        if !self.attached.insert(track.id) {
            return Ok(false);
        }
        if let Err(e) = self.backend.add_track(track.clone()).await {
            self.attached.remove(&track.id);
            return Err(e);
        }
        Ok(true)
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.backend.signaling_state()
    }

    pub async fn close(&mut self) {
        self.backend.close().await;
    }
}
