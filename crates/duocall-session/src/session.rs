//! Call session manager — owns one call's lifecycle from "nobody else
//! here" through negotiation and active media to teardown.
//!
//! A session is constructed per call and disposed of when the call ends;
//! `Ended` is terminal and calling again means building a new session.
//! That construction discipline, plus the session identity stamped on
//! every peer event, is what keeps async results from an old call from
//! leaking into a new one.
//!
//! The session only mutates its own `CallStatus`; negotiation
//! bookkeeping lives in the [`Coordinator`] and is mutated only there.

use crate::adapter::{PeerAdapter, PeerBackend, PeerEvent, PeerEventKind};
use crate::media::{MediaConstraints, MediaDevices, MediaHandle, MediaTrack};
use crate::negotiation::{Coordinator, NegotiationState};
use chrono::{DateTime, Utc};
use duocall_common::{CallError, CallResult, NegotiationError, ParticipantId, Sdp};
use duocall_signal::{SignalSender, SignalingMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Mint a session identity. Time-sortable so logs line up.
pub fn new_session_id() -> Uuid {
    Uuid::now_v7()
}

/// Call lifecycle. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    NoPeer,
    PeerPresent,
    Negotiating,
    Active,
    Ended,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPeer => "no-peer",
            Self::PeerPresent => "peer-present",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

/// The one remote participant this session tracks.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    pub id: ParticipantId,
    /// Known from `UserJoined`; an incoming call only carries the id.
    pub email: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// Notifications pushed to the presentation layer. Never a gate on any
/// transition: `RemoteStream` in particular is a readiness signal, the
/// session goes `Active` without waiting for it.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    PeerJoined {
        email: String,
        participant_id: ParticipantId,
    },
    LocalStream(MediaHandle),
    RemoteStream(MediaHandle),
    CallActive,
    CallEnded,
    MediaUnavailable(String),
}

/// One call's state machine:
/// `NoPeer → PeerPresent → Negotiating → Active → Ended`.
pub struct CallSession<B, M, S>
where
    B: PeerBackend,
    M: MediaDevices,
    S: SignalSender,
{
    session_id: Uuid,
    local_id: ParticipantId,
    email: String,
    status: CallStatus,
    remote: Option<RemotePeer>,
    adapter: PeerAdapter<B>,
    coordinator: Coordinator,
    devices: M,
    constraints: MediaConstraints,
    local_media: Option<MediaHandle>,
    remote_media: Option<MediaHandle>,
    signals: S,
    notices: mpsc::UnboundedSender<SessionNotice>,
    started_at: DateTime<Utc>,
}

impl<B, M, S> CallSession<B, M, S>
where
    B: PeerBackend,
    M: MediaDevices,
    S: SignalSender,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Uuid,
        local_id: ParticipantId,
        email: String,
        backend: B,
        devices: M,
        constraints: MediaConstraints,
        signals: S,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> Self {
        Self {
            session_id,
            local_id,
            email,
            status: CallStatus::NoPeer,
            remote: None,
            adapter: PeerAdapter::new(backend),
            coordinator: Coordinator::new(),
            devices,
            constraints,
            local_media: None,
            remote_media: None,
            signals,
            notices,
            started_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn remote(&self) -> Option<&RemotePeer> {
        self.remote.as_ref()
    }

    pub fn negotiation(&self) -> &NegotiationState {
        self.coordinator.state()
    }

    pub fn local_media(&self) -> Option<&MediaHandle> {
        self.local_media.as_ref()
    }

    pub fn remote_media(&self) -> Option<&MediaHandle> {
        self.remote_media.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    // === Relay-delivered events ===

    /// Dispatch a signaling frame to the matching handler. Frames for an
    /// ended session are stale and silently discarded.
    pub async fn handle_signal(&mut self, msg: SignalingMessage) -> CallResult<()> {
        if self.status == CallStatus::Ended {
            tracing::debug!(
                session = %self.session_id,
                kind = msg.label(),
                "Discarding signal for ended session"
            );
            return Ok(());
        }

        match msg {
            SignalingMessage::UserJoined {
                email,
                participant_id,
            } => self.on_user_joined(email, participant_id),
            SignalingMessage::CallOffer { from, sdp, .. } => {
                self.on_call_offer(from, sdp).await
            }
            SignalingMessage::CallAccepted { sdp, .. } => self.on_call_accepted(sdp).await,
            SignalingMessage::NegotiationOffer { from, sdp, .. } => {
                self.on_negotiation_offer(from, sdp).await
            }
            SignalingMessage::NegotiationAnswer { sdp, .. } => {
                self.on_negotiation_answer(sdp).await
            }
            SignalingMessage::CallEnd { from, .. } => {
                tracing::info!(session = %self.session_id, from = %from, "Peer ended the call");
                self.teardown(false).await;
                Ok(())
            }
            other => {
                tracing::debug!(kind = other.label(), "Ignoring non-session signal");
                Ok(())
            }
        }
    }

    fn on_user_joined(&mut self, email: String, id: ParticipantId) -> CallResult<()> {
        if let Some(prev) = &self.remote {
            // Room capacity is two, so this only happens after the prior
            // remote left and someone else joined; the tracked remote is
            // replaced without tearing anything down.
            tracing::warn!(
                session = %self.session_id,
                previous = %prev.id,
                replacement = %id,
                "Replacing tracked remote participant"
            );
        }
        self.remote = Some(RemotePeer {
            id,
            email: Some(email.clone()),
            joined_at: Utc::now(),
        });
        if self.status == CallStatus::NoPeer {
            self.status = CallStatus::PeerPresent;
        }
        tracing::info!(
            session = %self.session_id,
            participant = %id,
            email = %email,
            "Remote participant present"
        );
        self.notify(SessionNotice::PeerJoined {
            email,
            participant_id: id,
        });
        Ok(())
    }

    /// Callee path: an invitation arrived. Acquire media, answer, accept.
    async fn on_call_offer(&mut self, from: ParticipantId, sdp: Sdp) -> CallResult<()> {
        match &self.remote {
            Some(r) if r.id == from => {}
            _ => {
                // The invitation may be our first sight of the remote.
                self.remote = Some(RemotePeer {
                    id: from,
                    email: None,
                    joined_at: Utc::now(),
                });
            }
        }
        if self.status == CallStatus::NoPeer {
            self.status = CallStatus::PeerPresent;
        }

        self.ensure_local_media().await?;
        self.attach_local_tracks().await?;
        // The invitation receiver takes the polite role for the session.
        self.coordinator.assign_role(true);
        self.status = CallStatus::Negotiating;

        match self.coordinator.accept_offer(&mut self.adapter, sdp).await {
            Ok(Some(answer)) => {
                self.signals
                    .send(SignalingMessage::CallAccepted {
                        to: from,
                        from: self.local_id,
                        sdp: answer,
                    })
                    .await?;
                // Our signaling view is stable once the answer is out.
                self.status = CallStatus::Active;
                self.notify(SessionNotice::CallActive);
                tracing::info!(session = %self.session_id, from = %from, "Call answered");
                Ok(())
            }
            // An initial invitation cannot collide on the callee side.
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    session = %self.session_id,
                    error = %e,
                    "Failed to answer incoming call"
                );
                self.status = CallStatus::PeerPresent;
                Err(e.into())
            }
        }
    }

    /// Caller path: the callee answered our invitation.
    async fn on_call_accepted(&mut self, sdp: Sdp) -> CallResult<()> {
        match self.coordinator.accept_answer(&mut self.adapter, sdp).await {
            Ok(()) => {
                // No-op for tracks already on the connection.
                if let Err(e) = self.attach_local_tracks().await {
                    tracing::warn!(session = %self.session_id, error = %e, "Track attach failed");
                }
                self.status = CallStatus::Active;
                self.notify(SessionNotice::CallActive);
                tracing::info!(session = %self.session_id, "Call active");
                Ok(())
            }
            Err(e) => {
                // The attempt is abandoned; the call stays up and a later
                // negotiationneeded trigger may recover it.
                tracing::warn!(session = %self.session_id, error = %e, "Unusable call answer");
                Err(e.into())
            }
        }
    }

    async fn on_negotiation_offer(&mut self, from: ParticipantId, sdp: Sdp) -> CallResult<()> {
        match self.coordinator.accept_offer(&mut self.adapter, sdp).await {
            Ok(Some(answer)) => {
                self.signals
                    .send(SignalingMessage::NegotiationAnswer {
                        to: from,
                        from: self.local_id,
                        sdp: answer,
                    })
                    .await?;
                Ok(())
            }
            // Glare: discarded, no response, no state change.
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "Renegotiation offer unusable");
                Err(e.into())
            }
        }
    }

    async fn on_negotiation_answer(&mut self, sdp: Sdp) -> CallResult<()> {
        match self.coordinator.accept_answer(&mut self.adapter, sdp).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "Renegotiation answer unusable");
                Err(e.into())
            }
        }
    }

    // === Peer-primitive events ===

    /// Dispatch an adapter event. Events stamped with a different session
    /// identity come from a connection that has since been torn down and
    /// are discarded without touching any state.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> CallResult<()> {
        if event.session_id != self.session_id {
            tracing::debug!(
                session = %self.session_id,
                stale = %event.session_id,
                "Discarding peer event from a previous session"
            );
            return Ok(());
        }
        if self.status == CallStatus::Ended {
            tracing::debug!(session = %self.session_id, "Discarding peer event for ended session");
            return Ok(());
        }

        match event.kind {
            PeerEventKind::NegotiationNeeded => self.on_negotiation_needed().await,
            PeerEventKind::TrackReceived(handle) => {
                self.remote_media = Some(handle.clone());
                tracing::info!(session = %self.session_id, "Remote media arrived");
                self.notify(SessionNotice::RemoteStream(handle));
                Ok(())
            }
        }
    }

    async fn on_negotiation_needed(&mut self) -> CallResult<()> {
        let Some(remote_id) = self.remote.as_ref().map(|r| r.id) else {
            tracing::debug!(session = %self.session_id, "negotiationneeded with no remote");
            return Ok(());
        };

        let offer = match self.coordinator.produce_offer(&mut self.adapter).await {
            Ok(offer) => offer,
            Err(e) => {
                // No automatic retry; the next trigger starts fresh.
                tracing::warn!(session = %self.session_id, error = %e, "Renegotiation offer failed");
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .signals
            .send(SignalingMessage::NegotiationOffer {
                to: remote_id,
                from: self.local_id,
                sdp: offer,
            })
            .await
        {
            self.coordinator.abort_offer();
            tracing::warn!(session = %self.session_id, error = %e, "Could not deliver renegotiation offer");
            return Err(e.into());
        }
        Ok(())
    }

    // === User actions ===

    /// Start a call to the tracked remote participant. Valid only from
    /// `PeerPresent`. Media acquisition failure aborts the attempt and
    /// the session stays in `PeerPresent`.
    pub async fn initiate_call(&mut self) -> CallResult<()> {
        if self.status != CallStatus::PeerPresent {
            return Err(CallError::InvalidTransition {
                operation: "initiate_call",
                status: self.status.as_str(),
            });
        }
        let Some(remote_id) = self.remote.as_ref().map(|r| r.id) else {
            return Err(CallError::InvalidTransition {
                operation: "initiate_call",
                status: self.status.as_str(),
            });
        };

        self.ensure_local_media().await?;
        self.attach_local_tracks().await?;
        // The initiator takes the impolite role for the session.
        self.coordinator.assign_role(false);
        self.status = CallStatus::Negotiating;

        let offer = match self.coordinator.produce_offer(&mut self.adapter).await {
            Ok(offer) => offer,
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "Initial offer failed");
                self.status = CallStatus::PeerPresent;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .signals
            .send(SignalingMessage::CallOffer {
                to: remote_id,
                from: self.local_id,
                sdp: offer,
            })
            .await
        {
            // Undelivered offer: abandon it so the next attempt is clean.
            self.coordinator.abort_offer();
            self.status = CallStatus::PeerPresent;
            tracing::warn!(session = %self.session_id, error = %e, "Could not deliver call offer");
            return Err(e.into());
        }

        tracing::info!(session = %self.session_id, to = %remote_id, "Call offer sent");
        Ok(())
    }

    /// Attach an additional outbound track, e.g. starting a screen
    /// share. On an established call the primitive responds with a
    /// `negotiationneeded` event which drives the renegotiation offer.
    pub async fn add_outgoing_track(&mut self, track: MediaTrack) -> CallResult<()> {
        if matches!(self.status, CallStatus::NoPeer | CallStatus::Ended) {
            return Err(CallError::InvalidTransition {
                operation: "add_outgoing_track",
                status: self.status.as_str(),
            });
        }
        self.adapter
            .attach_track(&track)
            .await
            .map_err(CallError::from)?;
        Ok(())
    }

    /// Hang up: release all media, tell the peer (best-effort), close the
    /// connection. Idempotent — calling again from `Ended` is a no-op.
    pub async fn end_call(&mut self) {
        if self.status == CallStatus::Ended {
            tracing::debug!(session = %self.session_id, "end_call on ended session is a no-op");
            return;
        }
        self.teardown(true).await;
    }

    // === Internals ===

    async fn ensure_local_media(&mut self) -> CallResult<()> {
        if self.local_media.is_some() {
            return Ok(());
        }
        match self.devices.acquire(self.constraints).await {
            Ok(handle) => {
                self.local_media = Some(handle.clone());
                self.notify(SessionNotice::LocalStream(handle));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "Media acquisition failed");
                self.notify(SessionNotice::MediaUnavailable(e.to_string()));
                Err(e.into())
            }
        }
    }

    async fn attach_local_tracks(&mut self) -> Result<(), NegotiationError> {
        let tracks: Vec<MediaTrack> = self
            .local_media
            .as_ref()
            .map(|h| h.tracks().to_vec())
            .unwrap_or_default();
        for track in &tracks {
            self.adapter.attach_track(track).await?;
        }
        Ok(())
    }

    /// Common teardown for `end_call` and an incoming `CallEnd`. Local
    /// cleanup always runs; peer notification is best-effort only.
    async fn teardown(&mut self, notify_peer: bool) {
        if let Some(handle) = &self.local_media {
            if handle.stop() {
                tracing::debug!(session = %self.session_id, "Local media released");
            }
        }
        if let Some(handle) = &self.remote_media {
            if handle.stop() {
                tracing::debug!(session = %self.session_id, "Remote media released");
            }
        }
        self.local_media = None;
        self.remote_media = None;

        if notify_peer {
            if let Some(remote) = &self.remote {
                let msg = SignalingMessage::CallEnd {
                    to: remote.id,
                    from: self.local_id,
                };
                if let Err(e) = self.signals.send(msg).await {
                    tracing::warn!(session = %self.session_id, error = %e, "Could not deliver call end");
                }
            }
        }

        self.adapter.close().await;
        self.remote = None;
        self.status = CallStatus::Ended;
        self.notify(SessionNotice::CallEnded);
        tracing::info!(session = %self.session_id, email = %self.email, "Call ended");
    }
}
