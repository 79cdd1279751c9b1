//! Negotiation coordinator — decides when offers are produced, when
//! remote descriptions are applied, and who backs down when both sides
//! offer at once ("perfect negotiation").
//!
//! Glare resolution relies on a fixed per-session tie-break: the side
//! that received the call invitation is polite, the initiator impolite.
//! When offers cross, the impolite side discards the incoming offer and
//! keeps waiting for its own answer; the polite side rolls back its
//! pending offer and answers the remote one. Exactly one side backs
//! down, so two concurrent renegotiations always converge instead of
//! deadlocking or looping.
//!
//! `making_offer` is explicit state rather than call-stack position
//! because a remote offer can be dispatched while an offer-producing
//! future is still pending. Every exit path of a failed offer attempt
//! clears it; otherwise a single failure would lock the coordinator out
//! of all future negotiation.

use crate::adapter::{PeerAdapter, PeerBackend, SignalingState};
use duocall_common::{NegotiationError, Sdp, SdpKind};

/// Coordinator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// No negotiation has happened yet.
    Idle,
    /// A local offer is being produced.
    MakingOffer,
    /// A local offer was sent; its answer is outstanding.
    WaitingForAnswer,
    /// A remote offer is being applied and answered.
    ApplyingRemoteOffer,
    /// Last offer/answer round completed.
    Stable,
}

impl NegotiationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MakingOffer => "making-offer",
            Self::WaitingForAnswer => "waiting-for-answer",
            Self::ApplyingRemoteOffer => "applying-remote-offer",
            Self::Stable => "stable",
        }
    }
}

/// Per-call negotiation bookkeeping. Only the coordinator mutates this.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    pub making_offer: bool,
    /// Set while the last incoming offer was discarded due to glare.
    pub ignore_offer: bool,
    /// Tie-break role, fixed for the whole session.
    pub polite: bool,
    pub phase: NegotiationPhase,
}

pub struct Coordinator {
    state: NegotiationState,
    role_assigned: bool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            state: NegotiationState {
                making_offer: false,
                ignore_offer: false,
                polite: false,
                phase: NegotiationPhase::Idle,
            },
            role_assigned: false,
        }
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    /// Fix the tie-break role for this session: the invitation receiver
    /// is polite, the initiator impolite. The first assignment wins;
    /// later calls are ignored because the role is immutable per session.
    pub fn assign_role(&mut self, polite: bool) {
        if self.role_assigned {
            if self.state.polite != polite {
                tracing::warn!(
                    polite = self.state.polite,
                    "Ignoring attempt to reassign negotiation role"
                );
            }
            return;
        }
        self.state.polite = polite;
        self.role_assigned = true;
    }

    /// Produce a local offer and apply it locally. On success the offer
    /// is in flight and the caller must relay it; on failure the
    /// coordinator is back where it started and ready for the next
    /// trigger.
    pub async fn produce_offer<B: PeerBackend>(
        &mut self,
        adapter: &mut PeerAdapter<B>,
    ) -> Result<Sdp, NegotiationError> {
        if self.state.making_offer {
            return Err(NegotiationError::OfferInFlight);
        }
        self.state.making_offer = true;
        self.state.phase = NegotiationPhase::MakingOffer;

        let attempt = async {
            let offer = adapter.create_offer().await?;
            adapter.apply_local_description(offer.clone()).await?;
            Ok(offer)
        }
        .await;

        match attempt {
            Ok(offer) => {
                self.state.phase = NegotiationPhase::WaitingForAnswer;
                Ok(offer)
            }
            Err(e) => {
                self.state.making_offer = false;
                self.state.phase = NegotiationPhase::Idle;
                Err(e)
            }
        }
    }

    /// Abandon an in-flight offer that will never be answered, e.g.
    /// because relaying it failed. The next trigger starts fresh.
    pub fn abort_offer(&mut self) {
        if !self.state.making_offer {
            return;
        }
        self.state.making_offer = false;
        self.state.phase = NegotiationPhase::Idle;
    }

    /// Apply a remote answer to our in-flight offer.
    pub async fn accept_answer<B: PeerBackend>(
        &mut self,
        adapter: &mut PeerAdapter<B>,
        sdp: Sdp,
    ) -> Result<(), NegotiationError> {
        if sdp.kind != SdpKind::Answer {
            return Err(NegotiationError::MalformedDescription(
                "expected an answer".into(),
            ));
        }
        if self.state.phase != NegotiationPhase::WaitingForAnswer {
            return Err(NegotiationError::InvalidState {
                operation: "accept_answer",
                state: self.state.phase.as_str(),
            });
        }

        match adapter.apply_remote_description(sdp).await {
            Ok(()) => {
                self.state.making_offer = false;
                self.state.ignore_offer = false;
                self.state.phase = NegotiationPhase::Stable;
                Ok(())
            }
            Err(e) => {
                // The attempt is abandoned; a follow-up trigger may retry.
                self.state.making_offer = false;
                self.state.phase = NegotiationPhase::Idle;
                Err(e)
            }
        }
    }

    /// Handle an incoming remote offer. Returns the answer to relay, or
    /// `None` when the offer was discarded by the glare rule (in which
    /// case nothing changed and no response must be sent).
    pub async fn accept_offer<B: PeerBackend>(
        &mut self,
        adapter: &mut PeerAdapter<B>,
        sdp: Sdp,
    ) -> Result<Option<Sdp>, NegotiationError> {
        if sdp.kind != SdpKind::Offer {
            return Err(NegotiationError::MalformedDescription(
                "expected an offer".into(),
            ));
        }

        let collision =
            self.state.making_offer || adapter.signaling_state() != SignalingState::Stable;
        self.state.ignore_offer = !self.state.polite && collision;
        if self.state.ignore_offer {
            tracing::debug!(
                phase = self.state.phase.as_str(),
                "Glare: discarding colliding remote offer (impolite)"
            );
            return Ok(None);
        }

        self.state.phase = NegotiationPhase::ApplyingRemoteOffer;
        let attempt = async {
            // Applying the remote offer rolls back any pending local
            // offer inside the primitive.
            let answer = adapter.create_answer(sdp).await?;
            adapter.apply_local_description(answer.clone()).await?;
            Ok(answer)
        }
        .await;

        match attempt {
            Ok(answer) => {
                self.state.making_offer = false;
                self.state.phase = NegotiationPhase::Stable;
                Ok(Some(answer))
            }
            Err(e) => {
                self.state.making_offer = false;
                self.state.phase = NegotiationPhase::Idle;
                Err(e)
            }
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
