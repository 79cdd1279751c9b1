//! Single-task session event loop.
//!
//! All three inboxes — relay frames, peer-primitive events and user
//! commands — funnel into one task that owns the session, so every
//! handler runs to completion before the next event is dispatched and no
//! locking is needed around session state.

use crate::adapter::{PeerBackend, PeerEvent};
use crate::media::{MediaDevices, MediaTrack};
use crate::session::{CallSession, CallStatus};
use duocall_signal::{RelayReceiver, SignalSender};
use tokio::sync::mpsc;

/// User actions delivered to the event loop.
#[derive(Debug)]
pub enum SessionCommand {
    InitiateCall,
    AddTrack(MediaTrack),
    EndCall,
}

/// Run the session until the call ends or its inputs go away.
///
/// Errors from individual handlers are contained: they are logged and
/// the loop keeps serving events. Dropping the command sender hangs up,
/// mirroring a user navigating away.
pub async fn drive<B, M, S>(
    mut session: CallSession<B, M, S>,
    mut signals: RelayReceiver,
    mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) -> CallSession<B, M, S>
where
    B: PeerBackend,
    M: MediaDevices,
    S: SignalSender,
{
    loop {
        tokio::select! {
            maybe = signals.recv() => match maybe {
                Some(msg) => {
                    if let Err(e) = session.handle_signal(msg).await {
                        tracing::warn!(session = %session.session_id(), error = %e, "Signal handling failed");
                    }
                }
                None => {
                    tracing::info!(session = %session.session_id(), "Relay connection closed");
                    session.end_call().await;
                    break;
                }
            },
            maybe = peer_events.recv() => match maybe {
                Some(event) => {
                    if let Err(e) = session.handle_peer_event(event).await {
                        tracing::warn!(session = %session.session_id(), error = %e, "Peer event handling failed");
                    }
                }
                None => break,
            },
            maybe = commands.recv() => match maybe {
                Some(SessionCommand::InitiateCall) => {
                    if let Err(e) = session.initiate_call().await {
                        tracing::warn!(session = %session.session_id(), error = %e, "Could not start call");
                    }
                }
                Some(SessionCommand::AddTrack(track)) => {
                    if let Err(e) = session.add_outgoing_track(track).await {
                        tracing::warn!(session = %session.session_id(), error = %e, "Could not add track");
                    }
                }
                Some(SessionCommand::EndCall) => session.end_call().await,
                None => {
                    session.end_call().await;
                    break;
                }
            },
        }

        if session.status() == CallStatus::Ended {
            break;
        }
    }
    session
}
