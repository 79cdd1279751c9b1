//! End-to-end call flows over the in-process relay with loopback
//! backends: setup, glare, teardown and the failure paths.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use duocall_common::{CallError, MediaError, ParticipantId, RoomId};
use duocall_session::adapter::{PeerEvent, PeerEventKind};
use duocall_session::loopback::{LoopbackBackend, LoopbackFaults, StaticMediaDevices};
use duocall_session::media::{MediaConstraints, MediaHandle, MediaTrack};
use duocall_session::negotiation::NegotiationPhase;
use duocall_session::session::{CallSession, CallStatus, SessionNotice, new_session_id};
use duocall_session::{SessionCommand, drive};
use duocall_signal::{LocalRelay, RelayReceiver, RelaySender};
use tokio::sync::mpsc;
use uuid::Uuid;

type TestSession = CallSession<LoopbackBackend, StaticMediaDevices, RelaySender>;

struct Participant {
    id: ParticipantId,
    session_id: Uuid,
    session: TestSession,
    relay_rx: RelayReceiver,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    faults: Arc<Mutex<LoopbackFaults>>,
    acquired: Arc<Mutex<Vec<MediaHandle>>>,
}

async fn join(relay: &LocalRelay, email: &str, room: &RoomId) -> Participant {
    join_with_devices(relay, email, room, StaticMediaDevices::new()).await
}

async fn join_with_devices(
    relay: &LocalRelay,
    email: &str,
    room: &RoomId,
    devices: StaticMediaDevices,
) -> Participant {
    let conn = relay.join(email, room).await.expect("join");
    let id = conn.id;
    let (tx, relay_rx) = conn.split();

    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let (notice_tx, notices) = mpsc::unbounded_channel();

    let session_id = new_session_id();
    let backend = LoopbackBackend::new(session_id, peer_tx);
    let faults = backend.faults();
    let acquired = devices.acquired();

    let session = CallSession::new(
        session_id,
        id,
        email.to_owned(),
        backend,
        devices,
        MediaConstraints::default(),
        tx,
        notice_tx,
    );

    Participant {
        id,
        session_id,
        session,
        relay_rx,
        peer_rx,
        notices,
        faults,
        acquired,
    }
}

/// Deliver every queued relay frame and peer event to the session,
/// repeating until nothing is pending. Handler errors are swallowed;
/// tests that assert on errors call the handlers directly.
async fn pump(p: &mut Participant) {
    loop {
        let mut progressed = false;
        while let Some(msg) = p.relay_rx.try_recv() {
            progressed = true;
            let _ = p.session.handle_signal(msg).await;
        }
        while let Ok(event) = p.peer_rx.try_recv() {
            progressed = true;
            let _ = p.session.handle_peer_event(event).await;
        }
        if !progressed {
            break;
        }
    }
}

fn drain_notices(p: &mut Participant) -> Vec<SessionNotice> {
    let mut out = Vec::new();
    while let Ok(n) = p.notices.try_recv() {
        out.push(n);
    }
    out
}

/// Two participants in a room, call established, both `Active`.
async fn active_pair(relay: &LocalRelay, room: &RoomId) -> (Participant, Participant) {
    let mut a = join(relay, "alice@example.com", room).await;
    let mut b = join(relay, "bob@example.com", room).await;
    pump(&mut a).await;
    pump(&mut b).await;

    a.session.initiate_call().await.expect("initiate");
    pump(&mut b).await;
    pump(&mut a).await;

    assert_eq!(a.session.status(), CallStatus::Active);
    assert_eq!(b.session.status(), CallStatus::Active);
    (a, b)
}

#[tokio::test]
async fn test_call_setup_reaches_active_on_both_sides() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let mut a = join(&relay, "alice@example.com", &room).await;
    let mut b = join(&relay, "bob@example.com", &room).await;

    pump(&mut a).await;
    pump(&mut b).await;
    assert_eq!(a.session.status(), CallStatus::PeerPresent);
    assert_eq!(a.session.remote().expect("remote").id, b.id);
    // The second joiner has seen nobody yet.
    assert_eq!(b.session.status(), CallStatus::NoPeer);

    a.session.initiate_call().await.expect("initiate");
    assert_eq!(a.session.status(), CallStatus::Negotiating);

    // Callee answers the invitation and goes active.
    pump(&mut b).await;
    assert_eq!(b.session.status(), CallStatus::Active);
    assert!(b.session.negotiation().polite);

    // Caller applies the answer and goes active.
    pump(&mut a).await;
    assert_eq!(a.session.status(), CallStatus::Active);
    assert!(!a.session.negotiation().polite);
    assert_eq!(a.session.negotiation().phase, NegotiationPhase::Stable);

    let a_notices = drain_notices(&mut a);
    assert!(
        a_notices
            .iter()
            .any(|n| matches!(n, SessionNotice::CallActive))
    );
    assert!(
        a_notices
            .iter()
            .any(|n| matches!(n, SessionNotice::LocalStream(_)))
    );
}

#[tokio::test]
async fn test_simultaneous_offers_converge() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let (mut a, mut b) = active_pair(&relay, &room).await;

    // Both sides add a track before seeing the other's offer.
    a.session
        .add_outgoing_track(MediaTrack::video("alice-screen"))
        .await
        .expect("add");
    b.session
        .add_outgoing_track(MediaTrack::video("bob-screen"))
        .await
        .expect("add");

    let ev = a.peer_rx.try_recv().expect("negotiationneeded");
    a.session.handle_peer_event(ev).await.expect("a offers");
    let ev = b.peer_rx.try_recv().expect("negotiationneeded");
    b.session.handle_peer_event(ev).await.expect("b offers");

    // a (impolite) discards b's offer; b (polite) rolls back and answers.
    pump(&mut a).await;
    pump(&mut b).await;
    pump(&mut a).await;

    assert_eq!(a.session.negotiation().phase, NegotiationPhase::Stable);
    assert!(!a.session.negotiation().making_offer);
    assert_eq!(b.session.negotiation().phase, NegotiationPhase::Stable);
    assert!(!b.session.negotiation().making_offer);
    assert_eq!(a.session.status(), CallStatus::Active);
    assert_eq!(b.session.status(), CallStatus::Active);
}

#[tokio::test]
async fn test_end_call_is_idempotent_and_releases_media_once() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let (mut a, mut b) = active_pair(&relay, &room).await;

    let a_handle = a.acquired.lock().expect("lock")[0].clone();
    a.session.end_call().await;
    assert_eq!(a.session.status(), CallStatus::Ended);
    assert!(a_handle.is_stopped());
    // The session already released it.
    assert!(!a_handle.stop());

    // A second hang-up is a no-op.
    a.session.end_call().await;
    assert_eq!(a.session.status(), CallStatus::Ended);

    // The peer tears down on CallEnd without echoing one back.
    pump(&mut b).await;
    assert_eq!(b.session.status(), CallStatus::Ended);
    assert!(a.relay_rx.try_recv().is_none());

    let b_notices = drain_notices(&mut b);
    assert!(
        b_notices
            .iter()
            .any(|n| matches!(n, SessionNotice::CallEnded))
    );
}

#[tokio::test]
async fn test_failed_offer_does_not_lock_out_future_calls() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let mut a = join(&relay, "alice@example.com", &room).await;
    let _b = join(&relay, "bob@example.com", &room).await;
    pump(&mut a).await;

    a.faults.lock().expect("faults").fail_create_offer = true;
    let err = a.session.initiate_call().await.unwrap_err();
    assert!(matches!(err, CallError::Negotiation(_)));
    assert_eq!(a.session.status(), CallStatus::PeerPresent);
    assert!(!a.session.negotiation().making_offer);

    // The next attempt starts clean.
    a.session.initiate_call().await.expect("retry");
    assert_eq!(a.session.status(), CallStatus::Negotiating);
}

#[tokio::test]
async fn test_answer_arriving_after_end_is_discarded() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let mut a = join(&relay, "alice@example.com", &room).await;
    let mut b = join(&relay, "bob@example.com", &room).await;
    pump(&mut a).await;

    a.session.initiate_call().await.expect("initiate");
    // Caller hangs up before the answer comes back.
    a.session.end_call().await;
    assert_eq!(a.session.status(), CallStatus::Ended);

    // Callee processes the offer (answering) and then the hang-up.
    pump(&mut b).await;
    assert_eq!(b.session.status(), CallStatus::Ended);

    // The late answer reaches the caller and changes nothing.
    pump(&mut a).await;
    assert_eq!(a.session.status(), CallStatus::Ended);
    assert!(a.session.local_media().is_none());
    let a_handle = a.acquired.lock().expect("lock")[0].clone();
    assert!(a_handle.is_stopped());
}

#[tokio::test]
async fn test_media_denial_aborts_initiation() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let mut a = join_with_devices(
        &relay,
        "alice@example.com",
        &room,
        StaticMediaDevices::denying(MediaError::PermissionDenied),
    )
    .await;
    let mut b = join(&relay, "bob@example.com", &room).await;
    pump(&mut a).await;
    pump(&mut b).await;

    let err = a.session.initiate_call().await.unwrap_err();
    assert!(matches!(err, CallError::Media(MediaError::PermissionDenied)));
    assert_eq!(a.session.status(), CallStatus::PeerPresent);

    // No offer went out.
    assert!(b.relay_rx.try_recv().is_none());
    assert!(
        drain_notices(&mut a)
            .iter()
            .any(|n| matches!(n, SessionNotice::MediaUnavailable(_)))
    );
}

#[tokio::test]
async fn test_remote_track_is_surfaced() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let (mut a, _b) = active_pair(&relay, &room).await;

    let event = PeerEvent {
        session_id: a.session_id,
        kind: PeerEventKind::TrackReceived(MediaHandle::new(vec![MediaTrack::video(
            "bob-camera",
        )])),
    };
    a.session.handle_peer_event(event).await.expect("track");

    assert!(a.session.remote_media().is_some());
    assert!(
        drain_notices(&mut a)
            .iter()
            .any(|n| matches!(n, SessionNotice::RemoteStream(_)))
    );
}

#[tokio::test]
async fn test_peer_event_from_previous_session_is_discarded() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let (mut a, _b) = active_pair(&relay, &room).await;

    let stale = PeerEvent {
        session_id: new_session_id(),
        kind: PeerEventKind::TrackReceived(MediaHandle::new(vec![MediaTrack::video(
            "ghost",
        )])),
    };
    assert_ne!(stale.session_id, a.session_id);
    a.session.handle_peer_event(stale).await.expect("discard");
    assert!(a.session.remote_media().is_none());
}

#[tokio::test]
async fn test_rejoining_peer_replaces_tracked_remote() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let mut a = join(&relay, "alice@example.com", &room).await;

    let b_conn = relay.join("bob@example.com", &room).await.expect("join b");
    let (b_tx, _b_rx) = b_conn.split();
    pump(&mut a).await;
    assert_eq!(a.session.remote().expect("remote").id, b_tx.participant_id());

    b_tx.leave().await;
    let c_conn = relay
        .join("carol@example.com", &room)
        .await
        .expect("join c");
    let c_id = c_conn.id;
    pump(&mut a).await;

    let remote = a.session.remote().expect("remote");
    assert_eq!(remote.id, c_id);
    assert_eq!(remote.email.as_deref(), Some("carol@example.com"));
}

#[tokio::test]
async fn test_non_session_frames_are_ignored() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let mut a = join(&relay, "alice@example.com", &room).await;

    // RoomJoined is relay bookkeeping, not a session transition.
    pump(&mut a).await;
    assert_eq!(a.session.status(), CallStatus::NoPeer);
    assert!(a.session.remote().is_none());
}

async fn wait_for(
    notices: &mut mpsc::UnboundedReceiver<SessionNotice>,
    want: fn(&SessionNotice) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(n) = notices.recv().await {
            if want(&n) {
                return;
            }
        }
        panic!("notice channel closed before the expected notice");
    })
    .await
    .expect("timed out waiting for notice");
}

#[tokio::test]
async fn test_driver_runs_a_full_call() {
    let relay = LocalRelay::new(2);
    let room = RoomId::from("7");
    let a = join(&relay, "alice@example.com", &room).await;
    let b = join(&relay, "bob@example.com", &room).await;

    let (a_cmd_tx, a_cmd_rx) = mpsc::unbounded_channel();
    let (b_cmd_tx, b_cmd_rx) = mpsc::unbounded_channel();
    let mut a_notices = a.notices;
    let mut b_notices = b.notices;

    let a_task = tokio::spawn(drive(a.session, a.relay_rx, a.peer_rx, a_cmd_rx));
    let b_task = tokio::spawn(drive(b.session, b.relay_rx, b.peer_rx, b_cmd_rx));

    wait_for(&mut a_notices, |n| matches!(n, SessionNotice::PeerJoined { .. })).await;
    a_cmd_tx
        .send(SessionCommand::InitiateCall)
        .expect("command");

    wait_for(&mut a_notices, |n| matches!(n, SessionNotice::CallActive)).await;
    wait_for(&mut b_notices, |n| matches!(n, SessionNotice::CallActive)).await;

    a_cmd_tx.send(SessionCommand::EndCall).expect("command");
    wait_for(&mut b_notices, |n| matches!(n, SessionNotice::CallEnded)).await;

    let a_session = a_task.await.expect("a task");
    let b_session = b_task.await.expect("b task");
    assert_eq!(a_session.status(), CallStatus::Ended);
    assert_eq!(b_session.status(), CallStatus::Ended);
    drop(b_cmd_tx);
}
