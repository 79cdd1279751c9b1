//! # duocall demo
//!
//! Runs a complete two-party call in one process: both participants join
//! an in-process relay room, the first initiates, negotiation runs over
//! loopback peer backends, a screen share triggers a renegotiation, and
//! the call is torn down.
//!
//! Useful for watching the signaling and negotiation traces end to end
//! without any network or real devices.

use anyhow::Context;
use clap::Parser;
use duocall_common::RoomId;
use duocall_session::loopback::{LoopbackBackend, StaticMediaDevices};
use duocall_session::{
    CallSession, CallStatus, MediaConstraints, MediaTrack, SessionCommand, SessionNotice,
    drive, new_session_id,
};
use duocall_signal::{LocalRelay, RelayReceiver, RelaySender};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "duocall", version, about = "Two-party call negotiation demo")]
struct Args {
    /// Room to meet in.
    #[arg(long, default_value = "demo")]
    room: String,

    /// Email of the participant who places the call.
    #[arg(long, default_value = "alice@example.com")]
    caller: String,

    /// Email of the participant who answers.
    #[arg(long, default_value = "bob@example.com")]
    callee: String,

    /// Add a screen-share track after the call is up, exercising
    /// renegotiation.
    #[arg(long)]
    screen_share: bool,
}

struct Endpoint {
    email: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    task: tokio::task::JoinHandle<
        CallSession<LoopbackBackend, StaticMediaDevices, RelaySender>,
    >,
}

async fn connect(relay: &LocalRelay, email: &str, room: &RoomId) -> anyhow::Result<Endpoint> {
    let conn = relay
        .join(email, room)
        .await
        .with_context(|| format!("{email} could not join room {room}"))?;
    let id = conn.id;
    let (tx, relay_rx): (RelaySender, RelayReceiver) = conn.split();

    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let (notice_tx, notices) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let config = duocall_common::config::get();
    let constraints = MediaConstraints {
        audio: config.media.audio,
        video: config.media.video,
    };

    let session_id = new_session_id();
    let session = CallSession::new(
        session_id,
        id,
        email.to_owned(),
        LoopbackBackend::new(session_id, peer_tx),
        StaticMediaDevices::new(),
        constraints,
        tx,
        notice_tx,
    );

    let task = tokio::spawn(drive(session, relay_rx, peer_rx, cmd_rx));
    Ok(Endpoint {
        email: email.to_owned(),
        commands: cmd_tx,
        notices,
        task,
    })
}

/// Drain notices until `want` matches, printing each one.
async fn wait_for(endpoint: &mut Endpoint, want: fn(&SessionNotice) -> bool) -> anyhow::Result<()> {
    while let Some(notice) = endpoint.notices.recv().await {
        announce(&endpoint.email, &notice);
        if want(&notice) {
            return Ok(());
        }
    }
    anyhow::bail!("{}: session ended before the expected event", endpoint.email)
}

fn announce(email: &str, notice: &SessionNotice) {
    match notice {
        SessionNotice::PeerJoined {
            email: peer,
            participant_id,
        } => tracing::info!(who = %email, peer = %peer, id = %participant_id, "👋 Peer joined"),
        SessionNotice::LocalStream(handle) => {
            tracing::info!(who = %email, tracks = handle.tracks().len(), "🎥 Local media ready")
        }
        SessionNotice::RemoteStream(handle) => {
            tracing::info!(who = %email, tracks = handle.tracks().len(), "📺 Remote media arrived")
        }
        SessionNotice::CallActive => tracing::info!(who = %email, "📞 Call active"),
        SessionNotice::CallEnded => tracing::info!(who = %email, "👋 Call ended"),
        SessionNotice::MediaUnavailable(reason) => {
            tracing::warn!(who = %email, reason = %reason, "🎙️ Media unavailable")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = duocall_common::config::init()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duocall=debug".into()),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let room = RoomId::from(args.room.as_str());
    tracing::info!("🚀 duocall v{}", env!("CARGO_PKG_VERSION"));

    let relay = LocalRelay::new(config.relay.room_capacity as usize);
    let mut caller = connect(&relay, &args.caller, &room).await?;
    let mut callee = connect(&relay, &args.callee, &room).await?;

    // Wait until the caller has seen the callee join, then ring.
    wait_for(&mut caller, |n| matches!(n, SessionNotice::PeerJoined { .. })).await?;
    caller.commands.send(SessionCommand::InitiateCall)?;

    wait_for(&mut caller, |n| matches!(n, SessionNotice::CallActive)).await?;
    wait_for(&mut callee, |n| matches!(n, SessionNotice::CallActive)).await?;

    if args.screen_share {
        caller
            .commands
            .send(SessionCommand::AddTrack(MediaTrack::video("screen")))?;
        callee
            .commands
            .send(SessionCommand::AddTrack(MediaTrack::video("screen")))?;
        // Let the (possibly glaring) renegotiation settle.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    caller.commands.send(SessionCommand::EndCall)?;
    wait_for(&mut callee, |n| matches!(n, SessionNotice::CallEnded)).await?;

    let caller_session = caller.task.await?;
    let callee_session = callee.task.await?;
    anyhow::ensure!(caller_session.status() == CallStatus::Ended);
    anyhow::ensure!(callee_session.status() == CallStatus::Ended);

    tracing::info!("✅ Demo complete");
    Ok(())
}
