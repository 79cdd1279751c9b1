//! In-process relay hub.
//!
//! Implements the relay contract for tests and demos: one persistent
//! connection per participant, frames delivered in the order sent by a
//! given sender, no ordering across senders. Rooms are created on first
//! join and destroyed when the last participant leaves.

use crate::message::SignalingMessage;
use duocall_common::{ParticipantId, RelayError, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

/// Outbound half of a relay connection. The session layer only ever
/// sends; receiving is driven by the event loop that owns the other half.
pub trait SignalSender {
    fn send(
        &self,
        msg: SignalingMessage,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;
}

#[derive(Clone, Debug)]
struct Occupant {
    id: ParticipantId,
    email: String,
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

type RoomTable = Arc<RwLock<HashMap<RoomId, Vec<Occupant>>>>;

/// The relay hub: room registry plus point-to-point routing.
#[derive(Clone)]
pub struct LocalRelay {
    rooms: RoomTable,
    capacity: usize,
}

impl LocalRelay {
    /// A hub whose rooms hold at most `capacity` participants. The
    /// negotiation core assumes two.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Join (or create) a room. Assigns a participant id, acknowledges
    /// with `RoomJoined` and announces the newcomer to prior occupants
    /// with `UserJoined`.
    pub async fn join(
        &self,
        email: &str,
        room: &RoomId,
    ) -> Result<RelayConnection, RelayError> {
        let mut rooms = self.rooms.write().await;
        let occupants = rooms.entry(room.clone()).or_default();
        if occupants.len() >= self.capacity {
            return Err(RelayError::RoomFull(room.clone()));
        }

        let id = ParticipantId::generate();
        let (tx, rx) = mpsc::unbounded_channel();

        let _ = tx.send(SignalingMessage::RoomJoined {
            email: email.to_owned(),
            room: room.clone(),
            participant_id: id,
        });
        for occupant in occupants.iter() {
            let _ = occupant.tx.send(SignalingMessage::UserJoined {
                email: email.to_owned(),
                participant_id: id,
            });
        }
        occupants.push(Occupant {
            id,
            email: email.to_owned(),
            tx,
        });

        tracing::info!(
            room = %room,
            participant = %id,
            email = %email,
            "Participant joined room"
        );

        Ok(RelayConnection {
            id,
            room: room.clone(),
            sender: RelaySender {
                id,
                room: room.clone(),
                rooms: Arc::clone(&self.rooms),
            },
            receiver: RelayReceiver { rx },
        })
    }

    /// Occupant count for a room (0 if the room does not exist).
    pub async fn occupant_count(&self, room: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|o| o.len())
            .unwrap_or(0)
    }
}

/// A participant's connection to the hub, split into send and receive
/// halves so the session can own one and the event loop the other.
#[derive(Debug)]
pub struct RelayConnection {
    pub id: ParticipantId,
    pub room: RoomId,
    sender: RelaySender,
    receiver: RelayReceiver,
}

impl RelayConnection {
    pub fn split(self) -> (RelaySender, RelayReceiver) {
        (self.sender, self.receiver)
    }
}

/// Cloneable outbound half: routes addressed frames to their recipient
/// within the sender's room.
#[derive(Clone, Debug)]
pub struct RelaySender {
    id: ParticipantId,
    room: RoomId,
    rooms: RoomTable,
}

impl RelaySender {
    pub fn participant_id(&self) -> ParticipantId {
        self.id
    }

    /// Remove this participant from its room, destroying the room when
    /// it empties.
    pub async fn leave(&self) {
        let mut rooms = self.rooms.write().await;
        if let Some(occupants) = rooms.get_mut(&self.room) {
            occupants.retain(|o| o.id != self.id);
            if occupants.is_empty() {
                rooms.remove(&self.room);
                tracing::info!(room = %self.room, "Room destroyed");
            }
        }
    }
}

impl SignalSender for RelaySender {
    async fn send(&self, msg: SignalingMessage) -> Result<(), RelayError> {
        let Some(to) = msg.recipient() else {
            // Unaddressed frames have no route; the relay drops them.
            tracing::debug!(kind = msg.label(), "Dropping unaddressed frame");
            return Ok(());
        };

        let rooms = self.rooms.read().await;
        let occupants = rooms
            .get(&self.room)
            .ok_or(RelayError::Disconnected)?;
        let target = occupants
            .iter()
            .find(|o| o.id == to)
            .ok_or(RelayError::UnknownRecipient(to))?;

        tracing::debug!(
            room = %self.room,
            from = %self.id,
            to = %to,
            kind = msg.label(),
            "Forwarding frame"
        );
        target
            .tx
            .send(msg)
            .map_err(|_| RelayError::UnknownRecipient(to))
    }
}

/// Inbound half: frames addressed to this participant, in sender order.
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl RelayReceiver {
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used by tests to pump deliveries
    /// deterministically.
    pub fn try_recv(&mut self) -> Option<SignalingMessage> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duocall_common::Sdp;

    #[tokio::test]
    async fn test_join_acknowledges_and_announces() {
        let relay = LocalRelay::new(2);
        let room = RoomId::from("42");

        let a = relay.join("a@example.com", &room).await.expect("join a");
        let b = relay.join("b@example.com", &room).await.expect("join b");
        let a_id = a.id;
        let b_id = b.id;
        let (_, mut a_rx) = a.split();

        match a_rx.try_recv() {
            Some(SignalingMessage::RoomJoined { participant_id, .. }) => {
                assert_eq!(participant_id, a_id)
            }
            other => panic!("expected RoomJoined, got {other:?}"),
        }
        match a_rx.try_recv() {
            Some(SignalingMessage::UserJoined { participant_id, .. }) => {
                assert_eq!(participant_id, b_id)
            }
            other => panic!("expected UserJoined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_third_join_is_rejected() {
        let relay = LocalRelay::new(2);
        let room = RoomId::from("42");

        relay.join("a@example.com", &room).await.expect("join a");
        relay.join("b@example.com", &room).await.expect("join b");
        let err = relay.join("c@example.com", &room).await.unwrap_err();
        assert!(matches!(err, RelayError::RoomFull(_)));
    }

    #[tokio::test]
    async fn test_routes_addressed_frames_point_to_point() {
        let relay = LocalRelay::new(2);
        let room = RoomId::from("42");

        let a = relay.join("a@example.com", &room).await.expect("join a");
        let b = relay.join("b@example.com", &room).await.expect("join b");
        let (a_tx, _a_rx) = a.split();
        let b_id = b.id;
        let (_, mut b_rx) = b.split();

        a_tx.send(SignalingMessage::CallOffer {
            to: b_id,
            from: a_tx.participant_id(),
            sdp: Sdp::offer("v=0"),
        })
        .await
        .expect("send");

        // Skip b's RoomJoined ack.
        b_rx.try_recv();
        match b_rx.try_recv() {
            Some(SignalingMessage::CallOffer { from, .. }) => {
                assert_eq!(from, a_tx.participant_id())
            }
            other => panic!("expected CallOffer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_an_error() {
        let relay = LocalRelay::new(2);
        let room = RoomId::from("42");
        let a = relay.join("a@example.com", &room).await.expect("join a");
        let (a_tx, _) = a.split();

        let ghost = ParticipantId::generate();
        let err = a_tx
            .send(SignalingMessage::CallEnd {
                to: ghost,
                from: a_tx.participant_id(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownRecipient(_)));
    }

    #[tokio::test]
    async fn test_leave_frees_the_slot_and_destroys_empty_rooms() {
        let relay = LocalRelay::new(2);
        let room = RoomId::from("42");

        let a = relay.join("a@example.com", &room).await.expect("join a");
        let b = relay.join("b@example.com", &room).await.expect("join b");
        let (a_tx, _) = a.split();
        let (b_tx, _) = b.split();

        b_tx.leave().await;
        assert_eq!(relay.occupant_count(&room).await, 1);

        // Slot is free again.
        relay.join("c@example.com", &room).await.expect("join c");

        a_tx.leave().await;
        // c still holds the room open.
        assert_eq!(relay.occupant_count(&room).await, 1);
    }
}
