//! Presence tracking and signaling fan-out for live connections.
//!
//! The relay owns everything about a connection that only matters while its
//! socket is open: the event queue feeding the socket, which room the
//! connection announced itself in, and who else is in that room. All of it
//! is process-local and starts empty on every boot.
//!
//! Every method is synchronous. Events for a room are emitted while its
//! member set is locked, so every observer sees a peer's arrival before that
//! peer's departure. A room guard may be held while pushing through the
//! connection table, never the reverse.

use dashmap::DashMap;
use std::collections::HashSet;
use studymatch_protocol::{ConnectionId, Participant, RoomId, ServerEvent};
use tokio::sync::mpsc;

pub struct Relay {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
}

struct Connection {
    events: mpsc::UnboundedSender<ServerEvent>,
    room: Option<RoomId>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a live connection and hand back its event queue.
    pub fn register(&self, connection_id: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(
            connection_id,
            Connection {
                events: tx,
                room: None,
            },
        );
        rx
    }

    /// Drop a connection, announcing its departure to any room it was in.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        let Some((_, connection)) = self.connections.remove(connection_id) else {
            return;
        };
        if let Some(room_id) = connection.room {
            self.depart(connection_id, room_id);
        }
        tracing::debug!(%connection_id, "connection dropped from relay");
    }

    /// Announce presence in a room. Entering while present somewhere else
    /// exits the old room first; re-entering the current room does nothing.
    /// Unknown connections are ignored.
    pub fn enter_room(&self, connection_id: &ConnectionId, room_id: RoomId) {
        let previous = {
            let Some(mut connection) = self.connections.get_mut(connection_id) else {
                return;
            };
            if connection.room == Some(room_id) {
                return;
            }
            std::mem::replace(&mut connection.room, Some(room_id))
        };
        if let Some(previous) = previous {
            self.depart(connection_id, previous);
        }

        let emptied = {
            let mut members = self.rooms.entry(room_id).or_default();
            for peer in members.iter() {
                self.push(
                    peer,
                    ServerEvent::PeerArrived {
                        connection_id: connection_id.clone(),
                    },
                );
                self.push(
                    connection_id,
                    ServerEvent::PeerArrived {
                        connection_id: peer.clone(),
                    },
                );
            }
            members.insert(connection_id.clone());

            // A disconnect can land between the table update above and this
            // insert; its departure pass finds nothing to remove. Re-check
            // the table and withdraw the id ourselves in that case.
            if self.connections.contains_key(connection_id) {
                false
            } else {
                members.remove(connection_id);
                for peer in members.iter() {
                    self.push(
                        peer,
                        ServerEvent::PeerLeft {
                            connection_id: connection_id.clone(),
                        },
                    );
                }
                members.is_empty()
            }
        };
        if emptied {
            self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        }
    }

    /// Withdraw presence from a room. Ignored when the connection is not in
    /// that room.
    pub fn exit_room(&self, connection_id: &ConnectionId, room_id: RoomId) {
        {
            let Some(mut connection) = self.connections.get_mut(connection_id) else {
                return;
            };
            if connection.room != Some(room_id) {
                return;
            }
            connection.room = None;
        }
        self.depart(connection_id, room_id);
    }

    /// Forward a signaling payload to one connection, untouched. A missing
    /// target drops the payload without telling the sender.
    pub fn forward_signal(
        &self,
        from: &ConnectionId,
        to: &ConnectionId,
        payload: serde_json::Value,
    ) {
        let delivered = self.push(
            to,
            ServerEvent::Signal {
                from: from.clone(),
                payload,
            },
        );
        if !delivered {
            tracing::debug!(%from, %to, "signal target not connected, dropped");
        }
    }

    /// Tell every participant of a fresh room that their group is complete.
    /// Participants whose recorded connection is not live are skipped.
    pub fn notify_matched(&self, room_id: RoomId, participants: &[Participant]) {
        for participant in participants {
            let event = ServerEvent::Matched {
                room_id,
                participants: participants.to_vec(),
            };
            if !self.push(&participant.connection_id, event) {
                tracing::debug!(
                    connection_id = %participant.connection_id,
                    %room_id,
                    "match notification skipped, connection not live"
                );
            }
        }
    }

    fn depart(&self, connection_id: &ConnectionId, room_id: RoomId) {
        let mut emptied = false;
        if let Some(mut members) = self.rooms.get_mut(&room_id) {
            if !members.remove(connection_id) {
                return;
            }
            for peer in members.iter() {
                self.push(
                    peer,
                    ServerEvent::PeerLeft {
                        connection_id: connection_id.clone(),
                    },
                );
            }
            emptied = members.is_empty();
        }
        if emptied {
            self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        }
    }

    pub(crate) fn push(&self, to: &ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(to) {
            Some(connection) => connection.events.send(event).is_ok(),
            None => false,
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
