//! Wire types shared between the studymatch server and its clients.
//!
//! Everything here serializes as camelCase JSON. WebSocket frames are
//! `type`-tagged envelopes so a client can switch on a single field.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity a client keeps across reconnects and page reloads.
/// Issued by the client itself and treated as opaque by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

/// Identity of one live transport connection. Assigned by the server when
/// the socket opens and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

/// Row identity of a queue member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub Uuid);

/// Identity of a formed study room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One member of a formed room, as shown to every other member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: MemberId,
    pub name: String,
    pub connection_id: ConnectionId,
}

/// `POST /api/join` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub name: String,
    pub subject: String,
    /// Requested group size. Defaults server-side when omitted.
    pub desired_size: Option<u32>,
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
}

/// `POST /api/join` response: either queued or a complete group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JoinResponse {
    Waiting,
    #[serde(rename_all = "camelCase")]
    Matched {
        room_id: RoomId,
        participants: Vec<Participant>,
    },
}

/// `POST /api/rebind-connection` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebindRequest {
    pub client_id: ClientId,
    pub new_connection_id: ConnectionId,
}

/// `POST /api/leave` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub connection_id: ConnectionId,
}

/// `GET /api/room/{id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: RoomId,
    pub subject: String,
    pub participants: Vec<Participant>,
}

/// Server-to-client WebSocket events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// First frame on every socket: the id this connection answers to.
    #[serde(rename_all = "camelCase")]
    Connected { connection_id: ConnectionId },
    /// The member's group is complete.
    #[serde(rename_all = "camelCase")]
    Matched {
        room_id: RoomId,
        participants: Vec<Participant>,
    },
    /// A peer announced itself in the room.
    #[serde(rename_all = "camelCase")]
    PeerArrived { connection_id: ConnectionId },
    /// A peer exited the room or dropped its connection.
    #[serde(rename_all = "camelCase")]
    PeerLeft { connection_id: ConnectionId },
    /// A forwarded WebRTC signaling payload. The payload is whatever the
    /// sending peer put on the wire.
    Signal {
        from: ConnectionId,
        payload: serde_json::Value,
    },
}

/// Client-to-server WebSocket events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    EnterRoom { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    ExitRoom { room_id: RoomId },
    Signal {
        to: ConnectionId,
        payload: serde_json::Value,
    },
}

/// Which side of a WebRTC pair creates the offer.
///
/// Both peers evaluate this locally with the same two ids and reach opposite
/// conclusions, so exactly one side initiates.
pub fn initiates(local: &ConnectionId, remote: &ConnectionId) -> bool {
    local.0 < remote.0
}
