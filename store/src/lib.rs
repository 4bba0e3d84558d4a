//! Narrow query interface over the membership store.
//!
//! The deployment this server was written for keeps members and rooms in an
//! external relational database; everything the server needs from it goes
//! through [`Store`]. [`MemStore`] is the in-process implementation backing
//! the default binary and the test suites.

mod memory;

pub use memory::MemStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use studymatch_protocol::{ClientId, ConnectionId, MemberId, Participant, RoomId};
use thiserror::Error;

/// One queue entry. Waiting while `room_id` is `None`; permanently bound to
/// a room once it is set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub client_id: ClientId,
    pub name: String,
    pub subject: String,
    pub desired_size: u32,
    /// Most recently known transport binding. May be stale for bound
    /// members whose socket has since dropped.
    pub connection_id: ConnectionId,
    pub room_id: Option<RoomId>,
    pub joined_at: DateTime<Utc>,
    /// Store-assigned queue position, strictly increasing with every insert
    /// or refresh. Breaks ties between equal timestamps.
    #[serde(skip)]
    pub arrival_seq: u64,
}

impl Member {
    /// Roster view of this member.
    pub fn participant(&self) -> Participant {
        Participant {
            id: self.id,
            name: self.name.clone(),
            connection_id: self.connection_id.clone(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.room_id.is_none()
    }
}

/// Input for creating or refreshing a waiting entry.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub client_id: ClientId,
    pub name: String,
    pub subject: String,
    pub desired_size: u32,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
}

/// A formed room. Its membership is decided once, at creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: RoomId,
    pub subject: String,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful room claim: the new room plus its members in
/// arrival order, each now bound to it.
#[derive(Debug, Clone)]
pub struct FormedRoom {
    pub room: RoomRecord,
    pub members: Vec<Member>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or failed mid-operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A conditional room claim lost to a concurrent writer.
    #[error("room claim conflict")]
    Conflict,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Create a waiting entry for the client, or refresh the existing one in
    /// place. A refresh re-dates the entry, moving it to the back of the
    /// queue.
    async fn upsert_waiting(&self, member: NewMember) -> Result<Member, StoreError>;

    /// Waiting members with this subject and group size, oldest first,
    /// excluding the given client.
    async fn waiting_peers(
        &self,
        subject: &str,
        desired_size: u32,
        exclude: &ClientId,
    ) -> Result<Vec<Member>, StoreError>;

    /// Atomically create a room and bind exactly these members to it.
    ///
    /// Fails with [`StoreError::Conflict`] and writes nothing unless every
    /// member is still waiting with the same subject and group size.
    async fn claim_and_create_room(
        &self,
        subject: &str,
        desired_size: u32,
        member_ids: &[MemberId],
    ) -> Result<FormedRoom, StoreError>;

    /// Most recently queued entry for the client, waiting or bound.
    async fn latest_member_by_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<Member>, StoreError>;

    /// Point every waiting entry of the client at a new connection. Bound
    /// members keep the binding they were matched with. Returns the number
    /// of entries updated.
    async fn rebind_connection(
        &self,
        client_id: &ClientId,
        connection_id: &ConnectionId,
    ) -> Result<u64, StoreError>;

    /// Delete the waiting entry bound to this connection, if any. Bound
    /// members are never deleted here.
    async fn delete_waiting_by_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<bool, StoreError>;

    async fn room(&self, room_id: RoomId) -> Result<Option<RoomRecord>, StoreError>;

    /// Members of a room, in arrival order.
    async fn room_participants(&self, room_id: RoomId) -> Result<Vec<Member>, StoreError>;

    /// Every waiting member, oldest first.
    async fn waiting_members(&self) -> Result<Vec<Member>, StoreError>;

    /// Latest rooms, newest first.
    async fn recent_rooms(&self, limit: usize) -> Result<Vec<RoomRecord>, StoreError>;
}
