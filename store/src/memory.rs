//! In-memory [`Store`] implementation.

use crate::{FormedRoom, Member, NewMember, RoomRecord, RoomStatus, Store, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use studymatch_protocol::{ClientId, ConnectionId, MemberId, RoomId};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Process-local store. A single lock over both tables makes every trait
/// method one atomic step, which is what gives the room claim its
/// all-or-nothing behavior.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    members: HashMap<MemberId, Member>,
    rooms: HashMap<RoomId, RoomRecord>,
    next_seq: u64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn next_arrival(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[async_trait]
impl Store for MemStore {
    async fn upsert_waiting(&self, new: NewMember) -> Result<Member, StoreError> {
        let mut tables = self.inner.lock().await;
        let seq = tables.next_arrival();
        let existing = tables
            .members
            .values_mut()
            .find(|m| m.is_waiting() && m.client_id == new.client_id);

        let member = match existing {
            Some(member) => {
                member.name = new.name;
                member.subject = new.subject;
                member.desired_size = new.desired_size;
                member.connection_id = new.connection_id;
                member.joined_at = Utc::now();
                member.arrival_seq = seq;
                member.clone()
            }
            None => {
                let member = Member {
                    id: MemberId(Uuid::new_v4()),
                    client_id: new.client_id,
                    name: new.name,
                    subject: new.subject,
                    desired_size: new.desired_size,
                    connection_id: new.connection_id,
                    room_id: None,
                    joined_at: Utc::now(),
                    arrival_seq: seq,
                };
                tables.members.insert(member.id, member.clone());
                member
            }
        };
        Ok(member)
    }

    async fn waiting_peers(
        &self,
        subject: &str,
        desired_size: u32,
        exclude: &ClientId,
    ) -> Result<Vec<Member>, StoreError> {
        let tables = self.inner.lock().await;
        let mut peers: Vec<Member> = tables
            .members
            .values()
            .filter(|m| {
                m.is_waiting()
                    && m.subject == subject
                    && m.desired_size == desired_size
                    && m.client_id != *exclude
            })
            .cloned()
            .collect();
        peers.sort_by_key(|m| m.arrival_seq);
        Ok(peers)
    }

    async fn claim_and_create_room(
        &self,
        subject: &str,
        desired_size: u32,
        member_ids: &[MemberId],
    ) -> Result<FormedRoom, StoreError> {
        let mut tables = self.inner.lock().await;

        // Validate everything before touching anything.
        for id in member_ids {
            let eligible = tables.members.get(id).is_some_and(|m| {
                m.is_waiting() && m.subject == subject && m.desired_size == desired_size
            });
            if !eligible {
                return Err(StoreError::Conflict);
            }
        }

        let room = RoomRecord {
            id: RoomId(Uuid::new_v4()),
            subject: subject.to_string(),
            status: RoomStatus::Active,
            created_at: Utc::now(),
        };

        let mut members = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            if let Some(member) = tables.members.get_mut(id) {
                member.room_id = Some(room.id);
                members.push(member.clone());
            }
        }
        members.sort_by_key(|m| m.arrival_seq);
        tables.rooms.insert(room.id, room.clone());

        Ok(FormedRoom { room, members })
    }

    async fn latest_member_by_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<Member>, StoreError> {
        let tables = self.inner.lock().await;
        Ok(tables
            .members
            .values()
            .filter(|m| m.client_id == *client_id)
            .max_by_key(|m| m.arrival_seq)
            .cloned())
    }

    async fn rebind_connection(
        &self,
        client_id: &ClientId,
        connection_id: &ConnectionId,
    ) -> Result<u64, StoreError> {
        let mut tables = self.inner.lock().await;
        let mut rebound = 0;
        for member in tables
            .members
            .values_mut()
            .filter(|m| m.is_waiting() && m.client_id == *client_id)
        {
            member.connection_id = connection_id.clone();
            rebound += 1;
        }
        Ok(rebound)
    }

    async fn delete_waiting_by_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<bool, StoreError> {
        let mut tables = self.inner.lock().await;
        let before = tables.members.len();
        tables
            .members
            .retain(|_, m| !(m.is_waiting() && m.connection_id == *connection_id));
        Ok(tables.members.len() < before)
    }

    async fn room(&self, room_id: RoomId) -> Result<Option<RoomRecord>, StoreError> {
        let tables = self.inner.lock().await;
        Ok(tables.rooms.get(&room_id).cloned())
    }

    async fn room_participants(&self, room_id: RoomId) -> Result<Vec<Member>, StoreError> {
        let tables = self.inner.lock().await;
        let mut members: Vec<Member> = tables
            .members
            .values()
            .filter(|m| m.room_id == Some(room_id))
            .cloned()
            .collect();
        members.sort_by_key(|m| m.arrival_seq);
        Ok(members)
    }

    async fn waiting_members(&self) -> Result<Vec<Member>, StoreError> {
        let tables = self.inner.lock().await;
        let mut waiting: Vec<Member> = tables
            .members
            .values()
            .filter(|m| m.is_waiting())
            .cloned()
            .collect();
        waiting.sort_by_key(|m| m.arrival_seq);
        Ok(waiting)
    }

    async fn recent_rooms(&self, limit: usize) -> Result<Vec<RoomRecord>, StoreError> {
        let tables = self.inner.lock().await;
        let mut rooms: Vec<RoomRecord> = tables.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rooms.truncate(limit);
        Ok(rooms)
    }
}
