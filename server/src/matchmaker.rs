//! Queueing and group formation.
//!
//! A join lands the member in the waiting queue and then tries to complete a
//! group. Room creation goes through the store's conditional claim, so two
//! joins racing over the same waiting peers cannot both win; the loser
//! re-reads the queue and tries again.

use crate::error::ApiError;
use crate::relay::Relay;
use std::sync::Arc;
use studymatch_protocol::{ConnectionId, JoinRequest, JoinResponse, MemberId, Participant};
use studymatch_store::{Member, NewMember, Store, StoreError};

/// Group size used when a join does not ask for one.
pub const DEFAULT_GROUP_SIZE: u32 = 2;
/// A study group needs at least a pair.
pub const MIN_GROUP_SIZE: u32 = 2;

pub struct Matchmaker<S: Store> {
    store: Arc<S>,
    relay: Arc<Relay>,
}

impl<S: Store> Matchmaker<S> {
    pub fn new(store: Arc<S>, relay: Arc<Relay>) -> Self {
        Self { store, relay }
    }

    /// Enter the queue and form a room if enough compatible members are
    /// waiting. Joining again with the same client id refreshes the existing
    /// entry instead of stacking a second one.
    pub async fn join(&self, request: JoinRequest) -> Result<JoinResponse, ApiError> {
        let desired_size = validate(&request)?;
        let member = self
            .store
            .upsert_waiting(NewMember {
                client_id: request.client_id.clone(),
                name: request.name.trim().to_string(),
                subject: request.subject.trim().to_string(),
                desired_size,
                connection_id: request.connection_id.clone(),
            })
            .await?;
        tracing::debug!(
            client_id = %member.client_id,
            subject = %member.subject,
            desired_size,
            "queued waiting member"
        );

        loop {
            let peers = self
                .store
                .waiting_peers(&member.subject, desired_size, &member.client_id)
                .await?;
            if (peers.len() as u32) + 1 < desired_size {
                return Ok(JoinResponse::Waiting);
            }

            let mut member_ids: Vec<MemberId> = peers
                .iter()
                .take(desired_size as usize - 1)
                .map(|peer| peer.id)
                .collect();
            member_ids.push(member.id);

            match self
                .store
                .claim_and_create_room(&member.subject, desired_size, &member_ids)
                .await
            {
                Ok(formed) => {
                    let participants: Vec<Participant> =
                        formed.members.iter().map(Member::participant).collect();
                    self.relay.notify_matched(formed.room.id, &participants);
                    tracing::info!(
                        room_id = %formed.room.id,
                        subject = %formed.room.subject,
                        members = participants.len(),
                        "room formed"
                    );
                    return Ok(JoinResponse::Matched {
                        room_id: formed.room.id,
                        participants,
                    });
                }
                Err(StoreError::Conflict) => {
                    match self.store.latest_member_by_client(&member.client_id).await? {
                        Some(current) => {
                            // A concurrent join may have claimed this client
                            // into a room already.
                            if let Some(room_id) = current.room_id {
                                let participants: Vec<Participant> = self
                                    .store
                                    .room_participants(room_id)
                                    .await?
                                    .iter()
                                    .map(Member::participant)
                                    .collect();
                                return Ok(JoinResponse::Matched {
                                    room_id,
                                    participants,
                                });
                            }
                            // A different id means the entry was dropped and
                            // recreated while this join was claiming; the
                            // newer request owns the queue spot either way.
                            if current.id != member.id
                                || current.subject != member.subject
                                || current.desired_size != desired_size
                            {
                                tracing::debug!(
                                    client_id = %member.client_id,
                                    "join superseded by a newer request"
                                );
                                return Ok(JoinResponse::Waiting);
                            }
                            // Lost the claim over a peer. The queue has
                            // changed; read it again.
                        }
                        None => {
                            tracing::debug!(
                                client_id = %member.client_id,
                                "member removed while matching"
                            );
                            return Ok(JoinResponse::Waiting);
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove the waiting entry bound to this connection. Members already in
    /// a room are unaffected.
    pub async fn leave(&self, connection_id: &ConnectionId) -> Result<bool, ApiError> {
        if connection_id.0.trim().is_empty() {
            return Err(ApiError::Validation("connectionId is required".to_string()));
        }
        let removed = self.store.delete_waiting_by_connection(connection_id).await?;
        if removed {
            tracing::debug!(%connection_id, "waiting member left the queue");
        }
        Ok(removed)
    }
}

fn validate(request: &JoinRequest) -> Result<u32, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    if request.subject.trim().is_empty() {
        return Err(ApiError::Validation("subject is required".to_string()));
    }
    if request.connection_id.0.trim().is_empty() {
        return Err(ApiError::Validation("connectionId is required".to_string()));
    }
    if request.client_id.0.trim().is_empty() {
        return Err(ApiError::Validation("clientId is required".to_string()));
    }
    let desired_size = request.desired_size.unwrap_or(DEFAULT_GROUP_SIZE);
    if desired_size < MIN_GROUP_SIZE {
        return Err(ApiError::Validation(format!(
            "desiredSize must be at least {}",
            MIN_GROUP_SIZE
        )));
    }
    Ok(desired_size)
}
