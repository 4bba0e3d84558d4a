//! REST API handlers for actix-web.

use crate::error::ApiError;
use crate::identity;
use crate::matchmaker::Matchmaker;
use crate::relay::Relay;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use studymatch_protocol::{JoinRequest, LeaveRequest, RebindRequest, RoomId, RoomResponse};
use studymatch_store::{Member, Store};
use uuid::Uuid;

/// Cap on how many rooms the room listing returns.
pub const RECENT_ROOMS_LIMIT: usize = 50;

/// Shared application state for REST and WebSocket handlers.
pub struct AppState<S: Store> {
    pub store: Arc<S>,
    pub matchmaker: Arc<Matchmaker<S>>,
    pub relay: Arc<Relay>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(error: ApiError) -> HttpResponse {
    match &error {
        ApiError::Validation(_) => HttpResponse::BadRequest().json(ErrorResponse {
            error: error.to_string(),
        }),
        ApiError::NotFound(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: error.to_string(),
        }),
        ApiError::Store(e) => {
            tracing::error!(error = %e, "store operation failed");
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "internal error".to_string(),
            })
        }
    }
}

/// GET / - Liveness probe.
pub async fn index() -> HttpResponse {
    HttpResponse::Ok().body("studymatch server is running")
}

/// POST /api/join - Enter the waiting queue, forming a room when enough
/// compatible members are already there.
pub async fn join<S: Store>(body: web::Bytes, state: web::Data<AppState<S>>) -> HttpResponse {
    let request: JoinRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("invalid join request: {}", e),
            });
        }
    };

    match state.matchmaker.join(request).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(e),
    }
}

/// POST /api/rebind-connection - Point a client's waiting entries at its
/// current connection after a reconnect.
pub async fn rebind_connection<S: Store>(
    body: web::Bytes,
    state: web::Data<AppState<S>>,
) -> HttpResponse {
    let request: RebindRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("invalid rebind request: {}", e),
            });
        }
    };

    match identity::rebind(
        state.store.as_ref(),
        &request.client_id,
        &request.new_connection_id,
    )
    .await
    {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({ "ok": true })),
        Err(e) => error_response(e),
    }
}

/// POST /api/leave - Withdraw from the waiting queue.
pub async fn leave<S: Store>(body: web::Bytes, state: web::Data<AppState<S>>) -> HttpResponse {
    let request: LeaveRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("invalid leave request: {}", e),
            });
        }
    };

    match state.matchmaker.leave(&request.connection_id).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({ "ok": true })),
        Err(e) => error_response(e),
    }
}

/// GET /api/room/{id} - One room with its full roster.
pub async fn room_detail<S: Store>(
    path: web::Path<Uuid>,
    state: web::Data<AppState<S>>,
) -> HttpResponse {
    match fetch_room(state.store.as_ref(), RoomId(*path)).await {
        Ok(room) => HttpResponse::Ok().json(room),
        Err(e) => error_response(e),
    }
}

async fn fetch_room<S: Store>(store: &S, room_id: RoomId) -> Result<RoomResponse, ApiError> {
    let room = store.room(room_id).await?.ok_or(ApiError::NotFound("room"))?;
    let participants = store
        .room_participants(room_id)
        .await?
        .iter()
        .map(Member::participant)
        .collect();
    Ok(RoomResponse {
        room_id: room.id,
        subject: room.subject,
        participants,
    })
}

/// GET /api/waiting - Every waiting member, oldest first.
pub async fn list_waiting<S: Store>(state: web::Data<AppState<S>>) -> HttpResponse {
    match state.store.waiting_members().await {
        Ok(members) => HttpResponse::Ok().json(members),
        Err(e) => error_response(e.into()),
    }
}

/// GET /api/rooms - Latest rooms, newest first.
pub async fn list_rooms<S: Store>(state: web::Data<AppState<S>>) -> HttpResponse {
    match state.store.recent_rooms(RECENT_ROOMS_LIMIT).await {
        Ok(rooms) => HttpResponse::Ok().json(rooms),
        Err(e) => error_response(e.into()),
    }
}
