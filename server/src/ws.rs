//! WebSocket handlers for live sessions.
//!
//! One socket is one connection identity, minted here when the socket
//! upgrades. The actor registers the connection with the relay, forwards
//! relay events out as JSON text frames, and feeds inbound frames back into
//! the relay.

use crate::relay::Relay;
use crate::rest::AppState;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use studymatch_protocol::{ClientEvent, ConnectionId, ServerEvent};
use studymatch_store::Store;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket actor for one live connection.
pub struct SessionActor<S: Store> {
    connection_id: ConnectionId,
    store: Arc<S>,
    relay: Arc<Relay>,
    last_heartbeat: Instant,
}

/// Message type for forwarding relay events to the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct Push(ServerEvent);

impl<S: Store> SessionActor<S> {
    pub fn new(connection_id: ConnectionId, store: Arc<S>, relay: Arc<Relay>) -> Self {
        Self {
            connection_id,
            store,
            relay,
            last_heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::debug!(
                    connection_id = %act.connection_id,
                    "WebSocket client heartbeat timeout"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_event_forwarder(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let mut events = self.relay.register(self.connection_id.clone());
        let addr = ctx.address();
        actix::spawn(async move {
            while let Some(event) = events.recv().await {
                addr.do_send(Push(event));
            }
        });
    }

    fn dispatch(&self, event: ClientEvent) {
        match event {
            ClientEvent::EnterRoom { room_id } => {
                self.relay.enter_room(&self.connection_id, room_id)
            }
            ClientEvent::ExitRoom { room_id } => self.relay.exit_room(&self.connection_id, room_id),
            ClientEvent::Signal { to, payload } => {
                self.relay.forward_signal(&self.connection_id, &to, payload)
            }
        }
    }
}

impl<S: Store> Actor for SessionActor<S> {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        self.start_event_forwarder(ctx);

        // First frame on every socket: the id this connection answers to.
        self.relay.push(
            &self.connection_id,
            ServerEvent::Connected {
                connection_id: self.connection_id.clone(),
            },
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.relay.disconnect(&self.connection_id);

        // A dropped socket abandons its place in the queue. Members already
        // matched keep their room.
        let store = Arc::clone(&self.store);
        let connection_id = self.connection_id.clone();
        actix::spawn(async move {
            match store.delete_waiting_by_connection(&connection_id).await {
                Ok(true) => {
                    tracing::debug!(%connection_id, "dropped waiting member on disconnect")
                }
                Ok(false) => {}
                Err(e) => tracing::error!(
                    %connection_id,
                    error = %e,
                    "failed to clear waiting member on disconnect"
                ),
            }
        });
    }
}

impl<S: Store> Handler<Push> for SessionActor<S> {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        if let Ok(text) = serde_json::to_string(&msg.0) {
            ctx.text(text);
        }
    }
}

impl<S: Store> StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionActor<S> {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => self.dispatch(event),
                Err(e) => {
                    tracing::debug!(
                        connection_id = %self.connection_id,
                        error = %e,
                        "ignoring malformed client frame"
                    );
                }
            },
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!("WebSocket close: {:?}", reason);
                ctx.stop();
            }
            _ => (),
        }
    }
}

/// HTTP handler to upgrade to a WebSocket session.
pub async fn session_ws<S: Store>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<S>>,
) -> Result<HttpResponse, actix_web::Error> {
    let connection_id = ConnectionId(Uuid::new_v4().to_string());
    tracing::info!(%connection_id, "WebSocket session opened");

    let actor = SessionActor::new(
        connection_id,
        Arc::clone(&state.store),
        Arc::clone(&state.relay),
    );
    ws::start(actor, &req, stream)
}
