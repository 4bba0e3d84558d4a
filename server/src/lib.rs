pub mod config;
pub mod error;
pub mod identity;
pub mod matchmaker;
pub mod relay;
pub mod rest;
pub mod ws;

use crate::matchmaker::Matchmaker;
use crate::relay::Relay;
use crate::rest::AppState;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use studymatch_store::Store;

pub use config::ServerConfig;
pub use error::{ApiError, ServerError};

/// Run the server over the given store until the listener shuts down.
pub async fn run<S: Store>(config: ServerConfig, store: Arc<S>) -> Result<(), ServerError> {
    tracing::info!("Server starting on {}", config.bind_addr);

    let relay = Arc::new(Relay::new());
    let matchmaker = Arc::new(Matchmaker::new(Arc::clone(&store), Arc::clone(&relay)));

    let app_state = web::Data::new(AppState {
        store,
        matchmaker,
        relay,
    });

    let cors_origin = config.cors_origin.clone();
    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header(),
            None => Cors::permissive(), // Allow all origins for dev
        };
        App::new()
            .wrap(cors)
            .app_data(app_state.clone())
            .route("/", web::get().to(rest::index))
            .route("/api/join", web::post().to(rest::join::<S>))
            .route(
                "/api/rebind-connection",
                web::post().to(rest::rebind_connection::<S>),
            )
            .route("/api/leave", web::post().to(rest::leave::<S>))
            .route("/api/room/{id}", web::get().to(rest::room_detail::<S>))
            .route("/api/waiting", web::get().to(rest::list_waiting::<S>))
            .route("/api/rooms", web::get().to(rest::list_rooms::<S>))
            .route("/ws", web::get().to(ws::session_ws::<S>))
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
