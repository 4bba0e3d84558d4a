//! Study group matchmaking and signaling server over the in-process store.

use std::sync::Arc;
use studymatch_server::{run, ServerConfig};
use studymatch_store::MemStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;

    println!("Starting studymatch server...");
    println!("  HTTP: http://{}", config.bind_addr);
    println!("  WS:   ws://{}/ws", config.bind_addr);
    println!();
    println!("Endpoints:");
    println!("  POST /api/join               - Enter the waiting queue");
    println!("  POST /api/rebind-connection  - Rebind after a reconnect");
    println!("  POST /api/leave              - Leave the waiting queue");
    println!("  GET  /api/room/{{id}}          - Room detail");
    println!("  GET  /api/waiting            - Waiting members");
    println!("  GET  /api/rooms              - Recent rooms");
    println!();

    run(config, Arc::new(MemStore::new())).await?;

    Ok(())
}
