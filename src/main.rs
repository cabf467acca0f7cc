//! Room chat server - Entry Point
//!
//! Loads configuration, builds the hub and the gateway, and accepts
//! connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use room_chat::{handle_connection, AppError, Config, Gateway, Hub, MemoryDirectory};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=room_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("room_chat=info")),
        )
        .init();

    let mut config = Config::from_env()?;

    // Bind address from command line overrides the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_address = addr;
    }
    info!("Starting with {:?}", config);

    let directory = Arc::new(MemoryDirectory::from_config(&config));
    let hub = Hub::new(config.chat);
    let gateway = Arc::new(Gateway::new(hub, directory.clone(), directory));

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Room chat server listening on {}", config.bind_address);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let gateway = Arc::clone(&gateway);

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    match handle_connection(stream, gateway).await {
                        Ok(()) => {}
                        Err(e) if e.is_rejection() => info!("Connection from {} rejected: {}", addr, e),
                        Err(e) => error!("Connection handler error: {}", e),
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
