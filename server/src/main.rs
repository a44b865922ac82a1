use clap::Parser;
use log::{error, info};
use server::config::{Args, ServerConfig};
use server::network::Server;
use server::store::MemoryStore;
use std::sync::Arc;

/// Parses flags, loads the world and runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig::from_args(&args)?;

    // Without reference data the server cannot serve anyone.
    let store = match MemoryStore::from_json_file(&args.world) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to load world: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Starting server with {} workers, queue capacity {}",
        config.workers, config.queue_capacity
    );
    let server = Server::bind(config, Arc::new(store)).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.trigger();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}
