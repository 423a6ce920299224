//! Rolodex Server - standalone entry point for the notes API and note worker
//!
//! A thin wrapper around `rolodex-api`. `ROLODEX_ROLE` picks whether this
//! process serves HTTP, runs the note worker, or both.

use anyhow::{Context, Result};
use rolodex_api::{RolodexServer, ServerConfig};
use rolodex_queue::QueueConfig;

#[tokio::main]
async fn main() -> Result<()> {
    rolodex_api::init_tracing();

    let queue_config = QueueConfig::from_env().context("invalid queue configuration")?;
    let config = ServerConfig::from_env();

    tracing::info!(role = ?config.role, addr = %config.addr, "Starting Rolodex server");

    let server = RolodexServer::new(config, queue_config)
        .await
        .map_err(|e| {
            tracing::error!("Failed to initialize server: {}", e);
            e
        })?;

    server.run().await.map_err(|e| {
        tracing::error!("Server error during execution: {}", e);
        e
    })?;

    Ok(())
}
