//! Crashpoint Server
//!
//! Binary entrypoint: wires config, the round engine, the authoritative
//! clock task, and the WebSocket server together.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crashpoint::config::{EngineConfig, ServerConfig};
use crashpoint::engine::Engine;
use crashpoint::game::clock::RoundClock;
use crashpoint::network::auth::AuthConfig;
use crashpoint::network::server::GameServer;
use crashpoint::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine_config = EngineConfig::from_env();
    let server_config = ServerConfig::from_env();
    let auth_config = AuthConfig::from_env();

    info!("Crashpoint Server v{VERSION}");
    info!(
        "betting window {:?}, cooldown {:?}, tick {:?}",
        engine_config.betting_window, engine_config.cooldown, engine_config.tick_interval
    );
    if !auth_config.is_configured() {
        info!("no auth provider configured: demo-only guest play");
    }

    let engine = Engine::new(engine_config);
    let (shutdown_tx, _) = broadcast::channel(1);

    // The one authoritative round clock.
    let clock = RoundClock::new(engine.clone());
    let clock_handle = tokio::spawn(clock.run(shutdown_tx.subscribe()));

    let server = Arc::new(GameServer::new(server_config, auth_config, engine));

    // Ctrl-C triggers a coordinated shutdown of clock and server.
    {
        let shutdown_tx = shutdown_tx.clone();
        let server = server.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(());
                server.shutdown();
            }
        });
    }

    server.run().await.context("server terminated abnormally")?;

    let _ = shutdown_tx.send(());
    let _ = clock_handle.await;
    Ok(())
}
