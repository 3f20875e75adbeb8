//! relay-gateway: the chat-relay WebSocket gateway process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chatlink::server::monitor::{COLLECTION_INTERVAL, HEALTH_CHECK_INTERVAL};
use chatlink::server::{AppState, ConnectionRegistry, EchoHandler, GatewayConfig, HealthMonitor};
use chatlink::ErrorStats;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = GatewayConfig::from_env();
    chat_relay::logging::init(&config.log_level);

    info!("========================================");
    info!("Starting relay gateway");
    info!(
        port = config.port,
        max_connections = config.max_connections,
        "Press Ctrl+C to stop"
    );
    info!("========================================");

    let monitor = Arc::new(HealthMonitor::new(config.thresholds()));
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::clone(&monitor),
        config.max_connections,
        config.idle_timeout,
        config.heartbeat_interval,
    ));
    let errors = Arc::new(ErrorStats::new());

    let state = AppState {
        registry: Arc::clone(&registry),
        monitor: Arc::clone(&monitor),
        errors,
        config: Arc::new(config.clone()),
        handler: Arc::new(EchoHandler),
    };

    let collector = monitor.spawn_collector(COLLECTION_INTERVAL, HEALTH_CHECK_INTERVAL);
    let sweeper = registry.spawn_sweeper();

    let app = chatlink::server::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    registry.shutdown();
    monitor.stop();
    sweeper.abort();
    collector.abort();
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl-c received");
}
