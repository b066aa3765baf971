use std::net::SocketAddr;
use std::sync::Arc;

use ecg_relay::{
    classifier::OnnxClassifier, config::RelayConfig, monitor::spawn_heartbeat_monitor,
    websocket::{relay_router, RelayState},
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecg_relay=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting ECG Relay Server");

    // Load configuration from environment
    let config = RelayConfig::from_env()?;
    info!("📋 Configuration loaded:");
    info!("   Bind address: {}", config.bind_address());
    info!("   Model path: {:?}", config.model_path);
    info!("   Window size: {}", config.window_size);
    info!("   Min valid signals: {}", config.min_valid_signals);
    info!("   Alert threshold: {}", config.alert_threshold);
    info!(
        "   Heartbeat timeout: {}s (checked every {}s)",
        config.heartbeat_timeout_seconds, config.monitor_interval_seconds
    );

    // Load the classifier artifact; failure here is fatal by design
    let model = match OnnxClassifier::load(&config.model_path) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            error!("Critical error loading model: {}", e);
            return Err(e.into());
        }
    };
    info!("✅ Classifier model loaded");

    // Shared state and shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = RelayState::new(model, &config, shutdown_rx.clone());

    // Background heartbeat monitor
    let monitor = spawn_heartbeat_monitor(
        state.device.clone(),
        state.hub.clone(),
        config.monitor_interval_seconds,
        config.heartbeat_timeout_seconds,
        shutdown_rx,
    );

    // Build router
    let app = relay_router(state);

    // Start server
    let addr: SocketAddr = config.bind_address().parse()?;
    info!("🎧 Listening on {}", addr);
    info!("📡 WebSocket endpoint: ws://{}/ws", addr);
    info!("🔑 Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    // The monitor observes the same shutdown flag; wait for it to stop
    let _ = monitor.await;
    info!("Server stopped");

    Ok(())
}

/// Wait for SIGINT, then flip the shutdown flag so connection loops and the
/// monitor close out cleanly.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
}
