//! netrep Replication Server
//!
//! Authoritative server for networked object replication. Native clients
//! connect over TCP, browser clients over WebSocket, and operators inspect the
//! store through a small REST API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use netrep::api;
use netrep::api::ApiState;
use netrep::config::ServerConfig;
use netrep::net::handler::ConnectionHandler;
use netrep::state::AppState;
use netrep::VERSION;

/// How often idle sessions are swept
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the debug flag can shape logging
    let config = ServerConfig::load().await?;

    init_logging(config.debug);

    info!("╔══════════════════════════════════════════════╗");
    info!("║        netrep Replication Server v{}      ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = Arc::new(AppState::new(config.clone(), shutdown_tx.clone())?);
    info!("Application state initialized");

    // Start TCP listener for native clients
    let game_addr: SocketAddr = config.game_address().parse()?;
    let game_listener = TcpListener::bind(game_addr).await?;
    info!("Replication server listening on: {}", game_addr);

    let game_state = state.clone();
    let mut game_shutdown_rx = shutdown_tx.subscribe();
    let game_handle = tokio::spawn(async move {
        accept_connections(game_listener, game_state, false, &mut game_shutdown_rx).await;
    });

    // Start WebSocket listener for browser clients
    let ws_handle = if config.websocket_enabled {
        let ws_addr: SocketAddr = config.websocket_address().parse()?;
        let ws_listener = TcpListener::bind(ws_addr).await?;
        info!("WebSocket server listening on: {}", ws_addr);

        let ws_state = state.clone();
        let mut ws_shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            accept_connections(ws_listener, ws_state, true, &mut ws_shutdown_rx).await;
        }))
    } else {
        info!("WebSocket listener disabled");
        None
    };

    // Start the management API
    let api_handle = if config.api_enabled {
        let api_addr: SocketAddr = config.management_address().parse()?;
        let api_listener = TcpListener::bind(api_addr).await?;
        info!("Management API listening on: {}", api_addr);

        let api_state = ApiState::new(state.clone());
        let api_shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            run_api_server(api_listener, api_state, api_shutdown_rx).await;
        }))
    } else {
        info!("Management API disabled");
        None
    };

    // Sweep idle sessions
    let maintenance_state = state.clone();
    let mut maintenance_shutdown_rx = shutdown_tx.subscribe();
    let maintenance_handle = tokio::spawn(async move {
        run_maintenance(maintenance_state, &mut maintenance_shutdown_rx).await;
    });

    info!("Server startup complete!");
    info!("{} is ready for connections", config.server_name);

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");

    // Wait for tasks to finish
    let _ = game_handle.await;
    if let Some(handle) = ws_handle {
        let _ = handle.await;
    }
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }
    let _ = maintenance_handle.await;

    // Cleanup
    state.session_manager.disconnect_all();
    info!("All sessions disconnected");

    let stats = state.store.lock().stats();
    info!(
        representations = stats.representations,
        sections = stats.sections,
        "Server shutdown complete. Goodbye!"
    );
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(debug: bool) {
    let default_filter = if debug {
        "debug,netrep=trace"
    } else {
        "info,netrep=debug"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Accept incoming connections on one listener
async fn accept_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    is_websocket: bool,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let kind = if is_websocket { "WebSocket" } else { "TCP" };

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New {} connection from: {}", kind, addr);
                        let handler = ConnectionHandler::new(state.clone(), is_websocket);
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle(stream, addr).await {
                                warn!("{} connection error from {}: {}", kind, addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept {} connection: {}", kind, e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("{} connection acceptor shutting down", kind);
                break;
            }
        }
    }
}

/// Run the management API server
async fn run_api_server(
    listener: TcpListener,
    state: ApiState,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let router = api::create_router(state);

    let shutdown_signal = async move {
        let _ = shutdown_rx.recv().await;
        info!("Management API shutting down");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .unwrap_or_else(|e| error!("API server error: {}", e));
}

/// Periodic housekeeping
async fn run_maintenance(state: Arc<AppState>, shutdown_rx: &mut broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = state.session_manager.cleanup_idle();
                if removed > 0 {
                    info!(removed = removed, "Removed idle sessions");
                }
                let stats = state.store.lock().stats();
                debug!(
                    sessions = state.session_manager.count(),
                    representations = stats.representations,
                    sections = stats.sections,
                    "Maintenance tick"
                );
            }
            _ = shutdown_rx.recv() => {
                debug!("Maintenance task shutting down");
                break;
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
