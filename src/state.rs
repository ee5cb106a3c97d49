//! Application state module
//!
//! Contains the shared state used across all server connections.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::net::session::SessionManager;
use crate::replication::store::AuthorityStore;
use crate::replication::types::TypeRegistry;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager for tracking connected clients
    pub session_manager: SessionManager,
    /// Authoritative entity store; one lock acquisition per handled message
    pub store: Mutex<AuthorityStore>,
    /// Types the server validates requests against, if configured
    pub types: Option<Arc<TypeRegistry>>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let types = if config.replicated_types.is_empty() {
            info!("No replicated types configured, type ids will not be validated");
            None
        } else {
            let registry = TypeRegistry::from_names(config.replicated_types.iter().cloned())?;
            info!(types = registry.len(), "Type registry loaded");
            Some(Arc::new(registry))
        };

        let store = match &types {
            Some(types) => AuthorityStore::with_types(types.clone()),
            None => AuthorityStore::new(),
        };

        let session_manager =
            SessionManager::with_limits(config.max_connections_per_ip, config.idle_timeout_secs);

        Ok(Self {
            config,
            session_manager,
            store: Mutex::new(store),
            types,
            shutdown_tx,
        })
    }

    /// Number of types the server knows, zero when validation is off
    pub fn registered_types(&self) -> usize {
        self.types.as_ref().map(|t| t.len()).unwrap_or(0)
    }
}
