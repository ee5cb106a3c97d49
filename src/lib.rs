//! netrep Replication Library
//!
//! This library replicates hierarchical object graphs between clients and an
//! authoritative server. Clients create entities locally, the server assigns
//! the permanent ids, and identical sections are deduplicated by fingerprint.
//!
//! ## Modules
//!
//! - `api` - Management HTTP API (health, stats, section inspection)
//! - `config` - Server and client configuration management
//! - `error` - Error types and result definitions
//! - `net` - Frame codec, transports, sessions and connection handling
//! - `protocol` - Replication messages and section tree serialization
//! - `replication` - Entity identity, type registry, client and server state
//! - `state` - Shared server state

pub mod api;
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod replication;
pub mod state;

// Re-export commonly used types
pub use config::{ClientConfig, ServerConfig};
pub use error::{ReplicationError, Result};
pub use replication::{
    AuthorityStore, EntityKey, NetworkId, RawReplica, ReplicaClient, ReplicaState, Replicable,
    TypeDescriptor, TypeRegistry,
};
pub use state::AppState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
