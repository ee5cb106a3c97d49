//! Error handling module
//!
//! Defines the error taxonomy of the replication layer. Every variant here is
//! an invariant violation: the connection that produced it is terminated and
//! nothing is retried.

use std::io;

use thiserror::Error;

use crate::replication::entity::{EntityKey, NetworkId};

/// Main error type for netrep
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol desynchronisation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Type registry errors
    #[error("Type registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Client entity contract violations
    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),

    /// Server authority store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ReplicationError {
    /// Whether the peer simply went away, as opposed to a real failure
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ReplicationError::Network(NetworkError::ConnectionClosed)
                | ReplicationError::Network(NetworkError::Timeout)
        )
    }
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Too many connections from {0}")]
    TooManyConnections(String),

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),
}

/// Wire-level errors; any of these means the byte stream is desynchronised
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Invalid reply type: {0}")]
    InvalidReplyType(u8),

    #[error("Frame length {declared} does not cover the {header} byte header")]
    MalformedFrame { declared: i32, header: usize },

    #[error("Frame overrun: frame ends at {end}, only {available} bytes available")]
    FrameOverrun { end: usize, available: usize },

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Encoded length mismatch: header claims {claimed}, wrote {actual}")]
    LengthMismatch { claimed: usize, actual: usize },

    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Malformed body: {0}")]
    MalformedBody(String),

    #[error("Record {id} references parent {parent_id} before it was sent")]
    OrphanRecord { id: NetworkId, parent_id: NetworkId },

    #[error("Reply references unknown entity {0}")]
    UnknownEntity(NetworkId),

    #[error("Unexpected {reply} reply for entity {entity_id} in state {state}")]
    UnexpectedReply {
        reply: String,
        entity_id: NetworkId,
        state: String,
    },

    #[error("Message from already registered entity {0}")]
    RegisteredSender(NetworkId),
}

/// Type registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown type id: {0}")]
    UnknownTypeId(i32),

    #[error("Unknown type name: {0}")]
    UnknownTypeName(String),

    #[error("Type registered twice: {0}")]
    DuplicateType(String),
}

/// Client-side entity contract violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    #[error("Entity not found: {0:?}")]
    UnknownEntity(EntityKey),

    #[error("Id {id} already belongs to another entity")]
    IdInUse { id: NetworkId },

    #[error("Entity {0:?} already has a network parent")]
    AlreadyParented(EntityKey),

    #[error("Entity {0:?} cannot be its own parent")]
    SelfParent(EntityKey),

    #[error("Parent {0:?} is not registered with the server yet")]
    ParentNotRegistered(EntityKey),

    #[error("Entity of type {0} has no section fingerprint")]
    NotASection(String),
}

/// Server authority store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Parent representation {0} does not exist")]
    UnknownParent(NetworkId),

    #[error("Section representation {0} does not exist")]
    UnknownSection(NetworkId),

    #[error("Representation id space exhausted")]
    IdsExhausted,
}

/// Result type alias for netrep operations
pub type Result<T> = std::result::Result<T, ReplicationError>;
