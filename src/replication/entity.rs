//! Entity identity types and the collaborator interface
//!
//! A replicated entity is identified on the wire by a [`NetworkId`]:
//! - positive ids are issued by the server and unique network-wide
//! - negative ids are placeholders handed out locally while a request is pending
//! - `0` is the root sentinel, the parent of every section
//!
//! Locally, entities live in an arena and are addressed by an [`EntityKey`]
//! that never changes, even when the network id does.

use std::fmt;

/// Identity of an entity on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub i32);

impl NetworkId {
    /// Parent id carried by section records
    pub const ROOT: NetworkId = NetworkId(0);

    /// Raw integer value
    #[inline]
    pub fn get(self) -> i32 {
        self.0
    }

    /// Issued by the server
    #[inline]
    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }

    /// Local placeholder awaiting a server id
    #[inline]
    pub fn is_local(self) -> bool {
        self.0 < 0
    }

    /// The root sentinel
    #[inline]
    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for NetworkId {
    fn from(value: i32) -> Self {
        NetworkId(value)
    }
}

/// Stable handle of an entity inside a client registry.
///
/// Slots are reused after an entity is destroyed; the generation makes a
/// stale key miss instead of aliasing the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl EntityKey {
    /// Slot index inside the arena
    pub fn index(self) -> usize {
        self.index
    }
}

/// State the game attaches to a replicated entity.
///
/// Implementors are the collaborators of the replication layer: they provide a
/// stable type name for the type registry, turn their state into bytes and back,
/// and (for sections) compute the fingerprint the server deduplicates on.
pub trait Replicable: Send + Sync + 'static {
    /// Type identity used to build the type registry. Must be identical on
    /// every peer for the same logical type.
    fn type_name(&self) -> &str;

    /// Serialize the current state. `None` sends an empty payload.
    fn serialize(&self) -> Option<Vec<u8>> {
        None
    }

    /// Apply a payload received from the server
    fn deserialize(&mut self, _bytes: &[u8]) {}

    /// Section identity bytes. Only section kinds return `Some`.
    fn fingerprint(&self) -> Option<Vec<u8>> {
        None
    }

    /// Called after the entity is registered locally but before anything is
    /// sent, so the server receives an initialised payload.
    fn on_create(&mut self) {}

    /// Called when the entity is removed from the local registry
    fn on_destroy(&mut self) {}
}

/// A replica that carries its payload as opaque bytes.
///
/// Used for types the local program knows only by name, e.g. tooling that
/// inspects a server without linking the game's types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReplica {
    type_name: String,
    payload: Vec<u8>,
    fingerprint: Option<Vec<u8>>,
}

impl RawReplica {
    /// Create an opaque replica of the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            payload: Vec::new(),
            fingerprint: None,
        }
    }

    /// Create an opaque section with the given fingerprint
    pub fn section(type_name: impl Into<String>, fingerprint: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            payload: Vec::new(),
            fingerprint: Some(fingerprint),
        }
    }

    /// Set the initial payload
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Last payload set or received
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl Replicable for RawReplica {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn serialize(&self) -> Option<Vec<u8>> {
        if self.payload.is_empty() {
            None
        } else {
            Some(self.payload.clone())
        }
    }

    fn deserialize(&mut self, bytes: &[u8]) {
        self.payload = bytes.to_vec();
    }

    fn fingerprint(&self) -> Option<Vec<u8>> {
        self.fingerprint.clone()
    }
}
