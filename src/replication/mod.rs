//! Replication module
//!
//! The object-replication core, independent of any transport:
//! - Entity identity and the collaborator trait
//! - Type registry shared by every peer
//! - Client-side entity arena and replica manager
//! - Server-side authority store and section index

pub mod client;
pub mod entity;
pub mod registry;
pub mod sections;
pub mod store;
pub mod types;

pub use client::ReplicaClient;
pub use entity::{EntityKey, NetworkId, RawReplica, Replicable};
pub use registry::{EntityEvent, EntityRegistry, ReplicaState};
pub use sections::SectionIndex;
pub use store::{AuthorityStore, Representation, StoreStats};
pub use types::{TypeDescriptor, TypeRegistry};
