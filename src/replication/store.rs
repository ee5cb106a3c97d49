//! Server authority store
//!
//! The server's copy of every replicated entity. It issues ids, keeps the
//! section trees, and answers client requests. A store is not thread-safe on
//! its own; the server wraps it in a mutex and handles each message under a
//! single lock so a check and the create that follows it cannot interleave
//! with another connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::error::{ProtocolError, RegistryError, Result, StoreError};
use crate::protocol::messages::ClientMessage;
use crate::protocol::messages::ServerReply;
use crate::protocol::tree::SectionRecord;
use crate::replication::entity::NetworkId;
use crate::replication::sections::SectionIndex;
use crate::replication::types::TypeRegistry;

/// The server's record of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    pub id: NetworkId,
    /// [`NetworkId::ROOT`] for sections
    pub parent_id: NetworkId,
    pub type_id: i32,
    pub payload: Vec<u8>,
    /// Children in creation order
    pub children: Vec<NetworkId>,
    /// Set for sections only
    pub fingerprint: Option<Vec<u8>>,
}

impl Representation {
    /// Whether this is a section root
    pub fn is_section(&self) -> bool {
        self.fingerprint.is_some()
    }
}

/// Store counters for the management API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub representations: usize,
    pub sections: usize,
}

/// Authoritative entity store
#[derive(Debug, Default)]
pub struct AuthorityStore {
    representations: HashMap<NetworkId, Representation>,
    sections: SectionIndex,
    last_id: i32,
    types: Option<Arc<TypeRegistry>>,
}

impl AuthorityStore {
    /// Create a store that accepts any type id
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects type ids unknown to `types`
    pub fn with_types(types: Arc<TypeRegistry>) -> Self {
        Self {
            types: Some(types),
            ..Self::default()
        }
    }

    /// Answer one client request
    pub fn handle(&mut self, message: ClientMessage) -> Result<ServerReply> {
        let entity_id = message.entity_id();
        if !entity_id.is_local() {
            return Err(ProtocolError::RegisteredSender(entity_id).into());
        }

        trace!(
            entity_id = %entity_id,
            message_type = %message.message_type(),
            "Handling request"
        );

        match message {
            ClientMessage::CheckSection {
                entity_id,
                fingerprint,
            } => self.handle_check_section(entity_id, &fingerprint),
            ClientMessage::CreateNew {
                entity_id,
                type_id,
                parent_id,
                payload,
            } => self.handle_create_new(entity_id, type_id, parent_id, payload),
            ClientMessage::CreateNewSection {
                entity_id,
                type_id,
                fingerprint,
                payload,
            } => self.handle_create_new_section(entity_id, type_id, fingerprint, payload),
        }
    }

    /// `SECTION_EXISTS` with the tree if the fingerprint is known, else `SECTION_DOESNT_EXIST`
    pub fn handle_check_section(
        &mut self,
        entity_id: NetworkId,
        fingerprint: &[u8],
    ) -> Result<ServerReply> {
        match self.sections.find(fingerprint) {
            Some(section_id) => {
                debug!(entity_id = %entity_id, section_id = %section_id, "Section exists");
                Ok(ServerReply::SectionExists {
                    entity_id,
                    records: self.tree_serialization(section_id)?,
                })
            }
            None => {
                debug!(entity_id = %entity_id, "Section does not exist");
                Ok(ServerReply::SectionDoesntExist { entity_id })
            }
        }
    }

    /// Create a section root, or return the existing one if another client won the race
    pub fn handle_create_new_section(
        &mut self,
        entity_id: NetworkId,
        type_id: i32,
        fingerprint: Vec<u8>,
        payload: Vec<u8>,
    ) -> Result<ServerReply> {
        self.validate_type(type_id)?;

        let id = self.peek_next_id()?;
        if let Err(section_id) = self.sections.claim(&fingerprint, id) {
            debug!(
                entity_id = %entity_id,
                section_id = %section_id,
                "Section created concurrently, sending existing tree"
            );
            return Ok(ServerReply::SectionExists {
                entity_id,
                records: self.tree_serialization(section_id)?,
            });
        }
        self.last_id = id.get();

        self.representations.insert(
            id,
            Representation {
                id,
                parent_id: NetworkId::ROOT,
                type_id,
                payload,
                children: Vec::new(),
                fingerprint: Some(fingerprint),
            },
        );

        info!(entity_id = %entity_id, section_id = %id, type_id = type_id, "Section created");

        Ok(ServerReply::SectionCreated {
            entity_id,
            assigned_id: id,
        })
    }

    /// Create a child under an existing representation
    pub fn handle_create_new(
        &mut self,
        entity_id: NetworkId,
        type_id: i32,
        parent_id: NetworkId,
        payload: Vec<u8>,
    ) -> Result<ServerReply> {
        self.validate_type(type_id)?;
        if !self.representations.contains_key(&parent_id) {
            return Err(StoreError::UnknownParent(parent_id).into());
        }

        let id = self.peek_next_id()?;
        self.last_id = id.get();
        self.representations.insert(
            id,
            Representation {
                id,
                parent_id,
                type_id,
                payload,
                children: Vec::new(),
                fingerprint: None,
            },
        );
        if let Some(parent) = self.representations.get_mut(&parent_id) {
            parent.children.push(id);
        }

        debug!(
            entity_id = %entity_id,
            assigned_id = %id,
            parent_id = %parent_id,
            type_id = type_id,
            "Entity created"
        );

        Ok(ServerReply::Created {
            entity_id,
            assigned_id: id,
        })
    }

    /// Look up a section by its fingerprint
    pub fn find_section_by_fingerprint(&self, fingerprint: &[u8]) -> Option<&Representation> {
        self.sections
            .find(fingerprint)
            .and_then(|id| self.representations.get(&id))
    }

    /// Records of a section, breadth-first from its root
    pub fn tree_serialization(&self, section_id: NetworkId) -> Result<Vec<SectionRecord>> {
        if !self.representations.contains_key(&section_id) {
            return Err(StoreError::UnknownSection(section_id).into());
        }

        let mut records = Vec::new();
        let mut queue = VecDeque::from([section_id]);
        while let Some(id) = queue.pop_front() {
            let Some(representation) = self.representations.get(&id) else {
                continue;
            };
            records.push(SectionRecord {
                id: representation.id,
                parent_id: representation.parent_id,
                type_id: representation.type_id,
                payload: representation.payload.clone(),
            });
            queue.extend(representation.children.iter().copied());
        }

        Ok(records)
    }

    /// Look up a representation by id
    pub fn get(&self, id: NetworkId) -> Option<&Representation> {
        self.representations.get(&id)
    }

    /// Current counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            representations: self.representations.len(),
            sections: self.sections.len(),
        }
    }

    fn validate_type(&self, type_id: i32) -> Result<()> {
        match &self.types {
            Some(types) if !types.contains_id(type_id) => {
                Err(RegistryError::UnknownTypeId(type_id).into())
            }
            _ => Ok(()),
        }
    }

    fn peek_next_id(&self) -> Result<NetworkId> {
        self.last_id
            .checked_add(1)
            .map(NetworkId)
            .ok_or_else(|| StoreError::IdsExhausted.into())
    }
}
