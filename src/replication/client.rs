//! Client replica manager
//!
//! Drives the per-entity request/reply exchanges with the server:
//!
//! ```text
//! section:  PendingCheck --SECTION_DOESNT_EXIST--> DoesntExistReceived --SECTION_CREATED--> Registered
//!                        \--SECTION_EXISTS--> ExistsReceived --(tree applied)--> Registered
//! child:    PendingCreate --CREATED--> Registered
//! ```
//!
//! The manager does no I/O. Outbound frames accumulate in a buffer the
//! transport takes with [`ReplicaClient::take_outbound`]; inbound bytes are
//! fed to [`ReplicaClient::receive`] in whatever chunks they arrive.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, info, trace};

use crate::error::{EntityError, ProtocolError, Result};
use crate::net::codec::{FrameDecoder, MAX_WIRE_FRAME_SIZE};
use crate::protocol::messages::{ClientMessage, ServerReply};
use crate::protocol::tree::SectionRecord;
use crate::replication::entity::{EntityKey, NetworkId, Replicable};
use crate::replication::registry::{EntityEvent, EntityRegistry, ReplicaState};
use crate::replication::types::TypeRegistry;

/// Client side of the replication protocol
pub struct ReplicaClient {
    types: Arc<TypeRegistry>,
    entities: EntityRegistry,
    decoder: FrameDecoder,
    outbound: BytesMut,
}

impl ReplicaClient {
    /// Create a client that accepts replies of any size the length field can
    /// describe. A joined section's tree arrives as one frame, so its size is
    /// bounded only by what the server has accepted.
    pub fn new(types: Arc<TypeRegistry>) -> Self {
        Self::with_max_frame_size(types, MAX_WIRE_FRAME_SIZE)
    }

    /// Create a client that rejects inbound frames above `max_frame_size`
    pub fn with_max_frame_size(types: Arc<TypeRegistry>, max_frame_size: usize) -> Self {
        Self {
            types,
            entities: EntityRegistry::new(),
            decoder: FrameDecoder::new(max_frame_size),
            outbound: BytesMut::new(),
        }
    }

    /// Open a section. The server is asked whether one with the same
    /// fingerprint exists before anything is created.
    pub fn create_section(&mut self, replica: Box<dyn Replicable>) -> Result<EntityKey> {
        if replica.fingerprint().is_none() {
            return Err(EntityError::NotASection(replica.type_name().to_string()).into());
        }
        let type_id = self.types.type_id_of(replica.as_ref())?;

        let id = self.entities.allocate_local_id();
        let key = self
            .entities
            .insert(id, type_id, replica, ReplicaState::PendingCheck)?;

        let replica = self.entities.replica_mut(key)?;
        replica.on_create();
        let fingerprint = replica
            .fingerprint()
            .ok_or_else(|| EntityError::NotASection(replica.type_name().to_string()))?;

        debug!(entity_id = %id, type_id = type_id, "Checking section");
        self.send(ClientMessage::CheckSection {
            entity_id: id,
            fingerprint,
        })?;

        Ok(key)
    }

    /// Create an entity under a registered parent
    pub fn create_child(
        &mut self,
        parent: EntityKey,
        replica: Box<dyn Replicable>,
    ) -> Result<EntityKey> {
        if !self.entities.state(parent)?.is_registered() {
            return Err(EntityError::ParentNotRegistered(parent).into());
        }
        let parent_id = self.entities.id_of(parent)?;
        let type_id = self.types.type_id_of(replica.as_ref())?;

        let id = self.entities.allocate_local_id();
        let key = self
            .entities
            .insert(id, type_id, replica, ReplicaState::PendingCreate)?;
        self.entities.set_parent(key, parent)?;

        let replica = self.entities.replica_mut(key)?;
        replica.on_create();
        let payload = replica.serialize().unwrap_or_default();

        debug!(entity_id = %id, parent_id = %parent_id, type_id = type_id, "Creating entity");
        self.send(ClientMessage::CreateNew {
            entity_id: id,
            type_id,
            parent_id,
            payload,
        })?;

        Ok(key)
    }

    /// Feed bytes read from the connection. Returns the number of replies applied.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<usize> {
        self.decoder.extend(bytes);
        self.process_buffered()
    }

    /// Apply every complete reply already sitting in the decoder
    pub fn process_buffered(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Some(frame) = self.decoder.next_frame()? {
            let reply = ServerReply::decode(&frame)?;
            self.apply_reply(reply)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Apply one decoded reply
    pub fn apply_reply(&mut self, reply: ServerReply) -> Result<()> {
        let entity_id = reply.entity_id();
        let key = self
            .entities
            .key_of(entity_id)
            .ok_or(ProtocolError::UnknownEntity(entity_id))?;
        let state = self.entities.state(key)?;

        trace!(entity_id = %entity_id, reply = %reply.reply_type(), state = %state, "Applying reply");

        match (reply, state) {
            (ServerReply::SectionDoesntExist { .. }, ReplicaState::PendingCheck) => {
                self.entities
                    .set_state(key, ReplicaState::DoesntExistReceived)?;

                let type_id = self.entities.type_id_of(key)?;
                let replica = self.entities.replica(key)?;
                let fingerprint = replica
                    .fingerprint()
                    .ok_or_else(|| EntityError::NotASection(replica.type_name().to_string()))?;
                let payload = replica.serialize().unwrap_or_default();

                self.send(ClientMessage::CreateNewSection {
                    entity_id,
                    type_id,
                    fingerprint,
                    payload,
                })
            }
            (
                ServerReply::SectionCreated { assigned_id, .. },
                ReplicaState::DoesntExistReceived,
            ) => {
                self.entities.assign_network_id(key, assigned_id)?;
                self.entities.set_state(key, ReplicaState::Registered)?;
                info!(entity_id = %entity_id, section_id = %assigned_id, "Section created");
                Ok(())
            }
            (
                ServerReply::SectionExists { records, .. },
                ReplicaState::PendingCheck | ReplicaState::DoesntExistReceived,
            ) => {
                self.entities.set_state(key, ReplicaState::ExistsReceived)?;
                self.apply_tree(key, &records)?;
                self.entities.set_state(key, ReplicaState::Registered)?;
                info!(
                    entity_id = %entity_id,
                    section_id = %records[0].id,
                    entities = records.len(),
                    "Section joined"
                );
                Ok(())
            }
            (ServerReply::Created { assigned_id, .. }, ReplicaState::PendingCreate) => {
                self.entities.assign_network_id(key, assigned_id)?;
                self.entities.set_state(key, ReplicaState::Registered)?;
                debug!(entity_id = %entity_id, assigned_id = %assigned_id, "Entity registered");
                Ok(())
            }
            (reply, state) => Err(ProtocolError::UnexpectedReply {
                reply: reply.reply_type().name().to_string(),
                entity_id,
                state: state.name().to_string(),
            }
            .into()),
        }
    }

    /// Make the placeholder section the root of `records` and materialise the rest
    fn apply_tree(&mut self, section: EntityKey, records: &[SectionRecord]) -> Result<()> {
        let Some((root, rest)) = records.split_first() else {
            return Err(ProtocolError::MalformedBody("empty section tree".to_string()).into());
        };

        self.entities.assign_network_id(section, root.id)?;
        self.entities.replica_mut(section)?.deserialize(&root.payload);

        for record in rest {
            let parent = self
                .entities
                .key_of(record.parent_id)
                .ok_or(ProtocolError::OrphanRecord {
                    id: record.id,
                    parent_id: record.parent_id,
                })?;

            let replica = self.types.instantiate(record.type_id)?;
            let key =
                self.entities
                    .insert(record.id, record.type_id, replica, ReplicaState::Registered)?;
            self.entities.set_parent(key, parent)?;
            self.entities.replica_mut(key)?.deserialize(&record.payload);
        }

        Ok(())
    }

    /// Remove an entity and its subtree locally. The server is not told.
    pub fn destroy(&mut self, key: EntityKey) -> Result<Vec<NetworkId>> {
        self.entities.destroy(key)
    }

    /// Take the frames queued for the server
    pub fn take_outbound(&mut self) -> BytesMut {
        self.outbound.split()
    }

    /// Whether frames are waiting to be sent
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Take the queued lifecycle events
    pub fn drain_events(&mut self) -> Vec<EntityEvent> {
        self.entities.drain_events()
    }

    /// Turn lifecycle event recording on or off; see [`EntityRegistry::set_event_recording`]
    pub fn set_event_recording(&mut self, enabled: bool) {
        self.entities.set_event_recording(enabled);
    }

    /// The entity registry
    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// The entity registry, mutably
    pub fn entities_mut(&mut self) -> &mut EntityRegistry {
        &mut self.entities
    }

    /// The type registry this client was built with
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    fn send(&mut self, message: ClientMessage) -> Result<()> {
        message.encode(&mut self.outbound)?;
        Ok(())
    }
}

impl std::fmt::Debug for ReplicaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaClient")
            .field("entities", &self.entities)
            .field("buffered_inbound", &self.decoder.buffered_len())
            .field("pending_outbound", &self.outbound.len())
            .finish()
    }
}
