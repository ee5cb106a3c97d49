//! Client entity registry
//!
//! An arena of live replicas with:
//! - a `NetworkId -> EntityKey` index kept in lockstep with id changes
//! - one-shot parent links mirrored as child lists
//! - per-entity replication state
//! - a queue of lifecycle events for whatever renders or simulates the entities

use std::collections::{HashMap, VecDeque};
use std::fmt;

use tracing::{debug, trace};

use crate::error::{EntityError, Result};
use crate::replication::entity::{EntityKey, NetworkId, Replicable};

/// Replication state of a single entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaState {
    /// Section sent `CHECK_SECTION`, waiting for the answer
    PendingCheck,
    /// Server reported the section exists; tree is being applied
    ExistsReceived,
    /// Server reported the section is new; `CREATE_NEW_SECTION` sent
    DoesntExistReceived,
    /// Child sent `CREATE_NEW`, waiting for its id
    PendingCreate,
    /// Entity holds a server-issued id
    Registered,
}

impl ReplicaState {
    /// Whether the entity holds a server-issued id
    pub fn is_registered(&self) -> bool {
        matches!(self, ReplicaState::Registered)
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            ReplicaState::PendingCheck => "PendingCheck",
            ReplicaState::ExistsReceived => "ExistsReceived",
            ReplicaState::DoesntExistReceived => "DoesntExistReceived",
            ReplicaState::PendingCreate => "PendingCreate",
            ReplicaState::Registered => "Registered",
        }
    }
}

impl fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle notifications for the view layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityEvent {
    /// Entity entered the registry
    Created {
        key: EntityKey,
        id: NetworkId,
        type_id: i32,
    },
    /// Entity received a new network id
    IdAssigned {
        key: EntityKey,
        old: NetworkId,
        new: NetworkId,
    },
    /// Entity was attached to its parent
    Parented { child: EntityKey, parent: EntityKey },
    /// Entity left the registry
    Destroyed { key: EntityKey, id: NetworkId },
}

struct EntityRecord {
    id: NetworkId,
    type_id: i32,
    parent: Option<EntityKey>,
    children: Vec<EntityKey>,
    state: ReplicaState,
    replica: Box<dyn Replicable>,
}

struct Slot {
    generation: u32,
    record: Option<EntityRecord>,
}

/// Arena of replicated entities owned by one client
pub struct EntityRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_id: HashMap<NetworkId, EntityKey>,
    last_local_id: i32,
    events: VecDeque<EntityEvent>,
    record_events: bool,
}

impl EntityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            last_local_id: 0,
            events: VecDeque::new(),
            record_events: true,
        }
    }

    /// Turn lifecycle event recording on or off. Recorded events queue up
    /// until [`drain_events`](Self::drain_events) is called; turning recording
    /// off also drops whatever is queued.
    pub fn set_event_recording(&mut self, enabled: bool) {
        self.record_events = enabled;
        if !enabled {
            self.events.clear();
        }
    }

    fn emit(&mut self, event: EntityEvent) {
        if self.record_events {
            self.events.push_back(event);
        }
    }

    /// Hand out the next placeholder id: -1, -2, -3, ...
    pub fn allocate_local_id(&mut self) -> NetworkId {
        self.last_local_id -= 1;
        NetworkId(self.last_local_id)
    }

    /// Add an entity under `id`
    pub fn insert(
        &mut self,
        id: NetworkId,
        type_id: i32,
        replica: Box<dyn Replicable>,
        state: ReplicaState,
    ) -> Result<EntityKey> {
        if self.by_id.contains_key(&id) {
            return Err(EntityError::IdInUse { id }.into());
        }

        let record = EntityRecord {
            id,
            type_id,
            parent: None,
            children: Vec::new(),
            state,
            replica,
        };

        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.record = Some(record);
                EntityKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                EntityKey {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };

        self.by_id.insert(id, key);
        self.emit(EntityEvent::Created { key, id, type_id });
        trace!(entity_id = %id, type_id = type_id, "Entity inserted");

        Ok(key)
    }

    /// Move an entity to a new network id.
    ///
    /// The old id stops resolving and the new id resolves to `key` in the same
    /// call. Fails if `id` belongs to a different live entity.
    pub fn assign_network_id(&mut self, key: EntityKey, id: NetworkId) -> Result<NetworkId> {
        let old = self.record(key)?.id;
        if old == id {
            return Ok(old);
        }
        if let Some(&owner) = self.by_id.get(&id) {
            if owner != key {
                return Err(EntityError::IdInUse { id }.into());
            }
        }

        self.by_id.remove(&old);
        self.by_id.insert(id, key);
        self.record_mut(key)?.id = id;

        self.emit(EntityEvent::IdAssigned { key, old, new: id });
        debug!(old_id = %old, new_id = %id, "Network id assigned");

        Ok(old)
    }

    /// Attach `child` to `parent`. Allowed once per entity.
    pub fn set_parent(&mut self, child: EntityKey, parent: EntityKey) -> Result<()> {
        if child == parent {
            return Err(EntityError::SelfParent(child).into());
        }
        self.record(parent)?;

        let record = self.record_mut(child)?;
        if record.parent.is_some() {
            return Err(EntityError::AlreadyParented(child).into());
        }
        record.parent = Some(parent);
        self.record_mut(parent)?.children.push(child);

        self.emit(EntityEvent::Parented { child, parent });
        Ok(())
    }

    /// Remove an entity and its whole subtree, children first.
    ///
    /// Returns the ids that were removed, in removal order.
    pub fn destroy(&mut self, key: EntityKey) -> Result<Vec<NetworkId>> {
        let parent = self.record(key)?.parent;

        // Collect the subtree, then tear it down deepest first
        let mut order = vec![key];
        let mut cursor = 0;
        while cursor < order.len() {
            let children = self.record(order[cursor])?.children.clone();
            order.extend(children);
            cursor += 1;
        }

        let mut removed = Vec::with_capacity(order.len());
        for doomed in order.into_iter().rev() {
            let slot = &mut self.slots[doomed.index];
            let Some(mut record) = slot.record.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(doomed.index);

            record.replica.on_destroy();
            self.by_id.remove(&record.id);
            self.emit(EntityEvent::Destroyed {
                key: doomed,
                id: record.id,
            });
            removed.push(record.id);
        }

        if let Some(parent) = parent {
            if let Ok(record) = self.record_mut(parent) {
                record.children.retain(|&c| c != key);
            }
        }

        debug!(count = removed.len(), "Entity subtree destroyed");
        Ok(removed)
    }

    /// Resolve a network id
    pub fn key_of(&self, id: NetworkId) -> Option<EntityKey> {
        self.by_id.get(&id).copied()
    }

    /// Whether a live entity holds `id`
    pub fn contains_id(&self, id: NetworkId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Whether `key` still refers to a live entity
    pub fn contains(&self, key: EntityKey) -> bool {
        self.record(key).is_ok()
    }

    /// Current network id of an entity
    pub fn id_of(&self, key: EntityKey) -> Result<NetworkId> {
        Ok(self.record(key)?.id)
    }

    /// Type id of an entity
    pub fn type_id_of(&self, key: EntityKey) -> Result<i32> {
        Ok(self.record(key)?.type_id)
    }

    /// Replication state of an entity
    pub fn state(&self, key: EntityKey) -> Result<ReplicaState> {
        Ok(self.record(key)?.state)
    }

    /// Update the replication state of an entity
    pub fn set_state(&mut self, key: EntityKey, state: ReplicaState) -> Result<()> {
        let record = self.record_mut(key)?;
        let old = record.state;
        record.state = state;
        trace!(entity_id = %record.id, old_state = %old, new_state = %state, "Replica state changed");
        Ok(())
    }

    /// Network parent of an entity (`None` for sections)
    pub fn parent(&self, key: EntityKey) -> Result<Option<EntityKey>> {
        Ok(self.record(key)?.parent)
    }

    /// Children of an entity in attachment order
    pub fn children(&self, key: EntityKey) -> Result<&[EntityKey]> {
        Ok(&self.record(key)?.children)
    }

    /// Borrow an entity's replica
    pub fn replica(&self, key: EntityKey) -> Result<&dyn Replicable> {
        Ok(self.record(key)?.replica.as_ref())
    }

    /// Mutably borrow an entity's replica
    pub fn replica_mut(&mut self, key: EntityKey) -> Result<&mut dyn Replicable> {
        Ok(self.record_mut(key)?.replica.as_mut())
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Take all queued lifecycle events. While recording is on the queue
    /// grows until this is called.
    pub fn drain_events(&mut self) -> Vec<EntityEvent> {
        self.events.drain(..).collect()
    }

    fn record(&self, key: EntityKey) -> Result<&EntityRecord> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.record.as_ref())
            .ok_or_else(|| EntityError::UnknownEntity(key).into())
    }

    fn record_mut(&mut self, key: EntityKey) -> Result<&mut EntityRecord> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.record.as_mut())
            .ok_or_else(|| EntityError::UnknownEntity(key).into())
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &self.by_id.len())
            .field("last_local_id", &self.last_local_id)
            .field("pending_events", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicationError;
    use crate::replication::entity::RawReplica;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn raw(name: &str) -> Box<dyn Replicable> {
        Box::new(RawReplica::new(name))
    }

    fn insert_local(registry: &mut EntityRegistry) -> EntityKey {
        let id = registry.allocate_local_id();
        registry
            .insert(id, 0, raw("t::A"), ReplicaState::PendingCreate)
            .unwrap()
    }

    #[test]
    fn test_local_ids_strictly_decrease() {
        let mut registry = EntityRegistry::new();
        let ids: Vec<i32> = (0..4).map(|_| registry.allocate_local_id().get()).collect();
        assert_eq!(ids, vec![-1, -2, -3, -4]);
    }

    #[test]
    fn test_assign_network_id_rekeys_index() {
        let mut registry = EntityRegistry::new();
        let key = insert_local(&mut registry);
        let old = registry.id_of(key).unwrap();

        registry.assign_network_id(key, NetworkId(12)).unwrap();

        assert_eq!(registry.key_of(old), None);
        assert_eq!(registry.key_of(NetworkId(12)), Some(key));
        assert_eq!(registry.id_of(key).unwrap(), NetworkId(12));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_assign_network_id_rejects_taken_id() {
        let mut registry = EntityRegistry::new();
        let first = insert_local(&mut registry);
        let second = insert_local(&mut registry);
        registry.assign_network_id(first, NetworkId(3)).unwrap();

        let result = registry.assign_network_id(second, NetworkId(3));
        assert!(matches!(
            result,
            Err(ReplicationError::Entity(EntityError::IdInUse { .. }))
        ));
        // Nothing moved
        assert_eq!(registry.key_of(NetworkId(3)), Some(first));
        assert_eq!(registry.id_of(second).unwrap(), NetworkId(-2));
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut registry = EntityRegistry::new();
        registry
            .insert(NetworkId(4), 0, raw("t::A"), ReplicaState::Registered)
            .unwrap();
        let result = registry.insert(NetworkId(4), 0, raw("t::A"), ReplicaState::Registered);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_parent_is_one_shot() {
        let mut registry = EntityRegistry::new();
        let parent = insert_local(&mut registry);
        let child = insert_local(&mut registry);

        registry.set_parent(child, parent).unwrap();
        assert_eq!(registry.parent(child).unwrap(), Some(parent));
        assert_eq!(registry.children(parent).unwrap(), &[child]);

        // Even the same parent is rejected the second time
        let again = registry.set_parent(child, parent);
        assert!(matches!(
            again,
            Err(ReplicationError::Entity(EntityError::AlreadyParented(_)))
        ));
        assert_eq!(registry.children(parent).unwrap().len(), 1);
    }

    #[test]
    fn test_set_parent_requires_live_parent() {
        let mut registry = EntityRegistry::new();
        let parent = insert_local(&mut registry);
        let child = insert_local(&mut registry);
        registry.destroy(parent).unwrap();

        assert!(matches!(
            registry.set_parent(child, parent),
            Err(ReplicationError::Entity(EntityError::UnknownEntity(_)))
        ));
        assert!(matches!(
            registry.set_parent(child, child),
            Err(ReplicationError::Entity(EntityError::SelfParent(_)))
        ));
    }

    struct Counted(Arc<AtomicUsize>);

    impl Replicable for Counted {
        fn type_name(&self) -> &str {
            "t::Counted"
        }

        fn on_destroy(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_destroy_removes_subtree() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut registry = EntityRegistry::new();

        let root = registry
            .insert(
                NetworkId(1),
                0,
                Box::new(Counted(destroyed.clone())),
                ReplicaState::Registered,
            )
            .unwrap();
        let child = registry
            .insert(
                NetworkId(2),
                0,
                Box::new(Counted(destroyed.clone())),
                ReplicaState::Registered,
            )
            .unwrap();
        let grandchild = registry
            .insert(
                NetworkId(3),
                0,
                Box::new(Counted(destroyed.clone())),
                ReplicaState::Registered,
            )
            .unwrap();
        registry.set_parent(child, root).unwrap();
        registry.set_parent(grandchild, child).unwrap();

        let removed = registry.destroy(child).unwrap();

        assert_eq!(removed, vec![NetworkId(3), NetworkId(2)]);
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
        assert!(registry.children(root).unwrap().is_empty());
        assert!(!registry.contains(grandchild));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_key_does_not_alias_reused_slot() {
        let mut registry = EntityRegistry::new();
        let old = insert_local(&mut registry);
        registry.destroy(old).unwrap();

        let new = insert_local(&mut registry);
        assert_eq!(old.index(), new.index());
        assert!(!registry.contains(old));
        assert!(registry.contains(new));
    }

    #[test]
    fn test_events_are_queued_in_order() {
        let mut registry = EntityRegistry::new();
        let parent = insert_local(&mut registry);
        let child = insert_local(&mut registry);
        registry.set_parent(child, parent).unwrap();
        registry.assign_network_id(parent, NetworkId(9)).unwrap();

        let events = registry.drain_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], EntityEvent::Created { id: NetworkId(-1), .. }));
        assert!(matches!(events[2], EntityEvent::Parented { .. }));
        assert_eq!(
            events[3],
            EntityEvent::IdAssigned {
                key: parent,
                old: NetworkId(-1),
                new: NetworkId(9),
            }
        );
        assert!(registry.drain_events().is_empty());
    }

    #[test]
    fn test_event_recording_can_be_disabled() {
        let mut registry = EntityRegistry::new();
        insert_local(&mut registry);

        registry.set_event_recording(false);
        let parent = insert_local(&mut registry);
        let child = insert_local(&mut registry);
        registry.set_parent(child, parent).unwrap();
        registry.destroy(parent).unwrap();
        assert!(registry.drain_events().is_empty());

        registry.set_event_recording(true);
        insert_local(&mut registry);
        assert_eq!(registry.drain_events().len(), 1);
    }
}
