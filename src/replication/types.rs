//! Type registry
//!
//! Maps replicable type names to small integer type ids. The mapping is never
//! transmitted: every peer builds it from the same set of names, sorted
//! lexicographically, so the ids agree as long as the type sets agree.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::replication::entity::{RawReplica, Replicable};

/// Constructor for a fresh, default-initialised replica
pub type ReplicaFactory = Arc<dyn Fn() -> Box<dyn Replicable> + Send + Sync>;

/// A type known to the registry
#[derive(Clone)]
pub struct TypeDescriptor {
    name: String,
    factory: Option<ReplicaFactory>,
}

impl TypeDescriptor {
    /// Describe a type by name only. Instances are materialised as [`RawReplica`].
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: None,
        }
    }

    /// Describe a type by name with a custom factory
    pub fn with_factory<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Replicable> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Some(Arc::new(factory)),
        }
    }

    /// Describe a concrete replicable type; its default value supplies the name
    pub fn of<T>() -> Self
    where
        T: Replicable + Default,
    {
        let name = T::default().type_name().to_string();
        Self::with_factory(name, || Box::new(T::default()))
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

/// Bidirectional mapping between type names and type ids
pub struct TypeRegistry {
    /// Descriptors indexed by type id
    types: Vec<TypeDescriptor>,
    /// Type id by name
    ids: HashMap<String, i32>,
}

impl TypeRegistry {
    /// Build the registry from every replicable type the program knows.
    ///
    /// Input order does not matter; ids follow the sorted order of names.
    pub fn new(descriptors: impl IntoIterator<Item = TypeDescriptor>) -> Result<Self> {
        let mut types: Vec<TypeDescriptor> = descriptors.into_iter().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));

        let mut ids = HashMap::with_capacity(types.len());
        for (index, descriptor) in types.iter().enumerate() {
            if ids.insert(descriptor.name.clone(), index as i32).is_some() {
                return Err(RegistryError::DuplicateType(descriptor.name.clone()).into());
            }
        }

        debug!(types = types.len(), "Type registry built");

        Ok(Self { types, ids })
    }

    /// Build a registry from bare type names
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(TypeDescriptor::named))
    }

    /// Look up the id of a type name
    pub fn type_id(&self, name: &str) -> Result<i32> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownTypeName(name.to_string()).into())
    }

    /// Look up the id of a replica's type
    pub fn type_id_of(&self, replica: &dyn Replicable) -> Result<i32> {
        self.type_id(replica.type_name())
    }

    /// Look up the name of a type id
    pub fn type_name(&self, type_id: i32) -> Result<&str> {
        self.descriptor(type_id).map(|d| d.name.as_str())
    }

    /// Whether the id belongs to a registered type
    pub fn contains_id(&self, type_id: i32) -> bool {
        usize::try_from(type_id)
            .map(|index| index < self.types.len())
            .unwrap_or(false)
    }

    /// Create a fresh replica of the given type
    pub fn instantiate(&self, type_id: i32) -> Result<Box<dyn Replicable>> {
        let descriptor = self.descriptor(type_id)?;
        Ok(match &descriptor.factory {
            Some(factory) => factory(),
            None => Box::new(RawReplica::new(descriptor.name.clone())),
        })
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate over `(type_id, name)` in id order
    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> {
        self.types
            .iter()
            .enumerate()
            .map(|(index, d)| (index as i32, d.name.as_str()))
    }

    fn descriptor(&self, type_id: i32) -> Result<&TypeDescriptor> {
        usize::try_from(type_id)
            .ok()
            .and_then(|index| self.types.get(index))
            .ok_or_else(|| RegistryError::UnknownTypeId(type_id).into())
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicationError;

    #[derive(Default)]
    struct Torch {
        lit: bool,
    }

    impl Replicable for Torch {
        fn type_name(&self) -> &str {
            "items::Torch"
        }

        fn serialize(&self) -> Option<Vec<u8>> {
            Some(vec![self.lit as u8])
        }
    }

    #[test]
    fn test_ids_follow_sorted_names() {
        let registry = TypeRegistry::from_names(["world::Chunk", "items::Torch", "items::Axe"])
            .unwrap();

        assert_eq!(registry.type_id("items::Axe").unwrap(), 0);
        assert_eq!(registry.type_id("items::Torch").unwrap(), 1);
        assert_eq!(registry.type_id("world::Chunk").unwrap(), 2);
        assert_eq!(registry.type_name(2).unwrap(), "world::Chunk");
    }

    #[test]
    fn test_order_independent() {
        let names = ["c::Gamma", "a::Alpha", "b::Beta", "B::Upper"];
        let reference: Vec<(i32, String)> = TypeRegistry::from_names(names)
            .unwrap()
            .iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect();

        let permutations = [
            ["a::Alpha", "b::Beta", "c::Gamma", "B::Upper"],
            ["B::Upper", "c::Gamma", "b::Beta", "a::Alpha"],
            ["b::Beta", "B::Upper", "a::Alpha", "c::Gamma"],
        ];
        for permutation in permutations {
            let ids: Vec<(i32, String)> = TypeRegistry::from_names(permutation)
                .unwrap()
                .iter()
                .map(|(id, name)| (id, name.to_string()))
                .collect();
            assert_eq!(ids, reference);
        }

        // Byte-wise ordering puts upper case first
        assert_eq!(reference[0].1, "B::Upper");
    }

    #[test]
    fn test_unknown_lookups_fail() {
        let registry = TypeRegistry::from_names(["a::A"]).unwrap();

        assert!(matches!(
            registry.type_id("nope"),
            Err(ReplicationError::Registry(RegistryError::UnknownTypeName(_)))
        ));
        assert!(matches!(
            registry.type_name(1),
            Err(ReplicationError::Registry(RegistryError::UnknownTypeId(1)))
        ));
        assert!(matches!(
            registry.instantiate(-1),
            Err(ReplicationError::Registry(RegistryError::UnknownTypeId(-1)))
        ));
        assert!(registry.contains_id(0));
        assert!(!registry.contains_id(1));
        assert!(!registry.contains_id(-1));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = TypeRegistry::from_names(["a::A", "a::A"]);
        assert!(matches!(
            result,
            Err(ReplicationError::Registry(RegistryError::DuplicateType(_)))
        ));
    }

    #[test]
    fn test_instantiate_uses_factory() {
        let registry = TypeRegistry::new([
            TypeDescriptor::of::<Torch>(),
            TypeDescriptor::named("world::Chunk"),
        ])
        .unwrap();

        let torch = registry.instantiate(0).unwrap();
        assert_eq!(torch.type_name(), "items::Torch");
        assert_eq!(torch.serialize(), Some(vec![0]));

        let chunk = registry.instantiate(1).unwrap();
        assert_eq!(chunk.type_name(), "world::Chunk");
        assert_eq!(registry.type_id_of(chunk.as_ref()).unwrap(), 1);
    }
}
