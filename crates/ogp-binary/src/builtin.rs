//! Handlers for the value types every persistence setup needs.

use std::sync::{Arc, RwLock};

use ogp_types::{Instance, ObjectId, PersistenceError, PersistenceResult, TypeId};

use crate::analyzer::derive_reference_traversers;
use crate::binary::Binary;
use crate::chunk::ChunksBuffer;
use crate::codec::ByteCodec;
use crate::handler::{instance_of, ObjectResolver, ReferenceStorer, TypeHandler};
use crate::member::{TypeDescription, TypeMember};
use crate::traversal::{ObjectIdAcceptor, ReferenceTraverser};

pub const STRING_TYPE_ID: TypeId = TypeId::new(10);
pub const BYTES_TYPE_ID: TypeId = TypeId::new(11);
pub const OBJECT_LIST_TYPE_ID: TypeId = TypeId::new(12);
pub const OBJECT_MAP_TYPE_ID: TypeId = TypeId::new(13);

/// Element type name used in descriptions for untyped references.
pub const ANY_TYPE_NAME: &str = "any";

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

/// Immutable `String` values, persisted as one character list.
pub struct StringHandler {
    description: TypeDescription,
}

impl StringHandler {
    pub fn new() -> Self {
        Self {
            description: TypeDescription::new(STRING_TYPE_ID, "string", vec![TypeMember::chars("value")]),
        }
    }
}

impl Default for StringHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ByteCodec> TypeHandler<C> for StringHandler {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn instance_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<String>()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        &[]
    }

    fn store(
        &self,
        chunk: &mut ChunksBuffer<C>,
        instance: &Instance,
        oid: ObjectId,
        _storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        let value = instance_of::<String>(instance, oid)?;
        chunk.store_string_value(STRING_TYPE_ID, oid, value)
    }

    fn create(&self, data: &Binary<C>) -> PersistenceResult<Instance> {
        Ok(Arc::new(data.build_string(0)?))
    }

    // Strings are complete after `create`.
    fn initialize(&self, _data: &Binary<C>, _instance: &Instance, _resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Byte array
// ---------------------------------------------------------------------------

/// Immutable `Vec<u8>` values, persisted as one byte list.
pub struct ByteArrayHandler {
    description: TypeDescription,
}

impl ByteArrayHandler {
    pub fn new() -> Self {
        Self {
            description: TypeDescription::new(BYTES_TYPE_ID, "bytes", vec![TypeMember::bytes("value")]),
        }
    }
}

impl Default for ByteArrayHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ByteCodec> TypeHandler<C> for ByteArrayHandler {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn instance_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<Vec<u8>>()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        &[]
    }

    fn store(
        &self,
        chunk: &mut ChunksBuffer<C>,
        instance: &Instance,
        oid: ObjectId,
        _storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        let value = instance_of::<Vec<u8>>(instance, oid)?;
        chunk.store_bytes(BYTES_TYPE_ID, oid, value)
    }

    fn create(&self, data: &Binary<C>) -> PersistenceResult<Instance> {
        Ok(Arc::new(data.build_bytes(0)?))
    }

    fn initialize(&self, _data: &Binary<C>, _instance: &Instance, _resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object list
// ---------------------------------------------------------------------------

/// A shared, mutable list of optional references.
#[derive(Default)]
pub struct ObjectList {
    elements: RwLock<Vec<Option<Instance>>>,
}

impl ObjectList {
    pub fn new(elements: Vec<Option<Instance>>) -> Self {
        Self {
            elements: RwLock::new(elements),
        }
    }

    pub fn push(&self, element: Option<Instance>) {
        self.elements.write().expect("object list lock poisoned").push(element);
    }

    pub fn get(&self, index: usize) -> Option<Instance> {
        self.elements
            .read()
            .expect("object list lock poisoned")
            .get(index)
            .cloned()
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.elements.read().expect("object list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current elements, cloned out of the lock.
    pub fn snapshot(&self) -> Vec<Option<Instance>> {
        self.elements.read().expect("object list lock poisoned").clone()
    }

    fn replace(&self, elements: Vec<Option<Instance>>) {
        *self.elements.write().expect("object list lock poisoned") = elements;
    }
}

/// [`ObjectList`] persisted as one reference list.
pub struct ObjectListHandler {
    description: TypeDescription,
    traversers: Vec<ReferenceTraverser>,
}

impl ObjectListHandler {
    pub fn new() -> Self {
        let description = TypeDescription::new(
            OBJECT_LIST_TYPE_ID,
            "object_list",
            vec![TypeMember::complex(
                "elements",
                vec![TypeMember::reference("element", ANY_TYPE_NAME)],
            )],
        );
        let traversers = derive_reference_traversers(&description);
        Self {
            description,
            traversers,
        }
    }
}

impl Default for ObjectListHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ByteCodec> TypeHandler<C> for ObjectListHandler {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn instance_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<ObjectList>()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        &self.traversers
    }

    fn store(
        &self,
        chunk: &mut ChunksBuffer<C>,
        instance: &Instance,
        oid: ObjectId,
        storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        let elements = instance_of::<ObjectList>(instance, oid)?.snapshot();
        let count = elements.len() as u64;
        chunk.store_iterable_as_list(
            OBJECT_LIST_TYPE_ID,
            oid,
            count,
            elements.iter().map(|element| storer.apply_optional(element.as_ref())),
        )
    }

    fn create(&self, _data: &Binary<C>) -> PersistenceResult<Instance> {
        Ok(Arc::new(ObjectList::default()))
    }

    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        let list = instance_of::<ObjectList>(instance, data.object_id())?;
        let elements = data
            .build_references(0)?
            .into_iter()
            .map(|oid| resolver.resolve(oid))
            .collect::<PersistenceResult<Vec<_>>>()?;
        list.replace(elements);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object map
// ---------------------------------------------------------------------------

/// A shared, mutable association list. Keys are compared by identity.
#[derive(Default)]
pub struct ObjectMap {
    entries: RwLock<Vec<(Instance, Option<Instance>)>>,
}

impl ObjectMap {
    /// Insert or replace the value for `key`. Returns the previous value.
    pub fn insert(&self, key: Instance, value: Option<Instance>) -> Option<Instance> {
        let mut entries = self.entries.write().expect("object map lock poisoned");
        if let Some(entry) = entries.iter_mut().find(|(k, _)| ogp_types::same_instance(k, &key)) {
            return std::mem::replace(&mut entry.1, value);
        }
        entries.push((key, value));
        None
    }

    pub fn get(&self, key: &Instance) -> Option<Instance> {
        self.entries
            .read()
            .expect("object map lock poisoned")
            .iter()
            .find(|(k, _)| ogp_types::same_instance(k, key))
            .and_then(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("object map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(Instance, Option<Instance>)> {
        self.entries.read().expect("object map lock poisoned").clone()
    }
}

/// [`ObjectMap`] persisted as one key/value entry list.
pub struct ObjectMapHandler {
    description: TypeDescription,
    traversers: Vec<ReferenceTraverser>,
}

impl ObjectMapHandler {
    pub fn new() -> Self {
        let description = TypeDescription::new(
            OBJECT_MAP_TYPE_ID,
            "object_map",
            vec![TypeMember::complex(
                "entries",
                vec![
                    TypeMember::reference("key", ANY_TYPE_NAME),
                    TypeMember::reference("value", ANY_TYPE_NAME),
                ],
            )],
        );
        let traversers = derive_reference_traversers(&description);
        Self {
            description,
            traversers,
        }
    }
}

impl Default for ObjectMapHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ByteCodec> TypeHandler<C> for ObjectMapHandler {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn instance_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<ObjectMap>()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        &self.traversers
    }

    fn store(
        &self,
        chunk: &mut ChunksBuffer<C>,
        instance: &Instance,
        oid: ObjectId,
        storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        let entries = instance_of::<ObjectMap>(instance, oid)?
            .snapshot()
            .iter()
            .map(|(key, value)| Ok((storer.apply(key)?, storer.apply_optional(value.as_ref())?)))
            .collect::<PersistenceResult<Vec<_>>>()?;
        chunk.store_key_values_as_entries(OBJECT_MAP_TYPE_ID, oid, &entries)
    }

    fn iterate_loadable_references(
        &self,
        data: &Binary<C>,
        acceptor: &mut dyn ObjectIdAcceptor,
    ) -> PersistenceResult<()> {
        data.iterate_key_value_references(0, acceptor)
    }

    fn create(&self, _data: &Binary<C>) -> PersistenceResult<Instance> {
        Ok(Arc::new(ObjectMap::default()))
    }

    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        let map = instance_of::<ObjectMap>(instance, data.object_id())?;
        let mut entries = Vec::new();
        for (key, value) in data.build_key_values(0)? {
            let key = resolver
                .resolve(key)?
                .ok_or_else(|| PersistenceError::Consistency(format!("object map {} has a null key", data.object_id())))?;
            entries.push((key, resolver.resolve(value)?));
        }
        *map.entries.write().expect("object map lock poisoned") = entries;
        Ok(())
    }
}
