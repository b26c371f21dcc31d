//! Persistent roots: the named entry points of a stored graph.

use std::sync::{Arc, RwLock};

use ogp_binary::builtin::ANY_TYPE_NAME;
use ogp_binary::{
    derive_reference_traversers, instance_of, Binary, ByteCodec, ChunksBuffer, ObjectResolver, ReferenceStorer,
    ReferenceTraverser, TypeDescription, TypeHandler, TypeMember,
};
use ogp_types::{same_instance, Instance, ObjectId, PersistenceResult, TypeId};

pub const ROOTS_TYPE_NAME: &str = "roots";

/// Named root instances, in registration order.
#[derive(Default)]
pub struct PersistentRoots {
    entries: RwLock<Vec<(String, Option<Instance>)>>,
}

impl PersistentRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the root named `identifier`.
    pub fn set(&self, identifier: impl Into<String>, instance: Option<Instance>) {
        let identifier = identifier.into();
        let mut entries = self.entries.write().expect("roots lock poisoned");
        match entries.iter_mut().find(|(id, _)| *id == identifier) {
            Some(entry) => entry.1 = instance,
            None => entries.push((identifier, instance)),
        }
    }

    pub fn get(&self, identifier: &str) -> Option<Instance> {
        self.entries
            .read()
            .expect("roots lock poisoned")
            .iter()
            .find(|(id, _)| id == identifier)
            .and_then(|(_, instance)| instance.clone())
    }

    pub fn remove(&self, identifier: &str) -> bool {
        let mut entries = self.entries.write().expect("roots lock poisoned");
        let before = entries.len();
        entries.retain(|(id, _)| id != identifier);
        entries.len() != before
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("roots lock poisoned")
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether `instance` is one of the roots.
    pub fn contains(&self, instance: &Instance) -> bool {
        self.entries
            .read()
            .expect("roots lock poisoned")
            .iter()
            .any(|(_, root)| root.as_ref().is_some_and(|root| same_instance(root, instance)))
    }

    pub fn snapshot(&self) -> Vec<(String, Option<Instance>)> {
        self.entries.read().expect("roots lock poisoned").clone()
    }

    pub fn replace(&self, entries: Vec<(String, Option<Instance>)>) {
        *self.entries.write().expect("roots lock poisoned") = entries;
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("roots lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handler for [`PersistentRoots`] under [`TypeId::ROOTS`]: a reference list
/// followed by the identifier list.
pub struct RootsHandler {
    description: TypeDescription,
    traversers: Vec<ReferenceTraverser>,
}

impl RootsHandler {
    pub fn new() -> Self {
        let description = TypeDescription::new(
            TypeId::ROOTS,
            ROOTS_TYPE_NAME,
            vec![
                TypeMember::complex("instances", vec![TypeMember::reference("instance", ANY_TYPE_NAME)]),
                TypeMember::complex("identifiers", vec![TypeMember::chars("identifier")]),
            ],
        );
        let traversers = derive_reference_traversers(&description);
        Self {
            description,
            traversers,
        }
    }
}

impl Default for RootsHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ByteCodec> TypeHandler<C> for RootsHandler {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn instance_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<PersistentRoots>()
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
        let entries = instance_of::<PersistentRoots>(instance, oid)?.snapshot();
        let mut mapping = Vec::with_capacity(entries.len());
        for (identifier, root) in entries {
            mapping.push((identifier, storer.apply_optional(root.as_ref())?));
        }
        chunk.store_roots(TypeId::ROOTS, oid, &mapping)
    }

    fn create(&self, _data: &Binary<C>) -> PersistenceResult<Instance> {
        Ok(Arc::new(PersistentRoots::new()))
    }

    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        let roots = instance_of::<PersistentRoots>(instance, data.object_id())?;
        let entries = data
            .build_root_mapping()?
            .into_iter()
            .map(|(identifier, oid)| Ok((identifier, resolver.resolve(oid)?)))
            .collect::<PersistenceResult<Vec<_>>>()?;
        roots.replace(entries);
        Ok(())
    }
}
