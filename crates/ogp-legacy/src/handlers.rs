//! Handlers installed under legacy type ids.
//!
//! None of them store: instances are always written with the current
//! handler, so a legacy handler only ever sees entities being loaded.

use ogp_binary::{
    derive_reference_traversers, Binary, ByteCodec, ChunksBuffer, MemberAccess, ObjectResolver,
    ReferenceStorer, ReferenceTraverser, SharedTypeHandler, TypeDescription, TypeHandler,
};
use ogp_types::{Instance, ObjectId, PersistenceError, PersistenceResult};

use crate::layout::LayoutTranslation;

fn cannot_store(description: &TypeDescription, oid: ObjectId) -> PersistenceError {
    PersistenceError::Consistency(format!(
        "object {oid}: legacy type {} ({}) cannot be stored",
        description.type_name, description.type_id
    ))
}

/// The current handler re-keyed under a legacy type id whose layout is
/// byte-compatible.
pub struct PassThroughHandler<C: ByteCodec> {
    description: TypeDescription,
    current: SharedTypeHandler<C>,
}

impl<C: ByteCodec> PassThroughHandler<C> {
    pub fn new(legacy: TypeDescription, current: SharedTypeHandler<C>) -> Self {
        Self {
            description: legacy,
            current,
        }
    }
}

impl<C: ByteCodec> TypeHandler<C> for PassThroughHandler<C> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn instance_type(&self) -> std::any::TypeId {
        self.current.instance_type()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        self.current.reference_traversers()
    }

    fn store(
        &self,
        _chunk: &mut ChunksBuffer<C>,
        _instance: &Instance,
        oid: ObjectId,
        _storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        Err(cannot_store(&self.description, oid))
    }

    fn prepare_load_data(&self, data: Binary<C>) -> PersistenceResult<Binary<C>> {
        self.current.prepare_load_data(data)
    }

    fn iterate_loadable_references(
        &self,
        data: &Binary<C>,
        acceptor: &mut dyn ogp_binary::ObjectIdAcceptor,
    ) -> PersistenceResult<()> {
        self.current.iterate_loadable_references(data, acceptor)
    }

    fn create(&self, data: &Binary<C>) -> PersistenceResult<Instance> {
        self.current.create(data)
    }

    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        self.current.initialize(data, instance, resolver)
    }

    fn update(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        self.current.update(data, instance, resolver)
    }

    fn complete(&self, data: &Binary<C>, instance: &Instance) -> PersistenceResult<()> {
        self.current.complete(data, instance)
    }
}

/// Translates each loaded entity into a new entity in the current layout
/// and hands that to the current handler. References are found in the
/// translated entity, so traversal follows the current layout. Members that
/// move between a primitive and a reference cannot be rerouted.
pub struct ReroutingHandler<C: ByteCodec> {
    translation: LayoutTranslation,
    current: SharedTypeHandler<C>,
}

impl<C: ByteCodec> ReroutingHandler<C> {
    pub fn new(translation: LayoutTranslation, current: SharedTypeHandler<C>) -> Self {
        Self { translation, current }
    }

    pub fn translation(&self) -> &LayoutTranslation {
        &self.translation
    }
}

impl<C: ByteCodec> TypeHandler<C> for ReroutingHandler<C> {
    fn description(&self) -> &TypeDescription {
        self.translation.legacy()
    }

    fn instance_type(&self) -> std::any::TypeId {
        self.current.instance_type()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        self.current.reference_traversers()
    }

    fn store(
        &self,
        _chunk: &mut ChunksBuffer<C>,
        _instance: &Instance,
        oid: ObjectId,
        _storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        Err(cannot_store(self.translation.legacy(), oid))
    }

    fn prepare_load_data(&self, data: Binary<C>) -> PersistenceResult<Binary<C>> {
        let translated = self.translation.translate_entity(&data)?;
        self.current.prepare_load_data(translated)
    }

    fn create(&self, data: &Binary<C>) -> PersistenceResult<Instance> {
        self.current.create(data)
    }

    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        self.current.initialize(data, instance, resolver)
    }

    fn update(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        self.current.update(data, instance, resolver)
    }

    fn complete(&self, data: &Binary<C>, instance: &Instance) -> PersistenceResult<()> {
        self.current.complete(data, instance)
    }

    fn has_persisted_references(&self) -> bool {
        self.current.has_persisted_references()
    }
}

/// Reads the legacy entity as is and sets translated values on the
/// instance through the current handler's member access. Traversal follows
/// the legacy layout.
pub struct ReflectiveHandler<C: ByteCodec> {
    translation: LayoutTranslation,
    current: SharedTypeHandler<C>,
    traversers: Vec<ReferenceTraverser>,
}

impl<C: ByteCodec> ReflectiveHandler<C> {
    /// Fails unless `current` offers member access.
    pub fn new(translation: LayoutTranslation, current: SharedTypeHandler<C>) -> PersistenceResult<Self> {
        if current.member_access().is_none() {
            return Err(PersistenceError::UnsupportedLegacyType {
                tid: translation.legacy().type_id,
                type_name: translation.legacy().type_name.clone(),
                reason: format!("current handler for {} has no member access", current.type_name()),
            });
        }
        let traversers = derive_reference_traversers(translation.legacy());
        Ok(Self {
            translation,
            current,
            traversers,
        })
    }

    pub fn translation(&self) -> &LayoutTranslation {
        &self.translation
    }

    fn access(&self) -> PersistenceResult<&dyn MemberAccess> {
        self.current.member_access().ok_or_else(|| {
            PersistenceError::Consistency(format!("{} lost member access", self.current.type_name()))
        })
    }

    fn apply(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        let access = self.access()?;
        for (index, value) in self.translation.member_values(data, resolver)? {
            access.set_member(instance, index, value)?;
        }
        Ok(())
    }
}

impl<C: ByteCodec> TypeHandler<C> for ReflectiveHandler<C> {
    fn description(&self) -> &TypeDescription {
        self.translation.legacy()
    }

    fn instance_type(&self) -> std::any::TypeId {
        self.current.instance_type()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        &self.traversers
    }

    fn store(
        &self,
        _chunk: &mut ChunksBuffer<C>,
        _instance: &Instance,
        oid: ObjectId,
        _storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        Err(cannot_store(self.translation.legacy(), oid))
    }

    fn create(&self, _data: &Binary<C>) -> PersistenceResult<Instance> {
        Ok(self.access()?.create_blank())
    }

    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        self.apply(data, instance, resolver)
    }

    fn update(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        self.apply(data, instance, resolver)
    }
}
