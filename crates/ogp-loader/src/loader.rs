//! The loader.
//!
//! Every entity read becomes a build item. After each read the new items'
//! references are iterated and whatever is neither null, already an item nor
//! (in lazy mode) already registered is requested from the source, until
//! nothing is missing. The batch is then built under the object manager
//! lock: blank instances are created and registered (register-or-get), fresh
//! instances initialized, chosen existing ones updated, and all of them
//! completed. Source reads never happen under the manager lock.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use ogp_binary::{iterate_entities, Binary, ByteCodec, ObjectResolver, TypeHandler};
use ogp_registry::{ObjectManager, ObjectRegistry, TypeHandlerRegistry};
use ogp_storage::StorageSource;
use ogp_types::{same_instance, type_name_of, Instance, ObjectId, PersistenceError, PersistenceResult};
use tracing::debug;

use crate::config::LoaderConfig;
use crate::items::{BuildItem, BuildItems, BuildState, LoadItemsChain};

/// Resolves references during a build: batch items first, then the registry.
struct BuildResolver<'a, C: ByteCodec> {
    items: &'a BuildItems<C>,
    registry: &'a ObjectRegistry,
}

impl<C: ByteCodec> ObjectResolver for BuildResolver<'_, C> {
    fn lookup_object(&self, oid: ObjectId) -> Option<Instance> {
        match self.items.get(oid) {
            Some(item) => item.instance().cloned(),
            None => self.registry.lookup_object(oid),
        }
    }

    fn resolve(&self, oid: ObjectId) -> PersistenceResult<Option<Instance>> {
        if oid.is_null() {
            return Ok(None);
        }
        if let Some(BuildItem {
            state: BuildState::Skipped(instance),
            ..
        }) = self.items.get(oid)
        {
            return Ok(instance.clone());
        }
        self.lookup_object(oid)
            .map(Some)
            .ok_or(PersistenceError::UnresolvedReference { oid })
    }
}

fn ensure_instance_type<C: ByteCodec>(
    handler: &dyn TypeHandler<C>,
    instance: &Instance,
    oid: ObjectId,
) -> PersistenceResult<()> {
    if std::any::Any::type_id(&**instance) == handler.instance_type() {
        return Ok(());
    }
    Err(PersistenceError::TypeMismatch {
        oid,
        expected: handler.type_name().to_string(),
        actual: type_name_of(instance),
    })
}

pub struct Loader<C: ByteCodec> {
    config: LoaderConfig,
    manager: Arc<ObjectManager>,
    handlers: Arc<TypeHandlerRegistry<C>>,
    source: Arc<dyn StorageSource>,
    items: BuildItems<C>,
    chain: LoadItemsChain,
    force_update: HashSet<ObjectId>,
}

impl<C: ByteCodec> Loader<C> {
    pub fn new(
        manager: Arc<ObjectManager>,
        handlers: Arc<TypeHandlerRegistry<C>>,
        source: Arc<dyn StorageSource>,
        config: LoaderConfig,
    ) -> Self {
        let chain = LoadItemsChain::for_channels(config.channel_count);
        Self {
            config,
            manager,
            handlers,
            source,
            items: BuildItems::new(),
            chain,
            force_update: HashSet::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load whatever the source hands out first, typically the roots, and
    /// return the first instance built from it.
    pub fn get(&mut self) -> PersistenceResult<Option<Instance>> {
        self.batch(|this| {
            let initial = this.source.read()?;
            this.add_chunks(&initial)?;
            this.read_required()?;
            this.build()?;
            Ok(this
                .items
                .iter()
                .filter(|item| item.data.is_some())
                .find_map(BuildItem::instance)
                .cloned())
        })
    }

    /// The instance for `oid`, loaded if necessary. Null yields `None`.
    pub fn get_object(&mut self, oid: ObjectId) -> PersistenceResult<Option<Instance>> {
        self.batch(|this| {
            this.require(oid);
            this.read_required()?;
            this.build()?;
            Ok(this.instance_for(oid))
        })
    }

    /// The instances for `oids`, in order, loaded in one batch.
    pub fn collect(&mut self, oids: &[ObjectId]) -> PersistenceResult<Vec<Option<Instance>>> {
        self.batch(|this| {
            for &oid in oids {
                this.require(oid);
            }
            this.read_required()?;
            this.build()?;
            Ok(oids.iter().map(|&oid| this.instance_for(oid)).collect())
        })
    }

    /// Bind `instance` to `oid` and have the next batch load its data into
    /// it, even though it is an existing instance.
    pub fn require_root(&mut self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()> {
        self.manager.lock_registry().register(oid, instance)?;
        self.force_update.insert(oid);
        self.require(oid);
        Ok(())
    }

    /// Exclude `oid` from the next batch; references to it resolve to null
    /// unless it is registered.
    pub fn register_skip(&mut self, oid: ObjectId) {
        if oid.is_null() {
            return;
        }
        let instance = self.manager.lookup_object(oid);
        self.items.put_skip(oid, instance);
    }

    fn batch<T>(&mut self, run: impl FnOnce(&mut Self) -> PersistenceResult<T>) -> PersistenceResult<T> {
        let result = run(self);
        self.items.clear();
        self.chain.clear();
        self.force_update.clear();
        result
    }

    fn require(&mut self, oid: ObjectId) {
        if !oid.is_null() && !self.items.contains(oid) {
            self.chain.add(oid);
        }
    }

    fn instance_for(&self, oid: ObjectId) -> Option<Instance> {
        self.items.get(oid).and_then(BuildItem::instance).cloned()
    }

    fn read_required(&mut self) -> PersistenceResult<()> {
        while !self.chain.is_empty() {
            let sets = self.chain.take();
            let requested: Vec<ObjectId> = sets.iter().flatten().copied().collect();
            let chunks = self.source.read_by_object_ids(&sets)?;
            self.add_chunks(&chunks)?;
            if let Some(&missing) = requested.iter().find(|oid| !self.items.contains(**oid)) {
                return Err(PersistenceError::ObjectNotFound(missing));
            }
        }
        Ok(())
    }

    /// Discover every entity of `chunks`, then require what they reference.
    fn add_chunks(&mut self, chunks: &[Bytes]) -> PersistenceResult<()> {
        let start = self.items.len();
        let manager = Arc::clone(&self.manager);
        {
            let registry = manager.lock_registry();
            for chunk in chunks {
                for entity in iterate_entities::<C>(chunk, false) {
                    self.discover(entity?, &registry)?;
                }
            }
        }
        debug!(
            chunks = chunks.len(),
            discovered = self.items.len() - start,
            "read entities"
        );
        self.require_references(start)
    }

    fn discover(&mut self, entity: Binary<C>, registry: &ObjectRegistry) -> PersistenceResult<()> {
        let oid = entity.object_id();
        if self.items.contains(oid) {
            debug!(oid = %oid, "ignoring entity already in the batch");
            return Ok(());
        }
        let handler = self.handlers.handler_for(entity.type_id(), oid)?;
        let data = handler.prepare_load_data(entity)?;
        let state = match registry.lookup_object(oid) {
            Some(instance) => BuildState::Resolved { instance, existed: true },
            None => BuildState::Pending,
        };
        self.items.put(BuildItem {
            oid,
            data: Some((handler, data)),
            state,
        });
        Ok(())
    }

    fn require_references(&mut self, start: usize) -> PersistenceResult<()> {
        let mut referenced = Vec::new();
        for item in self.items.since(start) {
            if let Some((handler, data)) = &item.data {
                handler.iterate_loadable_references(data, &mut |oid: ObjectId| referenced.push(oid))?;
            }
        }

        let manager = Arc::clone(&self.manager);
        let registry = manager.lock_registry();
        for oid in referenced {
            if oid.is_null() || self.items.contains(oid) || self.chain.contains(oid) {
                continue;
            }
            if !self.config.update_existing {
                if let Some(instance) = registry.lookup_object(oid) {
                    self.items.put_skip(oid, Some(instance));
                    continue;
                }
            }
            self.chain.add(oid);
        }
        Ok(())
    }

    fn build(&mut self) -> PersistenceResult<()> {
        let manager = Arc::clone(&self.manager);
        let mut registry = manager.lock_registry();

        // Create.
        for item in self.items.iter_mut() {
            let Some((handler, data)) = &item.data else {
                continue;
            };
            let next = match &item.state {
                BuildState::Pending => BuildState::Created(handler.create(data)?),
                BuildState::Resolved { instance, .. } => {
                    ensure_instance_type(&**handler, instance, item.oid)?;
                    continue;
                }
                _ => continue,
            };
            item.state = next;
        }

        // Register, keeping whichever instance won.
        for item in self.items.iter_mut() {
            let BuildState::Created(created) = &item.state else {
                continue;
            };
            let winner = registry.optional_register(item.oid, created)?;
            let existed = !same_instance(&winner, created);
            if existed {
                if let Some((handler, _)) = &item.data {
                    ensure_instance_type(&**handler, &winner, item.oid)?;
                }
            }
            item.state = BuildState::Resolved {
                instance: winner,
                existed,
            };
        }

        // Update.
        let resolver = BuildResolver {
            items: &self.items,
            registry: &registry,
        };
        let mut built = Vec::new();
        for item in self.items.iter() {
            let (Some((handler, data)), BuildState::Resolved { instance, existed }) = (&item.data, &item.state) else {
                continue;
            };
            if !existed {
                handler.initialize(data, instance, &resolver)?;
            } else if self.config.update_existing || self.force_update.contains(&item.oid) {
                handler.update(data, instance, &resolver)?;
            } else {
                continue;
            }
            built.push((handler, data, instance));
        }

        // Complete.
        for (handler, data, instance) in &built {
            handler.complete(data, instance)?;
        }
        debug!(items = self.items.len(), built = built.len(), "built load batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogp_binary::{
        ChannelChunks, Direct, GenericHandler, MemberValue, PersistentRecord, PrimitiveType, PrimitiveValue,
        Reversed, TypeDescription, TypeMember,
    };
    use ogp_registry::shared;
    use ogp_storage::{InMemoryStorage, StorageTarget};
    use ogp_storer::{Storer, StorerConfig};
    use ogp_types::TypeId;
    use std::sync::RwLock;

    #[derive(Default)]
    struct Node {
        value: RwLock<i32>,
        next: RwLock<Option<Instance>>,
    }

    impl PersistentRecord for Node {
        fn read_member(&self, index: usize) -> MemberValue {
            match index {
                0 => MemberValue::Primitive(PrimitiveValue::I32(*self.value.read().unwrap())),
                _ => MemberValue::Reference(self.next.read().unwrap().clone()),
            }
        }

        fn write_member(&self, index: usize, value: MemberValue) -> PersistenceResult<()> {
            match (index, value) {
                (0, MemberValue::Primitive(PrimitiveValue::I32(v))) => *self.value.write().unwrap() = v,
                (1, MemberValue::Reference(r)) => *self.next.write().unwrap() = r,
                (i, v) => return Err(PersistenceError::Consistency(format!("bad member {i}: {v:?}"))),
            }
            Ok(())
        }
    }

    fn node(value: i32, next: Option<Instance>) -> Arc<Node> {
        Arc::new(Node {
            value: RwLock::new(value),
            next: RwLock::new(next),
        })
    }

    fn value(instance: &Instance) -> i32 {
        *instance.downcast_ref::<Node>().unwrap().value.read().unwrap()
    }

    fn next(instance: &Instance) -> Option<Instance> {
        instance.downcast_ref::<Node>().unwrap().next.read().unwrap().clone()
    }

    fn handlers<C: ByteCodec>() -> Arc<TypeHandlerRegistry<C>> {
        let handlers = TypeHandlerRegistry::with_builtins().unwrap();
        let description = TypeDescription::new(
            TypeId::new(7),
            "Node",
            vec![
                TypeMember::primitive("value", PrimitiveType::I32),
                TypeMember::reference("next", "Node"),
            ],
        );
        handlers
            .register(shared(GenericHandler::<Node>::new(description).unwrap()))
            .unwrap();
        Arc::new(handlers)
    }

    /// Store `roots` in one session; returns their object ids.
    fn store<C: ByteCodec>(storage: &Arc<InMemoryStorage<C>>, roots: &[Instance]) -> Vec<ObjectId> {
        let storer = Storer::new(
            Arc::new(ObjectManager::new()),
            handlers::<C>(),
            storage.clone(),
            StorerConfig {
                channel_count: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let oids = storer.store_all(roots).unwrap();
        storer.commit().unwrap();
        oids
    }

    fn loader<C: ByteCodec>(storage: &Arc<InMemoryStorage<C>>, config: LoaderConfig) -> (Arc<ObjectManager>, Loader<C>) {
        let manager = Arc::new(ObjectManager::new());
        let loader = Loader::new(Arc::clone(&manager), handlers::<C>(), storage.clone(), config);
        (manager, loader)
    }

    // ---- round trips ----

    fn cycle_roundtrip<C: ByteCodec>() {
        let a = node(1, None);
        let a_instance: Instance = a.clone();
        let b: Instance = node(2, Some(Arc::clone(&a_instance)));
        *a.next.write().unwrap() = Some(b);
        let storage = Arc::new(InMemoryStorage::<C>::new());
        let oids = store(&storage, &[a_instance]);
        assert_eq!(storage.entity_count(), 2);

        let (_, mut loader) = loader(&storage, LoaderConfig::default());
        let loaded_a = loader.get_object(oids[0]).unwrap().unwrap();
        assert_eq!(value(&loaded_a), 1);
        let loaded_b = next(&loaded_a).unwrap();
        assert_eq!(value(&loaded_b), 2);
        assert!(same_instance(&next(&loaded_b).unwrap(), &loaded_a));
    }

    #[test]
    fn cycle_roundtrip_direct() {
        cycle_roundtrip::<Direct>();
    }

    #[test]
    fn cycle_roundtrip_reversed() {
        cycle_roundtrip::<Reversed>();
    }

    #[test]
    fn shared_references_load_as_one_instance() {
        let shared_node: Instance = node(3, None);
        let a: Instance = node(1, Some(Arc::clone(&shared_node)));
        let b: Instance = node(2, Some(Arc::clone(&shared_node)));
        let storage = Arc::new(InMemoryStorage::<Direct>::new());
        let oids = store(&storage, &[a, b]);

        let (_, mut loader) = loader(&storage, LoaderConfig {
            channel_count: 2,
            ..Default::default()
        });
        let loaded = loader.collect(&[oids[0], ObjectId::NULL, oids[1]]).unwrap();
        assert!(loaded[1].is_none());
        let (a, b) = (loaded[0].as_ref().unwrap(), loaded[2].as_ref().unwrap());
        assert!(same_instance(&next(a).unwrap(), &next(b).unwrap()));
        assert_eq!(value(&next(a).unwrap()), 3);
    }

    #[test]
    fn registered_instances_are_reused_not_reloaded() {
        let tail: Instance = node(2, None);
        let head: Instance = node(1, Some(Arc::clone(&tail)));
        let storage = Arc::new(InMemoryStorage::<Direct>::new());
        let oids = store(&storage, &[head]);

        let (manager, mut loader) = loader(&storage, LoaderConfig::default());
        let loaded = loader.get_object(oids[0]).unwrap().unwrap();
        let loaded_tail = next(&loaded).unwrap();
        *loaded.downcast_ref::<Node>().unwrap().value.write().unwrap() = 10;
        *loaded_tail.downcast_ref::<Node>().unwrap().value.write().unwrap() = 20;

        let again = loader.get_object(oids[0]).unwrap().unwrap();
        assert!(same_instance(&again, &loaded));
        assert_eq!(value(&again), 10);
        assert_eq!(value(&loaded_tail), 20);

        let mut updating = Loader::new(
            manager,
            handlers::<Direct>(),
            storage.clone(),
            LoaderConfig {
                update_existing: true,
                ..Default::default()
            },
        );
        let refreshed = updating.get_object(oids[0]).unwrap().unwrap();
        assert!(same_instance(&refreshed, &loaded));
        assert_eq!(value(&refreshed), 1);
        assert_eq!(value(&loaded_tail), 2);
    }

    #[test]
    fn required_root_is_populated_in_place() {
        let storage = Arc::new(InMemoryStorage::<Direct>::new());
        let stored: Instance = node(5, None);
        let oids = store(&storage, &[stored]);
        let (manager, mut loader) = loader(&storage, LoaderConfig::default());

        let root: Instance = node(0, None);
        loader.require_root(&root, oids[0]).unwrap();
        let loaded = loader.get_object(oids[0]).unwrap().unwrap();
        assert!(same_instance(&loaded, &root));
        assert_eq!(value(&root), 5);
        assert!(same_instance(&manager.lookup_object(oids[0]).unwrap(), &root));
    }

    #[test]
    fn skipped_ids_resolve_to_null() {
        let tail: Instance = node(2, None);
        let head: Instance = node(1, Some(Arc::clone(&tail)));
        let storage = Arc::new(InMemoryStorage::<Direct>::new());
        let oids = store(&storage, &[head, tail]);

        let (manager, mut loader) = loader(&storage, LoaderConfig::default());
        loader.register_skip(oids[1]);
        let loaded = loader.get_object(oids[0]).unwrap().unwrap();
        assert!(next(&loaded).is_none());
        assert!(manager.lookup_object(oids[1]).is_none());
    }

    // ---- failures ----

    #[test]
    fn unknown_type_id_is_fatal() {
        let storage = Arc::new(InMemoryStorage::<Direct>::new());
        let oid = ObjectId::new(500);
        let mut chunks = ChannelChunks::<Direct>::new(1, 64).unwrap();
        chunks.chunk_for(oid).store_single_value(TypeId::new(999), oid, 1i32).unwrap();
        storage.write(&chunks.complete()).unwrap();

        let (_, mut loader) = loader(&storage, LoaderConfig::default());
        let err = loader.get_object(oid).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnhandledTypeId { tid, oid: o } if tid == TypeId::new(999) && o == oid
        ));
    }

    #[test]
    fn missing_referenced_entity_is_reported() {
        let storage = Arc::new(InMemoryStorage::<Direct>::new());
        let oid = ObjectId::new(600);
        let mut chunks = ChannelChunks::<Direct>::new(1, 64).unwrap();
        let mut writer = chunks.chunk_for(oid).store_entity_header(12, TypeId::new(7), oid).unwrap();
        writer.put(0, 1i32).unwrap();
        writer.put_reference(4, ObjectId::new(601)).unwrap();
        storage.write(&chunks.complete()).unwrap();

        let (_, mut loader) = loader(&storage, LoaderConfig::default());
        assert!(matches!(
            loader.get_object(oid),
            Err(PersistenceError::ObjectNotFound(missing)) if missing == ObjectId::new(601)
        ));
        // The failed batch leaves nothing behind.
        assert!(loader.get().unwrap().is_none());
    }

    #[test]
    fn registry_instance_of_wrong_type_is_a_mismatch() {
        let storage = Arc::new(InMemoryStorage::<Direct>::new());
        let stored: Instance = node(5, None);
        let oids = store(&storage, &[stored]);
        let (manager, mut loader) = loader(&storage, LoaderConfig::default());
        let impostor: Instance = Arc::new(String::from("not a node"));
        manager.merge_entries(&[(oids[0], Arc::clone(&impostor))]).unwrap();
        assert!(matches!(
            loader.get_object(oids[0]),
            Err(PersistenceError::TypeMismatch { .. })
        ));
    }
}
