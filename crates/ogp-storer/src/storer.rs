//! Storer sessions.
//!
//! A [`Storer`] walks an object graph iteratively: `store` resolves the root's
//! object id through the [`ObjectManager`], which calls back into the session
//! to enqueue instances according to the [`StoringPolicy`]; the queue is then
//! drained, each handler appending its entity to the channel chunks and
//! applying the instances it references. Nothing reaches the storage until
//! [`Storer::commit`].
//!
//! Locks: the chunk lock is held while a handler stores, the manager lock
//! while ids are resolved, the index lock only for local bookkeeping. The
//! index lock is never held across a manager call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ogp_binary::{ByteCodec, ChannelChunks, ReferenceStorer, SharedTypeHandler};
use ogp_registry::{LocalObjectRegistry, ObjectIdRequestor, ObjectManager, TypeHandlerRegistry};
use ogp_storage::StorageTarget;
use ogp_types::{identity_of, Instance, ObjectId, PersistenceResult};
use tracing::{debug, info};

use crate::config::{StorerConfig, StoringPolicy};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct StorerItem<C: ByteCodec> {
    instance: Instance,
    oid: ObjectId,
    /// Absent for skipped instances.
    handler: Option<SharedTypeHandler<C>>,
}

/// Identity-keyed items of the session in insertion order.
struct LocalIndex<C: ByteCodec> {
    by_identity: HashMap<usize, usize>,
    items: Vec<StorerItem<C>>,
    /// Items before this position have been handed to their handler.
    processed: usize,
}

impl<C: ByteCodec> LocalIndex<C> {
    fn new() -> Self {
        Self {
            by_identity: HashMap::new(),
            items: Vec::new(),
            processed: 0,
        }
    }

    fn lookup(&self, instance: &Instance) -> Option<ObjectId> {
        self.by_identity
            .get(&identity_of(instance))
            .map(|&position| self.items[position].oid)
    }

    fn contains(&self, instance: &Instance) -> bool {
        self.by_identity.contains_key(&identity_of(instance))
    }

    fn insert(&mut self, instance: &Instance, oid: ObjectId, handler: Option<SharedTypeHandler<C>>) {
        self.by_identity.insert(identity_of(instance), self.items.len());
        self.items.push(StorerItem {
            instance: Arc::clone(instance),
            oid,
            handler,
        });
    }

    /// The next item still to be stored.
    fn next_pending(&mut self) -> Option<(Instance, ObjectId, SharedTypeHandler<C>)> {
        while self.processed < self.items.len() {
            let item = &self.items[self.processed];
            self.processed += 1;
            if let Some(handler) = &item.handler {
                return Some((Arc::clone(&item.instance), item.oid, Arc::clone(handler)));
            }
        }
        None
    }

    fn stored_entries(&self) -> Vec<(ObjectId, Instance)> {
        self.items
            .iter()
            .filter(|item| item.handler.is_some())
            .map(|item| (item.oid, Arc::clone(&item.instance)))
            .collect()
    }

    fn clear(&mut self) {
        self.by_identity.clear();
        self.items.clear();
        self.processed = 0;
    }
}

/// One storing session over a storage target.
pub struct Storer<C: ByteCodec> {
    session_id: u64,
    config: StorerConfig,
    manager: Arc<ObjectManager>,
    handlers: Arc<TypeHandlerRegistry<C>>,
    target: Arc<dyn StorageTarget>,
    index: Mutex<LocalIndex<C>>,
    chunks: Mutex<ChannelChunks<C>>,
}

impl<C: ByteCodec> Storer<C> {
    /// Create a session and announce it to the manager, so that concurrent
    /// sessions reuse the ids it assigns before it commits.
    pub fn new(
        manager: Arc<ObjectManager>,
        handlers: Arc<TypeHandlerRegistry<C>>,
        target: Arc<dyn StorageTarget>,
        config: StorerConfig,
    ) -> PersistenceResult<Arc<Self>> {
        config.validate()?;
        let chunks = ChannelChunks::new(config.channel_count, config.buffer_capacity)?;
        let storer = Arc::new(Self {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            manager,
            handlers,
            target,
            index: Mutex::new(LocalIndex::new()),
            chunks: Mutex::new(chunks),
        });
        let local: Arc<dyn LocalObjectRegistry> = storer.clone();
        storer.manager.register_local_registry(&local);
        Ok(storer)
    }

    fn lock_index(&self) -> MutexGuard<'_, LocalIndex<C>> {
        self.index.lock().expect("storer index lock poisoned")
    }

    fn lock_chunks(&self) -> MutexGuard<'_, ChannelChunks<C>> {
        self.chunks.lock().expect("storer chunks lock poisoned")
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn policy(&self) -> StoringPolicy {
        self.config.policy
    }

    /// Store `root` and everything the policy reaches from it. Returns the
    /// root's object id.
    pub fn store(&self, root: &Instance) -> PersistenceResult<ObjectId> {
        if let Some(oid) = self.lock_index().lookup(root) {
            return Ok(oid);
        }
        let oid = self
            .manager
            .ensure_object_id_guaranteed_register(root, self, self.session_id)?;
        self.process_queue()?;
        Ok(oid)
    }

    pub fn store_all(&self, roots: &[Instance]) -> PersistenceResult<Vec<ObjectId>> {
        roots.iter().map(|root| self.store(root)).collect()
    }

    fn process_queue(&self) -> PersistenceResult<()> {
        let mut chunks = self.lock_chunks();
        loop {
            let Some((instance, oid, handler)) = self.lock_index().next_pending() else {
                return Ok(());
            };
            debug!(oid = %oid, type_name = handler.type_name(), "storing");
            handler.store(chunks.chunk_for(oid), &instance, oid, self)?;
        }
    }

    fn enqueue(&self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()> {
        if self.lock_index().contains(instance) {
            return Ok(());
        }
        let handler = self.handlers.handler_for_instance(instance)?;
        let mut index = self.lock_index();
        if !index.contains(instance) {
            index.insert(instance, oid, Some(handler));
        }
        Ok(())
    }

    fn register_skip(&self, instance: &Instance, oid: ObjectId) -> ObjectId {
        let mut index = self.lock_index();
        match index.lookup(instance) {
            Some(existing) => existing,
            None => {
                index.insert(instance, oid, None);
                oid
            }
        }
    }

    /// Reference `instance` without storing it: its known object id, or
    /// null if it has none.
    pub fn skip(&self, instance: &Instance) -> ObjectId {
        if let Some(oid) = self.lock_index().lookup(instance) {
            return oid;
        }
        let oid = self.manager.lookup_object_id(instance).unwrap_or(ObjectId::NULL);
        self.register_skip(instance, oid)
    }

    /// References to `instance` are stored as null.
    pub fn skip_nulled(&self, instance: &Instance) -> ObjectId {
        self.register_skip(instance, ObjectId::NULL)
    }

    /// References to `instance` are stored as `oid`.
    pub fn skip_mapped(&self, instance: &Instance, oid: ObjectId) -> ObjectId {
        self.register_skip(instance, oid)
    }

    /// Write everything stored so far, then publish the session's ids to
    /// the registry. An empty session only checks that storing is enabled.
    pub fn commit(&self) -> PersistenceResult<()> {
        self.target.validate_is_storing_enabled()?;
        let completed = {
            let mut chunks = self.lock_chunks();
            if chunks.is_empty() {
                return Ok(());
            }
            let fresh = ChannelChunks::new(self.config.channel_count, self.config.buffer_capacity)?;
            std::mem::replace(&mut *chunks, fresh).complete()
        };
        let buffers: usize = completed.iter().map(|c| c.buffers.len()).sum();
        let bytes: usize = completed.iter().map(|c| c.byte_count()).sum();

        self.target.write(&completed)?;

        let entries = self.lock_index().stored_entries();
        self.manager.merge_entries(&entries)?;
        self.lock_index().clear();
        info!(
            session = self.session_id,
            objects = entries.len(),
            buffers,
            bytes,
            "committed storer session"
        );
        Ok(())
    }

    /// Drop everything stored but not committed.
    pub fn clear(&self) -> PersistenceResult<()> {
        let fresh = ChannelChunks::new(self.config.channel_count, self.config.buffer_capacity)?;
        *self.lock_chunks() = fresh;
        self.lock_index().clear();
        Ok(())
    }

    /// Number of instances the session knows, skipped ones included.
    pub fn size(&self) -> usize {
        self.lock_index().items.len()
    }

    /// Object id assigned in this session, if any.
    pub fn lookup_object_id(&self, instance: &Instance) -> Option<ObjectId> {
        self.lock_index().lookup(instance)
    }
}

impl<C: ByteCodec> ReferenceStorer for Storer<C> {
    fn apply(&self, instance: &Instance) -> PersistenceResult<ObjectId> {
        if let Some(oid) = self.lock_index().lookup(instance) {
            return Ok(oid);
        }
        self.manager.ensure_object_id(instance, self, self.session_id)
    }

    fn apply_eager(&self, instance: &Instance) -> PersistenceResult<ObjectId> {
        if let Some(oid) = self.lock_index().lookup(instance) {
            return Ok(oid);
        }
        self.manager
            .ensure_object_id_guaranteed_register(instance, self, self.session_id)
    }
}

impl<C: ByteCodec> ObjectIdRequestor for Storer<C> {
    fn register_guaranteed(&self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()> {
        self.enqueue(instance, oid)
    }

    fn register_lazy_optional(&self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()> {
        match self.config.policy {
            StoringPolicy::Lazy => self.enqueue(instance, oid),
            StoringPolicy::Eager => Ok(()),
        }
    }

    fn register_eager_optional(&self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()> {
        match self.config.policy {
            StoringPolicy::Eager => self.enqueue(instance, oid),
            StoringPolicy::Lazy => Ok(()),
        }
    }
}

impl<C: ByteCodec> LocalObjectRegistry for Storer<C> {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn lookup_object_id(&self, instance: &Instance) -> Option<ObjectId> {
        self.lock_index().lookup(instance).filter(|oid| !oid.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogp_binary::{
        Direct, GenericHandler, MemberValue, ObjectList, PersistentRecord, PrimitiveType,
        PrimitiveValue, TypeDescription, TypeMember,
    };
    use ogp_registry::shared;
    use ogp_storage::InMemoryStorage;
    use ogp_types::{PersistenceError, TypeId};
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

    fn node(value: i32) -> Arc<Node> {
        Arc::new(Node {
            value: RwLock::new(value),
            next: RwLock::new(None),
        })
    }

    fn link(from: &Arc<Node>, to: &Arc<Node>) {
        let to: Instance = to.clone();
        *from.next.write().unwrap() = Some(to);
    }

    struct Fixture {
        manager: Arc<ObjectManager>,
        handlers: Arc<TypeHandlerRegistry<Direct>>,
        storage: Arc<InMemoryStorage<Direct>>,
    }

    impl Fixture {
        fn new() -> Self {
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
            Self {
                manager: Arc::new(ObjectManager::new()),
                handlers: Arc::new(handlers),
                storage: Arc::new(InMemoryStorage::new()),
            }
        }

        fn storer(&self, policy: StoringPolicy) -> Arc<Storer<Direct>> {
            let config = StorerConfig {
                policy,
                channel_count: 2,
                buffer_capacity: 128,
            };
            Storer::new(
                Arc::clone(&self.manager),
                Arc::clone(&self.handlers),
                self.storage.clone(),
                config,
            )
            .unwrap()
        }
    }

    // ---- graph walking ----

    #[test]
    fn cycle_stores_each_instance_once() {
        let fx = Fixture::new();
        let a = node(1);
        let b = node(2);
        link(&a, &b);
        link(&b, &a);

        let storer = fx.storer(StoringPolicy::Lazy);
        let root: Instance = a.clone();
        let oid = storer.store(&root).unwrap();
        assert_eq!(storer.size(), 2);
        storer.commit().unwrap();

        assert_eq!(fx.storage.entity_count(), 2);
        let b_instance: Instance = b.clone();
        let b_oid = fx.manager.lookup_object_id(&b_instance).unwrap();
        let a_data = fx.storage.entity(oid).unwrap();
        let a_entity = ogp_binary::Binary::<Direct>::from_entity(a_data).unwrap();
        assert_eq!(a_entity.get_i32(0).unwrap(), 1);
        assert_eq!(a_entity.get_reference(4).unwrap(), b_oid);
    }

    #[test]
    fn storing_twice_writes_once() {
        let fx = Fixture::new();
        let a: Instance = node(5);
        let storer = fx.storer(StoringPolicy::Lazy);
        let first = storer.store(&a).unwrap();
        let second = storer.store(&a).unwrap();
        assert_eq!(first, second);
        storer.commit().unwrap();
        assert_eq!(fx.storage.entity_count(), 1);
        assert_eq!(fx.storage.write_count(), 1);
    }

    #[test]
    fn lazy_skips_known_references_eager_does_not() {
        let fx = Fixture::new();
        let a = node(1);
        let b = node(2);
        link(&a, &b);
        let root: Instance = a.clone();

        let storer = fx.storer(StoringPolicy::Lazy);
        storer.store(&root).unwrap();
        storer.commit().unwrap();
        assert_eq!(fx.storage.write_count(), 1);

        *b.value.write().unwrap() = 20;
        let lazy = fx.storer(StoringPolicy::Lazy);
        lazy.store(&root).unwrap();
        assert_eq!(lazy.size(), 1);

        let eager = fx.storer(StoringPolicy::Eager);
        eager.store(&root).unwrap();
        assert_eq!(eager.size(), 2);
        eager.commit().unwrap();
        let b_instance: Instance = b.clone();
        let b_oid = fx.manager.lookup_object_id(&b_instance).unwrap();
        let data = ogp_binary::Binary::<Direct>::from_entity(fx.storage.entity(b_oid).unwrap()).unwrap();
        assert_eq!(data.get_i32(0).unwrap(), 20);
    }

    #[test]
    fn builtin_lists_are_walked() {
        let fx = Fixture::new();
        let text: Instance = Arc::new(String::from("hello"));
        let list = Arc::new(ObjectList::new(vec![Some(Arc::clone(&text)), None]));
        let storer = fx.storer(StoringPolicy::Lazy);
        let root: Instance = list;
        storer.store(&root).unwrap();
        storer.commit().unwrap();
        assert_eq!(fx.storage.entity_count(), 2);
        assert!(fx.manager.lookup_object_id(&text).is_some());
    }

    #[test]
    fn unhandled_instance_type_fails() {
        let fx = Fixture::new();
        let storer = fx.storer(StoringPolicy::Lazy);
        let unknown: Instance = Arc::new(3.5f64);
        assert!(matches!(storer.store(&unknown), Err(PersistenceError::UnhandledType { .. })));
    }

    // ---- skipping ----

    #[test]
    fn skipped_instances_are_referenced_not_stored() {
        let fx = Fixture::new();
        let a = node(1);
        let b = node(2);
        link(&a, &b);
        let b_instance: Instance = b.clone();

        let storer = fx.storer(StoringPolicy::Lazy);
        assert!(storer.skip(&b_instance).is_null());
        let root: Instance = a.clone();
        let a_oid = storer.store(&root).unwrap();
        storer.commit().unwrap();
        assert_eq!(fx.storage.entity_count(), 1);
        let data = ogp_binary::Binary::<Direct>::from_entity(fx.storage.entity(a_oid).unwrap()).unwrap();
        assert!(data.get_reference(4).unwrap().is_null());
        assert!(fx.manager.lookup_object_id(&b_instance).is_none());

        let mapped = fx.storer(StoringPolicy::Lazy);
        mapped.skip_mapped(&b_instance, ObjectId::new(77));
        mapped.store(&root).unwrap();
        mapped.commit().unwrap();
        let data = ogp_binary::Binary::<Direct>::from_entity(fx.storage.entity(a_oid).unwrap()).unwrap();
        assert_eq!(data.get_reference(4).unwrap(), ObjectId::new(77));
    }

    // ---- sessions ----

    #[test]
    fn pending_ids_are_shared_between_sessions() {
        let fx = Fixture::new();
        let shared_node: Instance = node(9);
        let first = fx.storer(StoringPolicy::Lazy);
        let second = fx.storer(StoringPolicy::Lazy);
        let oid = first.store(&shared_node).unwrap();

        let holder = node(1);
        *holder.next.write().unwrap() = Some(Arc::clone(&shared_node));
        let holder: Instance = holder;
        second.store(&holder).unwrap();
        assert_eq!(second.size(), 1);
        assert_eq!(second.lookup_object_id(&shared_node), None);
        assert_eq!(LocalObjectRegistry::lookup_object_id(&*first, &shared_node), Some(oid));
    }

    #[test]
    fn empty_commit_only_validates() {
        let fx = Fixture::new();
        let storer = fx.storer(StoringPolicy::Lazy);
        storer.commit().unwrap();
        assert_eq!(fx.storage.write_count(), 0);
        fx.storage.set_storing_enabled(false);
        assert!(matches!(storer.commit(), Err(PersistenceError::StoringDisabled(_))));
    }

    #[test]
    fn clear_discards_uncommitted_work() {
        let fx = Fixture::new();
        let storer = fx.storer(StoringPolicy::Lazy);
        let a: Instance = node(1);
        storer.store(&a).unwrap();
        storer.clear().unwrap();
        assert_eq!(storer.size(), 0);
        storer.commit().unwrap();
        assert_eq!(fx.storage.entity_count(), 0);
        assert!(fx.manager.lookup_object_id(&a).is_none());
    }
}
