//! The object manager: one lock around the registry, the id provider and the
//! table of live storer sessions.
//!
//! Storers ask the manager for object ids; loaders take the registry lock for
//! a whole batch. The manager calls back into a storer session (through
//! [`ObjectIdRequestor`]) and into other sessions' local registries while it
//! holds its lock, so sessions must never call the manager while holding
//! their own index lock.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ogp_types::{Instance, ObjectId, PersistenceResult};
use tracing::debug;

use crate::ids::{ObjectIdProvider, TransientObjectIdProvider};
use crate::registry::ObjectRegistry;

/// Callbacks a storer session receives while the manager assigns an id.
pub trait ObjectIdRequestor {
    /// Store the instance regardless of policy.
    fn register_guaranteed(&self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()>;

    /// Called for instances that just got a new id; lazy sessions store them.
    fn register_lazy_optional(&self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()>;

    /// Called for every resolved instance; eager sessions store them.
    fn register_eager_optional(&self, instance: &Instance, oid: ObjectId) -> PersistenceResult<()>;
}

/// Pending, not yet committed id assignments of one storer session.
pub trait LocalObjectRegistry: Send + Sync {
    fn session_id(&self) -> u64;

    fn lookup_object_id(&self, instance: &Instance) -> Option<ObjectId>;
}

struct ManagerState {
    registry: ObjectRegistry,
    ids: Box<dyn ObjectIdProvider>,
    locals: HashMap<u64, Weak<dyn LocalObjectRegistry>>,
}

impl ManagerState {
    fn lookup_pending(&self, instance: &Instance, session_id: u64) -> Option<ObjectId> {
        self.locals
            .iter()
            .filter(|(id, _)| **id != session_id)
            .filter_map(|(_, local)| local.upgrade())
            .find_map(|local| local.lookup_object_id(instance))
    }

    /// Known id of `instance` and whether it was newly assigned.
    fn resolve(&mut self, instance: &Instance, session_id: u64) -> PersistenceResult<(ObjectId, bool)> {
        if let Some(oid) = self.registry.lookup_object_id(instance) {
            return Ok((oid, false));
        }
        if let Some(oid) = self.lookup_pending(instance, session_id) {
            return Ok((oid, false));
        }
        Ok((self.ids.provide_next()?, true))
    }
}

pub struct ObjectManager {
    state: Mutex<ManagerState>,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::with_provider(Box::new(TransientObjectIdProvider::new()))
    }

    pub fn with_provider(ids: Box<dyn ObjectIdProvider>) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                registry: ObjectRegistry::new(),
                ids,
                locals: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().expect("object manager lock poisoned")
    }

    /// Object id for a referenced instance.
    ///
    /// Looks in the registry, then in other sessions' pending ids, then
    /// assigns a new one. New ids are offered to the session as lazy
    /// candidates; every id is offered as an eager candidate.
    pub fn ensure_object_id(
        &self,
        instance: &Instance,
        requestor: &dyn ObjectIdRequestor,
        session_id: u64,
    ) -> PersistenceResult<ObjectId> {
        let mut state = self.lock();
        let (oid, fresh) = state.resolve(instance, session_id)?;
        if fresh {
            requestor.register_lazy_optional(instance, oid)?;
        }
        requestor.register_eager_optional(instance, oid)?;
        Ok(oid)
    }

    /// Object id for an instance that must be stored (a store root).
    pub fn ensure_object_id_guaranteed_register(
        &self,
        instance: &Instance,
        requestor: &dyn ObjectIdRequestor,
        session_id: u64,
    ) -> PersistenceResult<ObjectId> {
        let mut state = self.lock();
        let (oid, _) = state.resolve(instance, session_id)?;
        requestor.register_guaranteed(instance, oid)?;
        Ok(oid)
    }

    pub fn lookup_object_id(&self, instance: &Instance) -> Option<ObjectId> {
        self.lock().registry.lookup_object_id(instance)
    }

    pub fn lookup_object(&self, oid: ObjectId) -> Option<Instance> {
        self.lock().registry.lookup_object(oid)
    }

    /// Register committed entries of a storer session.
    pub fn merge_entries(&self, entries: &[(ObjectId, Instance)]) -> PersistenceResult<()> {
        let mut state = self.lock();
        for (oid, instance) in entries {
            state.registry.register_object(*oid, instance)?;
            state.ids.ensure_above(*oid);
        }
        debug!(count = entries.len(), "merged storer entries");
        Ok(())
    }

    /// Announce a session's pending ids. Sessions that were dropped are
    /// forgotten here; unregistering explicitly is optional.
    pub fn register_local_registry(&self, local: &Arc<dyn LocalObjectRegistry>) {
        let mut state = self.lock();
        state.locals.retain(|_, weak| weak.strong_count() > 0);
        state.locals.insert(local.session_id(), Arc::downgrade(local));
    }

    pub fn unregister_local_registry(&self, session_id: u64) {
        self.lock().locals.remove(&session_id);
    }

    /// Keep future ids above what a storage already holds.
    pub fn ensure_object_id_above(&self, oid: ObjectId) {
        self.lock().ids.ensure_above(oid);
    }

    pub fn current_object_id(&self) -> ObjectId {
        self.lock().ids.current()
    }

    /// Prune dead registry entries.
    pub fn cleanup(&self) -> usize {
        let removed = self.lock().registry.cleanup();
        if removed > 0 {
            debug!(removed, "pruned dead registry entries");
        }
        removed
    }

    /// Hold the manager lock for a batch of registry operations.
    pub fn lock_registry(&self) -> RegistryGuard<'_> {
        RegistryGuard { state: self.lock() }
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the registry for the lifetime of the guard.
pub struct RegistryGuard<'a> {
    state: MutexGuard<'a, ManagerState>,
}

impl RegistryGuard<'_> {
    /// Register-or-get that also keeps the id provider above `oid`.
    pub fn optional_register(&mut self, oid: ObjectId, instance: &Instance) -> PersistenceResult<Instance> {
        let winner = self.state.registry.optional_register_object(oid, instance)?;
        self.state.ids.ensure_above(oid);
        Ok(winner)
    }

    pub fn register(&mut self, oid: ObjectId, instance: &Instance) -> PersistenceResult<()> {
        self.state.registry.register_object(oid, instance)?;
        self.state.ids.ensure_above(oid);
        Ok(())
    }
}

impl Deref for RegistryGuard<'_> {
    type Target = ObjectRegistry;

    fn deref(&self) -> &ObjectRegistry {
        &self.state.registry
    }
}

impl DerefMut for RegistryGuard<'_> {
    fn deref_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.state.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogp_types::object::OBJECT_ID_BASE;
    use ogp_types::{identity_of, same_instance};
    use std::sync::RwLock;

    #[derive(Default)]
    struct Recorder {
        calls: RwLock<Vec<(&'static str, ObjectId)>>,
    }

    impl ObjectIdRequestor for Recorder {
        fn register_guaranteed(&self, _: &Instance, oid: ObjectId) -> PersistenceResult<()> {
            self.calls.write().unwrap().push(("guaranteed", oid));
            Ok(())
        }

        fn register_lazy_optional(&self, _: &Instance, oid: ObjectId) -> PersistenceResult<()> {
            self.calls.write().unwrap().push(("lazy", oid));
            Ok(())
        }

        fn register_eager_optional(&self, _: &Instance, oid: ObjectId) -> PersistenceResult<()> {
            self.calls.write().unwrap().push(("eager", oid));
            Ok(())
        }
    }

    struct Pending {
        session: u64,
        entries: HashMap<usize, ObjectId>,
    }

    impl LocalObjectRegistry for Pending {
        fn session_id(&self) -> u64 {
            self.session
        }

        fn lookup_object_id(&self, instance: &Instance) -> Option<ObjectId> {
            self.entries.get(&identity_of(instance)).copied()
        }
    }

    #[test]
    fn new_instances_get_fresh_ids_offered_lazily_and_eagerly() {
        let manager = ObjectManager::new();
        let recorder = Recorder::default();
        let a: Instance = Arc::new(1i32);
        let oid = manager.ensure_object_id(&a, &recorder, 1).unwrap();
        assert_eq!(oid.value(), OBJECT_ID_BASE + 1);
        assert_eq!(*recorder.calls.read().unwrap(), vec![("lazy", oid), ("eager", oid)]);
    }

    #[test]
    fn registered_instances_keep_their_id() {
        let manager = ObjectManager::new();
        let a: Instance = Arc::new(1i32);
        manager.merge_entries(&[(ObjectId::new(OBJECT_ID_BASE + 50), Arc::clone(&a))]).unwrap();
        let recorder = Recorder::default();
        let oid = manager.ensure_object_id(&a, &recorder, 1).unwrap();
        assert_eq!(oid.value(), OBJECT_ID_BASE + 50);
        assert_eq!(*recorder.calls.read().unwrap(), vec![("eager", oid)]);
        // Merged ids push the provider forward.
        assert_eq!(manager.current_object_id().value(), OBJECT_ID_BASE + 50);
    }

    #[test]
    fn other_sessions_pending_ids_are_reused() {
        let manager = ObjectManager::new();
        let a: Instance = Arc::new(1i32);
        let pending: Arc<dyn LocalObjectRegistry> = Arc::new(Pending {
            session: 7,
            entries: HashMap::from([(identity_of(&a), ObjectId::new(OBJECT_ID_BASE + 9))]),
        });
        manager.register_local_registry(&pending);

        let recorder = Recorder::default();
        assert_eq!(manager.ensure_object_id(&a, &recorder, 8).unwrap().value(), OBJECT_ID_BASE + 9);
        // A session does not consult itself through the manager.
        assert_eq!(manager.ensure_object_id(&a, &recorder, 7).unwrap().value(), OBJECT_ID_BASE + 1);

        manager.unregister_local_registry(7);
        let b: Instance = Arc::new(2i32);
        assert!(manager.ensure_object_id(&b, &recorder, 8).is_ok());
    }

    #[test]
    fn guaranteed_register_always_calls_back() {
        let manager = ObjectManager::new();
        let a: Instance = Arc::new(1i32);
        manager.merge_entries(&[(ObjectId::new(OBJECT_ID_BASE + 3), Arc::clone(&a))]).unwrap();
        let recorder = Recorder::default();
        let oid = manager.ensure_object_id_guaranteed_register(&a, &recorder, 1).unwrap();
        assert_eq!(*recorder.calls.read().unwrap(), vec![("guaranteed", oid)]);
    }

    #[test]
    fn registry_guard_register_or_get() {
        let manager = ObjectManager::new();
        let a: Instance = Arc::new(1i32);
        let b: Instance = Arc::new(2i32);
        let oid = ObjectId::new(OBJECT_ID_BASE + 100);
        {
            let mut registry = manager.lock_registry();
            assert!(same_instance(&registry.optional_register(oid, &a).unwrap(), &a));
            assert!(same_instance(&registry.optional_register(oid, &b).unwrap(), &a));
            assert!(registry.lookup_object(oid).is_some());
        }
        assert_eq!(manager.current_object_id(), oid);
        assert_eq!(manager.lookup_object_id(&a), Some(oid));
    }
}
