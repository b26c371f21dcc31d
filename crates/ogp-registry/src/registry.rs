//! Bidirectional ObjectId ↔ instance table.
//!
//! The registry never keeps instances alive: it holds weak handles and maps
//! allocation identities to object ids. An identity whose instance has died
//! may be reused by a new allocation, so every identity hit is confirmed
//! against the live instance before it is trusted.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ogp_types::{identity_of, same_instance, Instance, ObjectId, PersistenceError, PersistenceResult};

type WeakInstance = Weak<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ObjectRegistry {
    by_oid: HashMap<ObjectId, WeakInstance>,
    by_identity: HashMap<usize, ObjectId>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live instance registered under `oid`.
    pub fn lookup_object(&self, oid: ObjectId) -> Option<Instance> {
        self.by_oid.get(&oid).and_then(Weak::upgrade)
    }

    /// The object id of a live, registered instance.
    pub fn lookup_object_id(&self, instance: &Instance) -> Option<ObjectId> {
        let oid = *self.by_identity.get(&identity_of(instance))?;
        let registered = self.lookup_object(oid)?;
        same_instance(&registered, instance).then_some(oid)
    }

    pub fn contains(&self, oid: ObjectId) -> bool {
        self.lookup_object(oid).is_some()
    }

    /// Bind `oid` to `instance`.
    ///
    /// Re-registering the same pair is a no-op. Binding an id that already
    /// names another live instance, or an instance that already has another
    /// id, is a conflict.
    pub fn register_object(&mut self, oid: ObjectId, instance: &Instance) -> PersistenceResult<()> {
        if oid.is_null() {
            return Err(PersistenceError::ObjectIdConflict {
                oid,
                reason: "the null id cannot be registered",
            });
        }
        if let Some(existing) = self.lookup_object(oid) {
            if same_instance(&existing, instance) {
                return Ok(());
            }
            return Err(PersistenceError::ObjectIdConflict {
                oid,
                reason: "already bound to another instance",
            });
        }
        if let Some(other) = self.lookup_object_id(instance) {
            return Err(PersistenceError::ObjectIdConflict {
                oid: other,
                reason: "instance already registered under another id",
            });
        }
        self.by_oid.insert(oid, Arc::downgrade(instance));
        self.by_identity.insert(identity_of(instance), oid);
        Ok(())
    }

    /// Atomic register-or-get: the instance already bound to `oid` if there
    /// is a live one, otherwise `instance` after binding it.
    pub fn optional_register_object(&mut self, oid: ObjectId, instance: &Instance) -> PersistenceResult<Instance> {
        if let Some(existing) = self.lookup_object(oid) {
            return Ok(existing);
        }
        self.register_object(oid, instance)?;
        Ok(Arc::clone(instance))
    }

    pub fn remove(&mut self, oid: ObjectId) -> Option<Instance> {
        let weak = self.by_oid.remove(&oid)?;
        let identity = Weak::as_ptr(&weak) as *const () as usize;
        if self.by_identity.get(&identity) == Some(&oid) {
            self.by_identity.remove(&identity);
        }
        weak.upgrade()
    }

    /// Drop entries whose instance is gone. Returns how many were dropped.
    pub fn cleanup(&mut self) -> usize {
        let before = self.by_oid.len();
        self.by_oid.retain(|_, weak| weak.strong_count() > 0);
        let by_oid = &self.by_oid;
        self.by_identity.retain(|identity, oid| {
            by_oid
                .get(oid)
                .is_some_and(|weak| Weak::as_ptr(weak) as *const () as usize == *identity)
        });
        before - self.by_oid.len()
    }

    /// Number of entries, dead ones included until the next cleanup.
    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    /// Highest registered object id, live or not.
    pub fn highest_object_id(&self) -> Option<ObjectId> {
        self.by_oid.keys().max().copied()
    }
}
