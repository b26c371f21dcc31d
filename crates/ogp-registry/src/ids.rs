//! Object id assignment.

use ogp_types::object::{CONSTANT_ID_BASE, OBJECT_ID_BASE};
use ogp_types::{ObjectId, PersistenceError, PersistenceResult};

/// Source of fresh object ids.
pub trait ObjectIdProvider: Send {
    /// The highest id handed out or observed so far.
    fn current(&self) -> ObjectId;

    fn provide_next(&mut self) -> PersistenceResult<ObjectId>;

    /// Make sure future ids are above `oid`, e.g. after reading storage.
    fn ensure_above(&mut self, oid: ObjectId);
}

/// In-memory counter over the object id range.
#[derive(Debug)]
pub struct TransientObjectIdProvider {
    current: u64,
}

impl TransientObjectIdProvider {
    pub fn new() -> Self {
        Self::starting_at(OBJECT_ID_BASE)
    }

    /// The first id provided will be `start + 1`.
    pub fn starting_at(start: u64) -> Self {
        Self { current: start }
    }
}

impl Default for TransientObjectIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectIdProvider for TransientObjectIdProvider {
    fn current(&self) -> ObjectId {
        ObjectId::new(self.current)
    }

    fn provide_next(&mut self) -> PersistenceResult<ObjectId> {
        let next = self.current + 1;
        if next >= CONSTANT_ID_BASE {
            return Err(PersistenceError::ObjectIdExhausted(ObjectId::new(next)));
        }
        self.current = next;
        Ok(ObjectId::new(next))
    }

    fn ensure_above(&mut self, oid: ObjectId) {
        let value = oid.value();
        if value > self.current && value < CONSTANT_ID_BASE {
            self.current = value;
        }
    }
}
