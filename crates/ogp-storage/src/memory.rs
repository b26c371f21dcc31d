//! In-memory storage for tests and embedding.
//!
//! [`InMemoryStorage`] keeps the latest entity of every object id behind a
//! `RwLock`. Entities are kept as `Bytes` slices of the committed buffers,
//! so reads never copy.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use bytes::Bytes;
use ogp_binary::{iterate_entities, ByteCodec, ChannelChunk};
use ogp_types::{ObjectId, PersistenceError, PersistenceResult, TypeId};

use crate::traits::{ObjectIdSet, StorageSource, StorageTarget};

struct MemoryState {
    entities: HashMap<ObjectId, Bytes>,
    roots: Option<ObjectId>,
    highest: ObjectId,
    enabled: bool,
    writes: usize,
}

pub struct InMemoryStorage<C: ByteCodec> {
    state: RwLock<MemoryState>,
    _codec: PhantomData<C>,
}

impl<C: ByteCodec> InMemoryStorage<C> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                entities: HashMap::new(),
                roots: None,
                highest: ObjectId::NULL,
                enabled: true,
                writes: 0,
            }),
            _codec: PhantomData,
        }
    }

    pub fn set_storing_enabled(&self, enabled: bool) {
        self.state.write().expect("storage lock poisoned").enabled = enabled;
    }

    /// Number of distinct object ids held.
    pub fn entity_count(&self) -> usize {
        self.state.read().expect("storage lock poisoned").entities.len()
    }

    /// Number of successful `write` calls.
    pub fn write_count(&self) -> usize {
        self.state.read().expect("storage lock poisoned").writes
    }

    pub fn entity(&self, oid: ObjectId) -> Option<Bytes> {
        self.state.read().expect("storage lock poisoned").entities.get(&oid).cloned()
    }

    /// All held object ids, sorted.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let state = self.state.read().expect("storage lock poisoned");
        let mut ids: Vec<_> = state.entities.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl<C: ByteCodec> Default for InMemoryStorage<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ByteCodec> StorageTarget for InMemoryStorage<C> {
    fn write(&self, chunks: &[ChannelChunk]) -> PersistenceResult<()> {
        // Parse everything before touching the state.
        let mut parsed = Vec::new();
        for chunk in chunks {
            for buffer in &chunk.buffers {
                for entity in iterate_entities::<C>(buffer, false) {
                    let entity = entity?;
                    parsed.push((entity.object_id(), entity.type_id(), entity.into_bytes()));
                }
            }
        }
        let mut state = self.state.write().expect("storage lock poisoned");
        if !state.enabled {
            return Err(PersistenceError::StoringDisabled("in-memory storage is read-only".into()));
        }
        for (oid, tid, bytes) in parsed {
            if tid == TypeId::ROOTS {
                state.roots = Some(oid);
            }
            state.highest = state.highest.max(oid);
            state.entities.insert(oid, bytes);
        }
        state.writes += 1;
        Ok(())
    }

    fn validate_is_storing_enabled(&self) -> PersistenceResult<()> {
        if self.state.read().expect("storage lock poisoned").enabled {
            Ok(())
        } else {
            Err(PersistenceError::StoringDisabled("in-memory storage is read-only".into()))
        }
    }
}

impl<C: ByteCodec> StorageSource for InMemoryStorage<C> {
    fn read(&self) -> PersistenceResult<Vec<Bytes>> {
        let state = self.state.read().expect("storage lock poisoned");
        Ok(state
            .roots
            .and_then(|oid| state.entities.get(&oid).cloned())
            .into_iter()
            .collect())
    }

    fn read_by_object_ids(&self, oids: &[ObjectIdSet]) -> PersistenceResult<Vec<Bytes>> {
        let state = self.state.read().expect("storage lock poisoned");
        oids.iter()
            .flatten()
            .map(|oid| {
                state
                    .entities
                    .get(oid)
                    .cloned()
                    .ok_or(PersistenceError::ObjectNotFound(*oid))
            })
            .collect()
    }

    fn highest_object_id(&self) -> PersistenceResult<ObjectId> {
        Ok(self.state.read().expect("storage lock poisoned").highest)
    }
}
