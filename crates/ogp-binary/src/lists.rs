//! Whole-entity layouts shared by value handlers.
//!
//! Store-side helpers append a complete entity to a [`ChunksBuffer`];
//! build-side helpers decode the matching shape from a [`Binary`]. Every
//! build helper validates list framing before allocating anything.

use std::collections::HashSet;

use ogp_types::layout::{self, KEY_VALUE_ENTRY_LENGTH, LIST_HEADER_LENGTH, REFERENCE_LENGTH};
use ogp_types::{ObjectId, PersistenceError, PersistenceResult, TypeId};

use crate::binary::Binary;
use crate::chunk::ChunksBuffer;
use crate::codec::{ByteCodec, Primitive};
use crate::traversal::ObjectIdAcceptor;

fn list_length(oid: ObjectId, count: usize, element_length: usize) -> PersistenceResult<usize> {
    layout::list_total_length(count as u64, element_length)
        .and_then(|total| usize::try_from(total).ok())
        .ok_or_else(|| PersistenceError::invalid_list(oid, 0, format!("{count} elements overflow")))
}

impl<C: ByteCodec> ChunksBuffer<C> {
    /// An entity whose content is one primitive.
    pub fn store_single_value<T: Primitive>(&mut self, tid: TypeId, oid: ObjectId, value: T) -> PersistenceResult<()> {
        self.store_entity_header(T::LENGTH, tid, oid)?.put(0, value)?;
        Ok(())
    }

    /// An entity without content.
    pub fn store_stateless(&mut self, tid: TypeId, oid: ObjectId) -> PersistenceResult<()> {
        self.store_entity_header(0, tid, oid)?;
        Ok(())
    }

    /// An entity whose content is one primitive list.
    pub fn store_primitives_list<T: Primitive>(
        &mut self,
        tid: TypeId,
        oid: ObjectId,
        values: &[T],
    ) -> PersistenceResult<()> {
        let length = list_length(oid, values.len(), T::LENGTH)?;
        self.store_entity_header(length, tid, oid)?.put_primitives(0, values)?;
        Ok(())
    }

    pub fn store_bytes(&mut self, tid: TypeId, oid: ObjectId, data: &[u8]) -> PersistenceResult<()> {
        let length = list_length(oid, data.len(), 1)?;
        self.store_entity_header(length, tid, oid)?.put_bytes(0, data)?;
        Ok(())
    }

    pub fn store_string_value(&mut self, tid: TypeId, oid: ObjectId, value: &str) -> PersistenceResult<()> {
        self.store_bytes(tid, oid, value.as_bytes())
    }

    /// An entity whose content is a list of character lists.
    pub fn store_strings_as_list<S: AsRef<str>>(
        &mut self,
        tid: TypeId,
        oid: ObjectId,
        strings: &[S],
    ) -> PersistenceResult<()> {
        let length = strings_list_length(oid, strings)?;
        let mut writer = self.store_entity_header(length, tid, oid)?;
        let mut offset = writer.put_list_header(0, length as u64, strings.len() as u64)?;
        for s in strings {
            offset = writer.put_string(offset, s.as_ref())?;
        }
        Ok(())
    }

    /// An entity whose content is one reference list.
    pub fn store_references(&mut self, tid: TypeId, oid: ObjectId, oids: &[ObjectId]) -> PersistenceResult<()> {
        let length = list_length(oid, oids.len(), REFERENCE_LENGTH)?;
        self.store_entity_header(length, tid, oid)?.put_references(0, oids)?;
        Ok(())
    }

    /// A reference list from an iterator announcing `count` elements.
    ///
    /// The iterator is drained (up to one element past `count`) before
    /// anything is written, so a disagreeing iterator leaves no entity behind.
    pub fn store_iterable_as_list(
        &mut self,
        tid: TypeId,
        oid: ObjectId,
        count: u64,
        elements: impl IntoIterator<Item = PersistenceResult<ObjectId>>,
    ) -> PersistenceResult<()> {
        let limit = usize::try_from(count).map_err(|_| PersistenceError::Capacity { requested: usize::MAX })?;
        let mut oids = Vec::new();
        for element in elements.into_iter().take(limit.saturating_add(1)) {
            oids.push(element?);
        }
        if oids.len() as u64 != count {
            return Err(PersistenceError::InconsistentElementCount {
                specified: count,
                iterated: oids.len() as u64,
            });
        }
        self.store_references(tid, oid, &oids)
    }

    /// A list of `(key, value)` reference pairs.
    pub fn store_key_values_as_entries(
        &mut self,
        tid: TypeId,
        oid: ObjectId,
        entries: &[(ObjectId, ObjectId)],
    ) -> PersistenceResult<()> {
        let length = list_length(oid, entries.len(), KEY_VALUE_ENTRY_LENGTH)?;
        let mut writer = self.store_entity_header(length, tid, oid)?;
        let mut offset = writer.put_list_header_for(0, entries.len() as u64, KEY_VALUE_ENTRY_LENGTH)?;
        for (key, value) in entries {
            offset = writer.put_reference(offset, *key)?;
            offset = writer.put_reference(offset, *value)?;
        }
        Ok(())
    }

    /// A `u64` capacity followed by a reference list of the occupied slots.
    pub fn store_sized_array(
        &mut self,
        tid: TypeId,
        oid: ObjectId,
        capacity: u64,
        elements: &[ObjectId],
    ) -> PersistenceResult<()> {
        if (elements.len() as u64) > capacity {
            return Err(PersistenceError::InconsistentElementCount {
                specified: capacity,
                iterated: elements.len() as u64,
            });
        }
        let length = 8 + list_length(oid, elements.len(), REFERENCE_LENGTH)?;
        let mut writer = self.store_entity_header(length, tid, oid)?;
        let offset = writer.put(0, capacity)?;
        writer.put_references(offset, elements)?;
        Ok(())
    }

    /// Root entries: a reference list followed by the identifier list, in
    /// matching order.
    pub fn store_roots(&mut self, tid: TypeId, oid: ObjectId, roots: &[(String, ObjectId)]) -> PersistenceResult<()> {
        let oids: Vec<ObjectId> = roots.iter().map(|(_, oid)| *oid).collect();
        let identifiers: Vec<&str> = roots.iter().map(|(id, _)| id.as_str()).collect();
        let references_length = list_length(oid, oids.len(), REFERENCE_LENGTH)?;
        let identifiers_length = strings_list_length(oid, &identifiers)?;
        let mut writer = self.store_entity_header(references_length + identifiers_length, tid, oid)?;
        let mut offset = writer.put_references(0, &oids)?;
        offset = writer.put_list_header(offset, identifiers_length as u64, identifiers.len() as u64)?;
        for identifier in identifiers {
            offset = writer.put_string(offset, identifier)?;
        }
        Ok(())
    }
}

fn strings_list_length<S: AsRef<str>>(oid: ObjectId, strings: &[S]) -> PersistenceResult<usize> {
    strings
        .iter()
        .try_fold(LIST_HEADER_LENGTH, |total, s| {
            total.checked_add(LIST_HEADER_LENGTH)?.checked_add(s.as_ref().len())
        })
        .ok_or_else(|| PersistenceError::invalid_list(oid, 0, "string list overflows".to_string()))
}

impl<C: ByteCodec> Binary<C> {
    /// Decode a list of character lists. Returns the strings and the offset
    /// following the outer list.
    pub fn build_strings(&self, offset: usize) -> PersistenceResult<(Vec<String>, usize)> {
        let total = self.validated_list_bound(offset)? as usize;
        let count = self.list_element_count(offset)?;
        let end = offset + total;
        // Every element takes at least a list header.
        if count as u128 * LIST_HEADER_LENGTH as u128 > (total - LIST_HEADER_LENGTH) as u128 {
            return Err(PersistenceError::invalid_list(
                self.object_id(),
                offset,
                format!("{count} strings cannot fit in {total} bytes"),
            ));
        }
        let mut strings = Vec::with_capacity(count as usize);
        let mut position = Self::list_elements_offset(offset);
        for _ in 0..count {
            let element_total = self.validated_list_bound(position)? as usize;
            if position + element_total > end {
                return Err(PersistenceError::invalid_list(
                    self.object_id(),
                    position,
                    "string exceeds the enclosing list".to_string(),
                ));
            }
            strings.push(self.build_string(position)?);
            position += element_total;
        }
        if position != end {
            return Err(PersistenceError::invalid_list(
                self.object_id(),
                offset,
                format!("strings cover {} of {total} bytes", position - offset),
            ));
        }
        Ok((strings, end))
    }

    /// Decode a key/value entry list at `offset`.
    pub fn build_key_values(&self, offset: usize) -> PersistenceResult<Vec<(ObjectId, ObjectId)>> {
        let count = self.validating_list_element_count(offset, KEY_VALUE_ENTRY_LENGTH)? as usize;
        let raw = self.slice(Self::list_elements_offset(offset), count * KEY_VALUE_ENTRY_LENGTH)?;
        Ok(raw
            .chunks_exact(KEY_VALUE_ENTRY_LENGTH)
            .map(|entry| {
                (
                    ObjectId::new(u64::decode::<C>(entry)),
                    ObjectId::new(u64::decode::<C>(&entry[REFERENCE_LENGTH..])),
                )
            })
            .collect())
    }

    /// Report every key and value reference of the entry list at `offset`.
    pub fn iterate_key_value_references(
        &self,
        offset: usize,
        acceptor: &mut dyn ObjectIdAcceptor,
    ) -> PersistenceResult<()> {
        for (key, value) in self.build_key_values(offset)? {
            acceptor.accept_object_id(key);
            acceptor.accept_object_id(value);
        }
        Ok(())
    }

    /// Decode a sized array: capacity and occupied element references.
    pub fn build_sized_array(&self) -> PersistenceResult<(u64, Vec<ObjectId>)> {
        let capacity = self.get::<u64>(0)?;
        let elements = self.build_references(8)?;
        if elements.len() as u64 > capacity {
            return Err(PersistenceError::InconsistentElementCount {
                specified: capacity,
                iterated: elements.len() as u64,
            });
        }
        Ok((capacity, elements))
    }

    /// Decode root entries written by [`ChunksBuffer::store_roots`].
    ///
    /// Identifiers and object ids must pair up one to one; a duplicate on
    /// either side is a consistency error.
    pub fn build_root_mapping(&self) -> PersistenceResult<Vec<(String, ObjectId)>> {
        let oids = self.build_references(0)?;
        let (identifiers, end) = self.build_strings(LIST_HEADER_LENGTH + oids.len() * REFERENCE_LENGTH)?;
        if end != self.content_length() {
            return Err(PersistenceError::InconsistentElementCount {
                specified: self.content_length() as u64,
                iterated: end as u64,
            });
        }
        if identifiers.len() != oids.len() {
            return Err(PersistenceError::InconsistentElementCount {
                specified: oids.len() as u64,
                iterated: identifiers.len() as u64,
            });
        }
        let mut seen_identifiers = HashSet::with_capacity(oids.len());
        let mut seen_oids = HashSet::with_capacity(oids.len());
        for (identifier, oid) in identifiers.iter().zip(&oids) {
            if !seen_identifiers.insert(identifier.as_str()) {
                return Err(PersistenceError::DuplicateRootIdentifier(identifier.clone()));
            }
            if !oid.is_null() && !seen_oids.insert(*oid) {
                return Err(PersistenceError::DuplicateRootObjectId(*oid));
            }
        }
        Ok(identifiers.into_iter().zip(oids).collect())
    }
}
