//! Write side of the memory region abstraction.
//!
//! An [`EntityWriter`] borrows the content area of an entity whose header has
//! already been written, either inside a chunk buffer or inside a standalone
//! [`EntityBuffer`]. All `put_*` methods return the offset following what they
//! wrote so handlers can chain them.

use std::marker::PhantomData;

use bytes::Bytes;
use ogp_types::layout::{
    self, ENTITY_HEADER_LENGTH, LIST_HEADER_LENGTH, OFFSET_ENTITY_LENGTH, OFFSET_ENTITY_OBJECT_ID,
    OFFSET_ENTITY_TYPE_ID, OFFSET_LIST_BYTE_LENGTH, OFFSET_LIST_ELEMENT_COUNT, REFERENCE_LENGTH,
};
use ogp_types::{ObjectId, PersistenceError, PersistenceResult, TypeId};

use crate::binary::Binary;
use crate::codec::{ByteCodec, Primitive};

/// Write an entity header into the first 24 bytes of `out`.
pub(crate) fn write_entity_header<C: ByteCodec>(out: &mut [u8], total_length: u64, tid: TypeId, oid: ObjectId) {
    total_length.encode::<C>(&mut out[OFFSET_ENTITY_LENGTH..]);
    tid.value().encode::<C>(&mut out[OFFSET_ENTITY_TYPE_ID..]);
    oid.value().encode::<C>(&mut out[OFFSET_ENTITY_OBJECT_ID..]);
}

/// Total length for a content length, or a layout violation naming the entity.
pub(crate) fn checked_total_length(content_length: usize, tid: TypeId, oid: ObjectId) -> PersistenceResult<u64> {
    layout::entity_total_length(content_length).ok_or(PersistenceError::InvalidContentLength {
        oid,
        tid,
        length: content_length as i128,
    })
}

/// Mutable, bounds-checked view of an entity's content.
pub struct EntityWriter<'a, C: ByteCodec> {
    content: &'a mut [u8],
    oid: ObjectId,
    _codec: PhantomData<C>,
}

impl<'a, C: ByteCodec> EntityWriter<'a, C> {
    pub(crate) fn new(content: &'a mut [u8], oid: ObjectId) -> Self {
        Self {
            content,
            oid,
            _codec: PhantomData,
        }
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    pub fn object_id(&self) -> ObjectId {
        self.oid
    }

    fn slice_mut(&mut self, offset: usize, length: usize) -> PersistenceResult<&mut [u8]> {
        let bound = self.content.len();
        match offset.checked_add(length) {
            Some(end) if end <= bound => Ok(&mut self.content[offset..end]),
            _ => Err(PersistenceError::BoundsViolation {
                oid: self.oid,
                offset,
                required: length,
                bound,
            }),
        }
    }

    /// Write a primitive.
    pub fn put<T: Primitive>(&mut self, offset: usize, value: T) -> PersistenceResult<usize> {
        value.encode::<C>(self.slice_mut(offset, T::LENGTH)?);
        Ok(offset + T::LENGTH)
    }

    /// Write a reference slot.
    pub fn put_reference(&mut self, offset: usize, oid: ObjectId) -> PersistenceResult<usize> {
        self.put(offset, oid.value())
    }

    /// Write a list header. Returns the offset of the first element.
    pub fn put_list_header(&mut self, offset: usize, total_byte_length: u64, count: u64) -> PersistenceResult<usize> {
        let header = self.slice_mut(offset, LIST_HEADER_LENGTH)?;
        total_byte_length.encode::<C>(&mut header[OFFSET_LIST_BYTE_LENGTH..]);
        count.encode::<C>(&mut header[OFFSET_LIST_ELEMENT_COUNT..]);
        Ok(offset + LIST_HEADER_LENGTH)
    }

    /// Header for `count` elements of `element_length` bytes, length computed.
    pub fn put_list_header_for(&mut self, offset: usize, count: u64, element_length: usize) -> PersistenceResult<usize> {
        let total = layout::list_total_length(count, element_length)
            .ok_or_else(|| PersistenceError::invalid_list(self.oid, offset, format!("{count} elements overflow")))?;
        self.put_list_header(offset, total, count)
    }

    /// Write a complete primitive list. Returns the offset after the list.
    pub fn put_primitives<T: Primitive>(&mut self, offset: usize, values: &[T]) -> PersistenceResult<usize> {
        let start = self.put_list_header_for(offset, values.len() as u64, T::LENGTH)?;
        let elements = self.slice_mut(start, values.len() * T::LENGTH)?;
        for (slot, value) in elements.chunks_exact_mut(T::LENGTH).zip(values) {
            value.encode::<C>(slot);
        }
        Ok(start + values.len() * T::LENGTH)
    }

    /// Write a byte list.
    pub fn put_bytes(&mut self, offset: usize, data: &[u8]) -> PersistenceResult<usize> {
        let start = self.put_list_header_for(offset, data.len() as u64, 1)?;
        self.slice_mut(start, data.len())?.copy_from_slice(data);
        Ok(start + data.len())
    }

    /// Write a character list (UTF-8).
    pub fn put_string(&mut self, offset: usize, value: &str) -> PersistenceResult<usize> {
        self.put_bytes(offset, value.as_bytes())
    }

    /// Write a reference list.
    pub fn put_references(&mut self, offset: usize, oids: &[ObjectId]) -> PersistenceResult<usize> {
        let start = self.put_list_header_for(offset, oids.len() as u64, REFERENCE_LENGTH)?;
        let elements = self.slice_mut(start, oids.len() * REFERENCE_LENGTH)?;
        for (slot, oid) in elements.chunks_exact_mut(REFERENCE_LENGTH).zip(oids) {
            oid.value().encode::<C>(slot);
        }
        Ok(start + oids.len() * REFERENCE_LENGTH)
    }

    /// Copy raw, already encoded bytes.
    pub fn put_raw(&mut self, offset: usize, raw: &[u8]) -> PersistenceResult<usize> {
        self.slice_mut(offset, raw.len())?.copy_from_slice(raw);
        Ok(offset + raw.len())
    }
}

/// A standalone entity allocated outside any chunk.
///
/// Used wherever a single entity has to be materialized on its own, for
/// example when a legacy entity is rerouted into the current layout.
pub struct EntityBuffer<C: ByteCodec> {
    bytes: Vec<u8>,
    oid: ObjectId,
    _codec: PhantomData<C>,
}

impl<C: ByteCodec> EntityBuffer<C> {
    /// Allocate a zeroed entity and write its header.
    pub fn new(content_length: usize, tid: TypeId, oid: ObjectId) -> PersistenceResult<Self> {
        let total = checked_total_length(content_length, tid, oid)?;
        let size = total as usize;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| PersistenceError::Capacity { requested: size })?;
        bytes.resize(size, 0);
        write_entity_header::<C>(&mut bytes, total, tid, oid);
        Ok(Self {
            bytes,
            oid,
            _codec: PhantomData,
        })
    }

    pub fn writer(&mut self) -> EntityWriter<'_, C> {
        EntityWriter::new(&mut self.bytes[ENTITY_HEADER_LENGTH..], self.oid)
    }

    /// Freeze into a read view.
    pub fn finish(self) -> PersistenceResult<Binary<C>> {
        Binary::from_entity(Bytes::from(self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Direct, Reversed};

    #[test]
    fn puts_chain_offsets() {
        let mut buffer = EntityBuffer::<Direct>::new(4 + 8 + 2, TypeId::new(3), ObjectId::new(9)).unwrap();
        let mut w = buffer.writer();
        let next = w.put(0, 99i32).unwrap();
        assert_eq!(next, 4);
        let next = w.put_reference(next, ObjectId::new(43)).unwrap();
        assert_eq!(next, 12);
        assert_eq!(w.put(next, 7u16).unwrap(), 14);
        let b = buffer.finish().unwrap();
        assert_eq!(b.get_i32(0).unwrap(), 99);
        assert_eq!(b.get_reference(4).unwrap(), ObjectId::new(43));
        assert_eq!(b.get::<u16>(12).unwrap(), 7);
    }

    #[test]
    fn writes_are_bounds_checked() {
        let mut buffer = EntityBuffer::<Direct>::new(4, TypeId::new(3), ObjectId::new(9)).unwrap();
        let mut w = buffer.writer();
        let err = w.put(0, 1i64).unwrap_err();
        assert!(matches!(err, PersistenceError::BoundsViolation { required: 8, bound: 4, .. }));
        assert!(w.put_bytes(0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn reference_list_in_reversed_order() {
        let oids = [ObjectId::new(5), ObjectId::NULL, ObjectId::new(1 << 40)];
        let mut buffer = EntityBuffer::<Reversed>::new(16 + 24, TypeId::new(3), ObjectId::new(9)).unwrap();
        assert_eq!(buffer.writer().put_references(0, &oids).unwrap(), 40);
        let b = buffer.finish().unwrap();
        assert_eq!(b.build_references(0).unwrap(), oids);
    }

    #[test]
    fn oversized_content_is_rejected() {
        let err = EntityBuffer::<Direct>::new(usize::MAX, TypeId::new(3), ObjectId::new(9))
            .err()
            .unwrap();
        assert!(matches!(err, PersistenceError::InvalidContentLength { .. }));
    }
}
