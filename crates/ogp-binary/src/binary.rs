//! Read view over one serialized entity.
//!
//! A [`Binary`] owns a cheap handle (`bytes::Bytes`) to exactly one entity,
//! header included. Offsets passed to its accessors are relative to the
//! content start unless a method name ends in `_at`, in which case they are
//! absolute within the entity. Every read is bounds-checked against the
//! entity length and reported as a layout violation, never a panic.
//!
//! # Invariants
//!
//! - The header's total length equals the number of bytes held.
//! - The total length is at least the header length.
//! - List reads reconcile element count × element length with the stored
//!   byte length before anything is allocated.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use ogp_types::layout::{
    self, ENTITY_HEADER_LENGTH, LIST_HEADER_LENGTH, OFFSET_ENTITY_LENGTH, OFFSET_ENTITY_OBJECT_ID,
    OFFSET_ENTITY_TYPE_ID, OFFSET_LIST_BYTE_LENGTH, OFFSET_LIST_ELEMENT_COUNT, REFERENCE_LENGTH,
};
use ogp_types::{ObjectId, PersistenceError, PersistenceResult, TypeId};

use crate::codec::{ByteCodec, Primitive};
use crate::traversal::{self, ObjectIdAcceptor, ReferenceTraverser};

/// Typed, bounds-checked view of one entity.
pub struct Binary<C: ByteCodec> {
    bytes: Bytes,
    _codec: PhantomData<C>,
}

impl<C: ByteCodec> Clone for Binary<C> {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            _codec: PhantomData,
        }
    }
}

impl<C: ByteCodec> Binary<C> {
    /// Wrap the bytes of exactly one entity, validating its header.
    pub fn from_entity(bytes: Bytes) -> PersistenceResult<Self> {
        if bytes.len() < ENTITY_HEADER_LENGTH {
            return Err(PersistenceError::InvalidEntityLength {
                offset: 0,
                length: bytes.len() as i64,
                reason: "shorter than an entity header",
            });
        }
        let stored = u64::decode::<C>(&bytes[OFFSET_ENTITY_LENGTH..]);
        if stored != bytes.len() as u64 {
            return Err(PersistenceError::InvalidEntityLength {
                offset: 0,
                length: stored as i64,
                reason: "header length differs from entity size",
            });
        }
        Ok(Self {
            bytes,
            _codec: PhantomData,
        })
    }

    // ------------------------------------------------------------------
    // Header
    // ------------------------------------------------------------------

    pub fn total_length(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn type_id(&self) -> TypeId {
        TypeId::new(u64::decode::<C>(&self.bytes[OFFSET_ENTITY_TYPE_ID..]))
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(u64::decode::<C>(&self.bytes[OFFSET_ENTITY_OBJECT_ID..]))
    }

    pub fn content_length(&self) -> usize {
        self.bytes.len() - ENTITY_HEADER_LENGTH
    }

    /// Content bytes, header excluded.
    pub fn content(&self) -> &[u8] {
        &self.bytes[ENTITY_HEADER_LENGTH..]
    }

    /// The whole entity, header included.
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    // ------------------------------------------------------------------
    // Bounds
    // ------------------------------------------------------------------

    /// Content bytes `offset..offset + length`, or a bounds violation.
    pub fn slice(&self, offset: usize, length: usize) -> PersistenceResult<&[u8]> {
        let content = self.content();
        match offset.checked_add(length) {
            Some(end) if end <= content.len() => Ok(&content[offset..end]),
            _ => Err(self.bounds_violation(offset, length)),
        }
    }

    fn bounds_violation(&self, offset: usize, required: usize) -> PersistenceError {
        PersistenceError::BoundsViolation {
            oid: self.object_id(),
            offset,
            required,
            bound: self.content_length(),
        }
    }

    /// Fail unless the content is exactly `expected` bytes long.
    pub fn validate_required_content_length(&self, expected: usize) -> PersistenceResult<()> {
        if self.content_length() != expected {
            return Err(PersistenceError::BoundsViolation {
                oid: self.object_id(),
                offset: 0,
                required: expected,
                bound: self.content_length(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    /// Read a primitive at a content offset.
    pub fn get<T: Primitive>(&self, offset: usize) -> PersistenceResult<T> {
        Ok(T::decode::<C>(self.slice(offset, T::LENGTH)?))
    }

    /// Read a primitive at an absolute entity offset.
    pub fn get_at<T: Primitive>(&self, address: usize) -> PersistenceResult<T> {
        match address.checked_add(T::LENGTH) {
            Some(end) if end <= self.bytes.len() => Ok(T::decode::<C>(&self.bytes[address..end])),
            _ => Err(PersistenceError::BoundsViolation {
                oid: self.object_id(),
                offset: address,
                required: T::LENGTH,
                bound: self.bytes.len(),
            }),
        }
    }

    pub fn get_bool(&self, offset: usize) -> PersistenceResult<bool> {
        self.get(offset)
    }

    pub fn get_i32(&self, offset: usize) -> PersistenceResult<i32> {
        self.get(offset)
    }

    pub fn get_i64(&self, offset: usize) -> PersistenceResult<i64> {
        self.get(offset)
    }

    pub fn get_f64(&self, offset: usize) -> PersistenceResult<f64> {
        self.get(offset)
    }

    /// Read a reference slot.
    pub fn get_reference(&self, offset: usize) -> PersistenceResult<ObjectId> {
        self.get::<u64>(offset).map(ObjectId::new)
    }

    // ------------------------------------------------------------------
    // Lists
    // ------------------------------------------------------------------

    /// Stored, header-inclusive byte length of the list at `offset`.
    pub fn list_total_byte_length(&self, offset: usize) -> PersistenceResult<u64> {
        self.get::<u64>(offset.saturating_add(OFFSET_LIST_BYTE_LENGTH))
    }

    /// Stored element count of the list at `offset`, unvalidated.
    pub fn list_element_count(&self, offset: usize) -> PersistenceResult<u64> {
        self.get::<u64>(offset.saturating_add(OFFSET_LIST_ELEMENT_COUNT))
    }

    /// Byte length of the list's elements, header excluded.
    pub fn list_content_length(&self, offset: usize) -> PersistenceResult<u64> {
        let total = self.list_total_byte_length(offset)?;
        layout::list_content_length(total).ok_or_else(|| {
            PersistenceError::invalid_list(self.object_id(), offset, format!("byte length {total} below header length"))
        })
    }

    /// Offset of the first element of the list at `offset`.
    pub const fn list_elements_offset(offset: usize) -> usize {
        offset + LIST_HEADER_LENGTH
    }

    /// Element count of the list at `offset`, validated against its stored
    /// byte length and the entity bound.
    ///
    /// This is the guard against array bombs: a forged element count can
    /// never pass unless `header + count * element_length` equals the stored
    /// length and that length fits in the entity.
    pub fn validating_list_element_count(&self, offset: usize, element_length: usize) -> PersistenceResult<u64> {
        let total = self.validated_list_bound(offset)?;
        let count = self.list_element_count(offset)?;
        match layout::list_total_length(count, element_length) {
            Some(expected) if expected == total => Ok(count),
            Some(expected) => Err(PersistenceError::invalid_list(
                self.object_id(),
                offset,
                format!(
                    "{count} elements of {element_length} bytes need {expected} bytes, list stores {total}"
                ),
            )),
            None => Err(PersistenceError::invalid_list(
                self.object_id(),
                offset,
                format!("element count {count} overflows the list length"),
            )),
        }
    }

    /// Stored byte length of the list at `offset`, checked to be at least a
    /// header and to stay within the entity.
    pub fn validated_list_bound(&self, offset: usize) -> PersistenceResult<u64> {
        let total = self.list_total_byte_length(offset)?;
        if total < LIST_HEADER_LENGTH as u64 {
            return Err(PersistenceError::invalid_list(
                self.object_id(),
                offset,
                format!("byte length {total} below header length"),
            ));
        }
        let available = (self.content_length() - offset.min(self.content_length())) as u64;
        if total > available {
            return Err(PersistenceError::invalid_list(
                self.object_id(),
                offset,
                format!("byte length {total} exceeds the {available} bytes left in the entity"),
            ));
        }
        Ok(total)
    }

    /// Decode a primitive list.
    pub fn build_primitives<T: Primitive>(&self, offset: usize) -> PersistenceResult<Vec<T>> {
        let count = self.validating_list_element_count(offset, T::LENGTH)?;
        let elements = self.slice(Self::list_elements_offset(offset), count as usize * T::LENGTH)?;
        Ok(elements.chunks_exact(T::LENGTH).map(T::decode::<C>).collect())
    }

    /// Decode a byte list.
    pub fn build_bytes(&self, offset: usize) -> PersistenceResult<Vec<u8>> {
        let count = self.validating_list_element_count(offset, 1)?;
        Ok(self.slice(Self::list_elements_offset(offset), count as usize)?.to_vec())
    }

    /// Decode a character list.
    pub fn build_string(&self, offset: usize) -> PersistenceResult<String> {
        let count = self.validating_list_element_count(offset, 1)?;
        let raw = self.slice(Self::list_elements_offset(offset), count as usize)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| PersistenceError::invalid_list(self.object_id(), offset, format!("invalid UTF-8: {e}")))
    }

    /// Decode a reference list.
    pub fn build_references(&self, offset: usize) -> PersistenceResult<Vec<ObjectId>> {
        let count = self.validating_list_element_count(offset, REFERENCE_LENGTH)?;
        let raw = self.slice(Self::list_elements_offset(offset), count as usize * REFERENCE_LENGTH)?;
        Ok(raw
            .chunks_exact(REFERENCE_LENGTH)
            .map(|slot| ObjectId::new(u64::decode::<C>(slot)))
            .collect())
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Apply a traversal program from the content start, calling `acceptor`
    /// once per reference slot. Returns the content offset after the last
    /// byte the program covered.
    pub fn iterate_references(
        &self,
        traversers: &[ReferenceTraverser],
        acceptor: &mut dyn ObjectIdAcceptor,
    ) -> PersistenceResult<usize> {
        let end = traversal::iterate_references::<C>(
            &self.bytes,
            ENTITY_HEADER_LENGTH,
            self.bytes.len(),
            self.object_id(),
            traversers,
            acceptor,
        )?;
        Ok(end - ENTITY_HEADER_LENGTH)
    }
}

impl<C: ByteCodec> fmt::Debug for Binary<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binary")
            .field("object_id", &self.object_id())
            .field("type_id", &self.type_id())
            .field("total_length", &self.total_length())
            .field("codec", &C::ORDER)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Direct, Reversed};
    use crate::writer::EntityBuffer;

    fn entity<C: ByteCodec>(content_length: usize, fill: impl FnOnce(&mut crate::writer::EntityWriter<'_, C>)) -> Binary<C> {
        let mut buffer = EntityBuffer::<C>::new(content_length, TypeId::new(7), ObjectId::new(42)).unwrap();
        fill(&mut buffer.writer());
        buffer.finish().unwrap()
    }

    // ---- header ----

    #[test]
    fn header_fields() {
        let b = entity::<Direct>(12, |_| {});
        assert_eq!(b.total_length(), 36);
        assert_eq!(b.content_length(), 12);
        assert_eq!(b.type_id(), TypeId::new(7));
        assert_eq!(b.object_id(), ObjectId::new(42));
    }

    #[test]
    fn from_entity_rejects_short_and_mismatched() {
        assert!(Binary::<Direct>::from_entity(Bytes::from_static(&[0u8; 10])).is_err());
        let mut raw = vec![0u8; 32];
        raw[..8].copy_from_slice(&40u64.to_ne_bytes());
        let err = Binary::<Direct>::from_entity(Bytes::from(raw)).unwrap_err();
        assert!(err.is_layout_violation());
    }

    #[test]
    fn reversed_header_is_swapped() {
        let b = entity::<Reversed>(0, |_| {});
        assert_eq!(&b.as_bytes()[..8], &24u64.swap_bytes().to_ne_bytes());
        assert_eq!(b.object_id(), ObjectId::new(42));
    }

    // ---- primitives ----

    #[test]
    fn reads_are_bounds_checked() {
        let b = entity::<Direct>(4, |w| {
            w.put(0, 99i32).unwrap();
        });
        assert_eq!(b.get_i32(0).unwrap(), 99);
        let err = b.get_i64(0).unwrap_err();
        assert!(matches!(err, PersistenceError::BoundsViolation { required: 8, bound: 4, .. }));
        assert!(b.get::<u8>(usize::MAX).is_err());
    }

    #[test]
    fn required_content_length() {
        let b = entity::<Direct>(8, |_| {});
        assert!(b.validate_required_content_length(8).is_ok());
        assert!(b.validate_required_content_length(12).is_err());
    }

    // ---- lists ----

    #[test]
    fn primitive_list_roundtrip() {
        let values = [1i64, -2, 3];
        let b = entity::<Reversed>(16 + 24, |w| {
            w.put_primitives(0, &values).unwrap();
        });
        assert_eq!(b.list_total_byte_length(0).unwrap(), 40);
        assert_eq!(b.list_content_length(0).unwrap(), 24);
        assert_eq!(b.validating_list_element_count(0, 8).unwrap(), 3);
        assert_eq!(b.build_primitives::<i64>(0).unwrap(), values);
    }

    #[test]
    fn string_list() {
        let b = entity::<Direct>(16 + 5, |w| {
            w.put_string(0, "hello").unwrap();
        });
        assert_eq!(b.build_string(0).unwrap(), "hello");
    }

    #[test]
    fn invalid_utf8_is_invalid_list() {
        let b = entity::<Direct>(16 + 2, |w| {
            w.put_bytes(0, &[0xff, 0xfe]).unwrap();
        });
        assert_eq!(b.build_bytes(0).unwrap(), vec![0xff, 0xfe]);
        let err = b.build_string(0).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidList { .. }));
    }

    #[test]
    fn mismatched_element_count_is_invalid_list() {
        let b = entity::<Direct>(32, |w| {
            w.put_list_header(0, 32, 3).unwrap();
        });
        let err = b.validating_list_element_count(0, 8).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidList { .. }));
    }

    #[test]
    fn array_bomb_is_rejected_without_allocation() {
        let b = entity::<Direct>(24, |w| {
            w.put_list_header(0, 24, 1 << 40).unwrap();
        });
        let err = b.build_primitives::<i64>(0).unwrap_err();
        assert!(err.is_layout_violation());
        let err = b.build_references(0).unwrap_err();
        assert!(err.is_layout_violation());
    }

    #[test]
    fn list_past_entity_bound_is_invalid() {
        let b = entity::<Direct>(24, |w| {
            w.put_list_header(0, 64, 6).unwrap();
        });
        let err = b.validating_list_element_count(0, 8).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidList { .. }));
    }

    #[test]
    fn list_below_header_length_is_invalid() {
        let b = entity::<Direct>(16, |w| {
            w.put_list_header(0, 8, 0).unwrap();
        });
        assert!(b.list_content_length(0).is_err());
        assert!(b.validated_list_bound(0).is_err());
    }
}
