//! Splitting byte buffers into entities.

use std::marker::PhantomData;

use bytes::Bytes;
use ogp_types::layout::{LengthField, ENTITY_HEADER_LENGTH, LENGTH_FIELD_LENGTH};
use ogp_types::{PersistenceError, PersistenceResult};

use crate::binary::Binary;
use crate::codec::{ByteCodec, Primitive};

/// Iterate the entities stored back to back in `buffer`.
///
/// Gap markers (negative length fields) are skipped when `allow_gaps` is set
/// and reported as [`PersistenceError::UnexpectedGap`] otherwise. The iterator
/// stops after the first error.
pub fn iterate_entities<C: ByteCodec>(buffer: &Bytes, allow_gaps: bool) -> Entities<C> {
    Entities {
        buffer: buffer.clone(),
        position: 0,
        allow_gaps,
        failed: false,
        _codec: PhantomData,
    }
}

/// Iterator returned by [`iterate_entities`].
pub struct Entities<C: ByteCodec> {
    buffer: Bytes,
    position: usize,
    allow_gaps: bool,
    failed: bool,
    _codec: PhantomData<C>,
}

impl<C: ByteCodec> Entities<C> {
    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.position
    }

    fn invalid(&self, length: i64, reason: &'static str) -> PersistenceError {
        PersistenceError::InvalidEntityLength {
            offset: self.position,
            length,
            reason,
        }
    }

    fn next_entity(&mut self) -> PersistenceResult<Option<Binary<C>>> {
        loop {
            let remaining = self.buffer.len() - self.position;
            if remaining == 0 {
                return Ok(None);
            }
            if remaining < LENGTH_FIELD_LENGTH {
                return Err(self.invalid(remaining as i64, "truncated length field"));
            }
            let raw = u64::decode::<C>(&self.buffer[self.position..]);
            match LengthField::classify(raw) {
                LengthField::Invalid => return Err(self.invalid(0, "zero length")),
                LengthField::Gap(span) => {
                    if span < LENGTH_FIELD_LENGTH as u64 || span > remaining as u64 {
                        return Err(self.invalid(raw as i64, "gap span out of range"));
                    }
                    if !self.allow_gaps {
                        return Err(PersistenceError::UnexpectedGap {
                            offset: self.position,
                            span,
                        });
                    }
                    self.position += span as usize;
                }
                LengthField::Entity(length) => {
                    if length < ENTITY_HEADER_LENGTH as u64 {
                        return Err(self.invalid(length as i64, "shorter than an entity header"));
                    }
                    if length > remaining as u64 {
                        return Err(self.invalid(length as i64, "overruns the buffer"));
                    }
                    let end = self.position + length as usize;
                    let entity = Binary::from_entity(self.buffer.slice(self.position..end))?;
                    self.position = end;
                    return Ok(Some(entity));
                }
            }
        }
    }
}

impl<C: ByteCodec> Iterator for Entities<C> {
    type Item = PersistenceResult<Binary<C>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entity() {
            Ok(entity) => entity.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<C: ByteCodec> std::iter::FusedIterator for Entities<C> {}
