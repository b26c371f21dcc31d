//! Reference traversal programs.
//!
//! A program is a short list of [`ReferenceTraverser`] steps compiled from a
//! type's members (see [`crate::analyzer`]). Applying it to an entity locates
//! every reference slot in declaration order without knowing anything else
//! about the type. The same program serves both byte orders because the
//! codec is a type parameter of [`iterate_references`].

use ogp_types::layout::{LIST_HEADER_LENGTH, OFFSET_LIST_ELEMENT_COUNT, REFERENCE_LENGTH};
use ogp_types::{ObjectId, PersistenceError, PersistenceResult};

use crate::codec::{ByteCodec, Primitive};

/// Receives object ids discovered by a traversal.
pub trait ObjectIdAcceptor {
    fn accept_object_id(&mut self, oid: ObjectId);
}

impl<F: FnMut(ObjectId)> ObjectIdAcceptor for F {
    fn accept_object_id(&mut self, oid: ObjectId) {
        self(oid)
    }
}

/// One immutable step of a traversal program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceTraverser {
    /// Skip a run of constant-length bytes without references.
    Skip(usize),
    /// Read a run of consecutive reference slots.
    References(usize),
    /// Skip a list without references, whatever its length.
    SkipVariableLength,
    /// A list whose elements are nothing but the given number of reference
    /// slots each; its stored byte length bounds the range.
    VariableLengthReferenceRange(usize),
    /// A list of composite elements; the nested program is applied to every
    /// element in turn.
    InlinedComplex(Vec<ReferenceTraverser>),
}

impl ReferenceTraverser {
    /// Bytes this step covers regardless of the data, 0 for list steps.
    pub fn covered_constant_byte_count(&self) -> usize {
        match self {
            Self::Skip(n) => *n,
            Self::References(k) => k * REFERENCE_LENGTH,
            _ => 0,
        }
    }

    pub fn has_references(&self) -> bool {
        match self {
            Self::Skip(_) | Self::SkipVariableLength => false,
            Self::References(k) => *k > 0,
            Self::VariableLengthReferenceRange(k) => *k > 0,
            Self::InlinedComplex(steps) => steps.iter().any(Self::has_references),
        }
    }

    pub fn is_variable_length(&self) -> bool {
        matches!(
            self,
            Self::SkipVariableLength | Self::VariableLengthReferenceRange(_) | Self::InlinedComplex(_)
        )
    }

    /// Smallest number of bytes this step can consume.
    pub fn minimum_length(&self) -> usize {
        if self.is_variable_length() {
            LIST_HEADER_LENGTH
        } else {
            self.covered_constant_byte_count()
        }
    }

    fn apply<C: ByteCodec>(&self, cursor: &mut Cursor<'_>, acceptor: &mut dyn ObjectIdAcceptor) -> PersistenceResult<()> {
        match self {
            Self::Skip(n) => {
                cursor.advance(*n)?;
            }
            Self::References(k) => {
                let slots = cursor.take(k * REFERENCE_LENGTH)?;
                for slot in slots.chunks_exact(REFERENCE_LENGTH) {
                    acceptor.accept_object_id(ObjectId::new(u64::decode::<C>(slot)));
                }
            }
            Self::SkipVariableLength => {
                let total = cursor.list_bound::<C>()?;
                cursor.advance(total)?;
            }
            Self::VariableLengthReferenceRange(per_element) => {
                let list_offset = cursor.position;
                let total = cursor.list_bound::<C>()?;
                let count = cursor.element_count::<C>()?;
                let element_length = (per_element * REFERENCE_LENGTH) as u128;
                if (count as u128) * element_length + LIST_HEADER_LENGTH as u128 != total as u128 {
                    return Err(PersistenceError::invalid_list(
                        cursor.oid,
                        list_offset,
                        format!("{count} elements of {element_length} bytes do not fill {total} bytes"),
                    ));
                }
                let list = cursor.take(total)?;
                for slot in list[LIST_HEADER_LENGTH..].chunks_exact(REFERENCE_LENGTH) {
                    acceptor.accept_object_id(ObjectId::new(u64::decode::<C>(slot)));
                }
            }
            Self::InlinedComplex(steps) => {
                let list_offset = cursor.position;
                let total = cursor.list_bound::<C>()?;
                let count = cursor.element_count::<C>()?;
                let element_minimum: usize = steps.iter().map(Self::minimum_length).sum();
                let content = total - LIST_HEADER_LENGTH;
                // Rejects absurd counts before iterating.
                if (count as u128) * (element_minimum as u128) > content as u128 {
                    return Err(PersistenceError::invalid_list(
                        cursor.oid,
                        list_offset,
                        format!("{count} elements of at least {element_minimum} bytes exceed {content} bytes"),
                    ));
                }
                let end = list_offset + total;
                let mut inner = Cursor {
                    bytes: cursor.bytes,
                    position: list_offset + LIST_HEADER_LENGTH,
                    bound: end,
                    oid: cursor.oid,
                };
                if element_minimum > 0 {
                    for _ in 0..count {
                        for step in steps {
                            step.apply::<C>(&mut inner, acceptor)?;
                        }
                    }
                }
                if inner.position != end {
                    return Err(PersistenceError::invalid_list(
                        cursor.oid,
                        list_offset,
                        format!(
                            "elements consumed {} of {} content bytes",
                            inner.position - list_offset - LIST_HEADER_LENGTH,
                            content
                        ),
                    ));
                }
                cursor.position = end;
            }
        }
        Ok(())
    }
}

/// Position within an entity plus the bound no step may cross.
struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
    bound: usize,
    oid: ObjectId,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, length: usize) -> PersistenceResult<&'a [u8]> {
        let start = self.position;
        match start.checked_add(length) {
            Some(end) if end <= self.bound => {
                self.position = end;
                Ok(&self.bytes[start..end])
            }
            _ => Err(PersistenceError::BoundsViolation {
                oid: self.oid,
                offset: start,
                required: length,
                bound: self.bound,
            }),
        }
    }

    fn advance(&mut self, length: usize) -> PersistenceResult<()> {
        self.take(length).map(|_| ())
    }

    /// Stored byte length of the list at the cursor, validated to hold a
    /// header and to stay within the bound. Does not move the cursor.
    fn list_bound<C: ByteCodec>(&self) -> PersistenceResult<usize> {
        let header = self.peek(LIST_HEADER_LENGTH)?;
        let total = u64::decode::<C>(header);
        let available = (self.bound - self.position) as u64;
        if total < LIST_HEADER_LENGTH as u64 || total > available {
            return Err(PersistenceError::invalid_list(
                self.oid,
                self.position,
                format!("byte length {total} outside {LIST_HEADER_LENGTH}..={available}"),
            ));
        }
        Ok(total as usize)
    }

    fn element_count<C: ByteCodec>(&self) -> PersistenceResult<u64> {
        let header = self.peek(LIST_HEADER_LENGTH)?;
        Ok(u64::decode::<C>(&header[OFFSET_LIST_ELEMENT_COUNT..]))
    }

    fn peek(&self, length: usize) -> PersistenceResult<&'a [u8]> {
        match self.position.checked_add(length) {
            Some(end) if end <= self.bound => Ok(&self.bytes[self.position..end]),
            _ => Err(PersistenceError::BoundsViolation {
                oid: self.oid,
                offset: self.position,
                required: length,
                bound: self.bound,
            }),
        }
    }
}

/// Apply `steps` to `bytes[start..bound]`, feeding every reference slot to
/// `acceptor`. Returns the absolute position after the last covered byte.
pub fn iterate_references<C: ByteCodec>(
    bytes: &[u8],
    start: usize,
    bound: usize,
    oid: ObjectId,
    steps: &[ReferenceTraverser],
    acceptor: &mut dyn ObjectIdAcceptor,
) -> PersistenceResult<usize> {
    let mut cursor = Cursor {
        bytes,
        position: start,
        bound: bound.min(bytes.len()),
        oid,
    };
    for step in steps {
        step.apply::<C>(&mut cursor, acceptor)?;
    }
    Ok(cursor.position)
}

/// Total constant bytes covered by a program.
pub fn covered_constant_byte_count(steps: &[ReferenceTraverser]) -> usize {
    steps.iter().map(ReferenceTraverser::covered_constant_byte_count).sum()
}

pub fn has_references(steps: &[ReferenceTraverser]) -> bool {
    steps.iter().any(ReferenceTraverser::has_references)
}

/// Number of references of a program without variable-length steps, or
/// `None` if the count depends on the data.
pub fn calculate_simple_reference_count(steps: &[ReferenceTraverser]) -> Option<usize> {
    steps.iter().try_fold(0, |count, step| match step {
        ReferenceTraverser::Skip(_) => Some(count),
        ReferenceTraverser::References(k) => Some(count + k),
        _ => None,
    })
}

/// Drop trailing steps without references. Only valid for a type's top-level
/// program: nested programs must consume their exact length.
pub fn crop_to_references(mut steps: Vec<ReferenceTraverser>) -> Vec<ReferenceTraverser> {
    while steps.last().is_some_and(|step| !step.has_references()) {
        steps.pop();
    }
    steps
}
