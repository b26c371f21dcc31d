use std::fmt;

use serde::{Deserialize, Serialize};

/// First value of the object id range. The first id handed out is one above.
pub const OBJECT_ID_BASE: u64 = 1_000_000_000_000_000_000;
/// Exclusive upper bound of object ids; constant ids start here.
pub const CONSTANT_ID_BASE: u64 = 9_000_000_000_000_000_000;

/// Identifier of one logical instance.
///
/// Object ids are process-global: the object manager hands them out, and
/// storers and loaders only cache them. The value 0 is the null reference and
/// never resolves to an instance.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The null reference.
    pub const NULL: Self = Self(0);

    /// Wrap a raw id value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The null object id.
    pub const fn null() -> Self {
        Self::NULL
    }

    /// Returns `true` for the null reference.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Raw 64-bit value as written to reference slots.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Which id range this value falls into.
    pub fn range(&self) -> IdRange {
        IdRange::of(self.0)
    }

    /// Channel this object lands in for a power-of-two channel count.
    ///
    /// `channel_count` must be a power of two; the result is stable for a
    /// given count.
    pub const fn channel_index(&self, channel_count: usize) -> usize {
        (self.0 & (channel_count as u64 - 1)) as usize
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Identifier of a persisted type's binary shape.
///
/// A type may have several type ids over its lifetime: one current and any
/// number of legacy ones.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(u64);

impl TypeId {
    /// Reserved type id of the persistent roots entity.
    pub const ROOTS: Self = Self(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TypeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Partition of the 64-bit id space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdRange {
    /// The null reference.
    Null,
    /// Type ids, below [`OBJECT_ID_BASE`].
    Type,
    /// Object ids, `OBJECT_ID_BASE..CONSTANT_ID_BASE`.
    Object,
    /// Constant ids, at or above [`CONSTANT_ID_BASE`].
    Constant,
}

impl IdRange {
    pub const fn of(value: u64) -> Self {
        if value == 0 {
            Self::Null
        } else if value < OBJECT_ID_BASE {
            Self::Type
        } else if value < CONSTANT_ID_BASE {
            Self::Object
        } else {
            Self::Constant
        }
    }
}
