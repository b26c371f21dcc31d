use crate::object::{ObjectId, TypeId};

/// Coarse classification of [`PersistenceError`] values.
///
/// None of the categories is retried inside the engine; retry policy belongs
/// to the surrounding orchestration layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or adversarial bytes: entity or list framing is broken.
    Layout,
    /// A type id or Rust type has no usable handler.
    TypeResolution,
    /// A handler, stream or registry contradicts itself.
    Consistency,
    /// Allocation or id space exhausted.
    Capacity,
    /// The storage collaborator failed or refused.
    Storage,
}

/// Errors from encoding, decoding, registry and storage operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    // ---- layout ----
    /// An entity length field is zero, below the header length, or overruns
    /// the buffer holding it.
    #[error("invalid entity length {length} at offset {offset}: {reason}")]
    InvalidEntityLength {
        offset: usize,
        length: i64,
        reason: &'static str,
    },

    /// A content length that cannot be written as a positive entity length.
    #[error("invalid content length {length} for object {oid} of type {tid}")]
    InvalidContentLength { oid: ObjectId, tid: TypeId, length: i128 },

    /// A list header contradicts its element layout or its entity bound.
    #[error("invalid list at offset {offset} in object {oid}: {reason}")]
    InvalidList {
        oid: ObjectId,
        offset: usize,
        reason: String,
    },

    /// A read or write would cross the entity bound.
    #[error("bounds violation in object {oid}: {required} bytes at offset {offset}, bound {bound}")]
    BoundsViolation {
        oid: ObjectId,
        offset: usize,
        required: usize,
        bound: usize,
    },

    /// A gap marker appeared in data that must be gap free.
    #[error("unexpected gap of {span} bytes at offset {offset}")]
    UnexpectedGap { offset: usize, span: u64 },

    // ---- type resolution ----
    /// No handler is registered for a type id read from a stream.
    #[error("no type handler for type id {tid} (object {oid})")]
    UnhandledTypeId { tid: TypeId, oid: ObjectId },

    /// No handler is registered for a Rust type being stored.
    #[error("no type handler registered for instances of {type_name}")]
    UnhandledType { type_name: String },

    /// A legacy layout that generic translation cannot handle.
    #[error("legacy type {tid} ({type_name}) requires a custom handler: {reason}")]
    UnsupportedLegacyType {
        tid: TypeId,
        type_name: String,
        reason: String,
    },

    // ---- consistency ----
    /// An instance does not have the Rust type its handler expects.
    #[error("object {oid}: expected an instance of {expected}, found {actual}")]
    TypeMismatch {
        oid: ObjectId,
        expected: String,
        actual: String,
    },

    /// An object id is already bound to a different instance, or an instance
    /// to a different object id.
    #[error("object id conflict for {oid}: {reason}")]
    ObjectIdConflict { oid: ObjectId, reason: &'static str },

    /// Two handlers claim the same type id or Rust type.
    #[error("type handler conflict for type id {tid}: {reason}")]
    HandlerConflict { tid: TypeId, reason: String },

    #[error("duplicate root identifier {0:?}")]
    DuplicateRootIdentifier(String),

    #[error("duplicate root object id {0}")]
    DuplicateRootObjectId(ObjectId),

    /// The number of elements written differs from the count announced in the
    /// list header.
    #[error("inconsistent element count: specified {specified} vs. iterated {iterated}")]
    InconsistentElementCount { specified: u64, iterated: u64 },

    /// A non-null reference that neither the load batch nor the registry can
    /// resolve.
    #[error("unresolved reference to object {oid}")]
    UnresolvedReference { oid: ObjectId },

    /// The storage collaborator has no entity for an object id.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A legacy enum ordinal whose constant no longer exists.
    #[error("enum {type_name}: constant with legacy ordinal {ordinal} was removed")]
    EnumConstantRemoved { type_name: String, ordinal: i32 },

    /// Writes to a chunk after it was completed.
    #[error("chunk already completed")]
    ChunkCompleted,

    /// Any other self-contradiction of a handler or stream.
    #[error("consistency violation: {0}")]
    Consistency(String),

    // ---- capacity ----
    #[error("failed to allocate {requested} bytes")]
    Capacity { requested: usize },

    #[error("object id range exhausted at {0}")]
    ObjectIdExhausted(ObjectId),

    // ---- storage ----
    #[error("storing is disabled: {0}")]
    StoringDisabled(String),

    #[error("storage configuration mismatch: {0}")]
    StorageConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PersistenceError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidEntityLength { .. }
            | Self::InvalidContentLength { .. }
            | Self::InvalidList { .. }
            | Self::BoundsViolation { .. }
            | Self::UnexpectedGap { .. } => ErrorCategory::Layout,
            Self::UnhandledTypeId { .. }
            | Self::UnhandledType { .. }
            | Self::UnsupportedLegacyType { .. } => ErrorCategory::TypeResolution,
            Self::TypeMismatch { .. }
            | Self::ObjectIdConflict { .. }
            | Self::HandlerConflict { .. }
            | Self::DuplicateRootIdentifier(_)
            | Self::DuplicateRootObjectId(_)
            | Self::InconsistentElementCount { .. }
            | Self::UnresolvedReference { .. }
            | Self::ObjectNotFound(_)
            | Self::EnumConstantRemoved { .. }
            | Self::ChunkCompleted
            | Self::Consistency(_) => ErrorCategory::Consistency,
            Self::Capacity { .. } | Self::ObjectIdExhausted(_) => ErrorCategory::Capacity,
            Self::StoringDisabled(_) | Self::StorageConfiguration(_) | Self::Io(_) => {
                ErrorCategory::Storage
            }
        }
    }

    /// Shorthand for an [`InvalidList`](Self::InvalidList) error.
    pub fn invalid_list(oid: ObjectId, offset: usize, reason: impl Into<String>) -> Self {
        Self::InvalidList {
            oid,
            offset,
            reason: reason.into(),
        }
    }

    /// Returns `true` for layout violations.
    pub fn is_layout_violation(&self) -> bool {
        self.category() == ErrorCategory::Layout
    }
}

/// Result alias for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
