//! High-level API for object-graph persistence.
//!
//! [`Persistence`] wires an object manager, a handler registry and a storage
//! together from a [`PersistenceConfig`], keeps the [`PersistentRoots`] of the
//! storage and maps outdated type layouts found in its type dictionary.

pub mod config;
pub mod error;
pub mod persistence;
pub mod roots;

pub use config::{PersistenceConfig, StorageSection};
pub use error::{SdkError, SdkResult};
pub use persistence::{Persistence, TYPE_DICTIONARY_FILE};
pub use roots::{PersistentRoots, RootsHandler, ROOTS_TYPE_NAME};

// Re-export the types most applications touch.
pub use ogp_binary::{
    ByteOrder, Direct, GenericHandler, MemberValue, ObjectList, ObjectMap, PersistentRecord, PrimitiveType,
    PrimitiveValue, Reversed, TypeDescription, TypeMember,
};
pub use ogp_storer::StoringPolicy;
pub use ogp_types::{Instance, ObjectId, PersistenceError, TypeId};
