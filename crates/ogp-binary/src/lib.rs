//! Binary entity layout engine for object-graph persistence.
//!
//! Everything here operates on single entities or on buffers of entities;
//! identity, batching and storage live in the crates above.
//!
//! # Key Types
//!
//! - [`ByteCodec`] ([`Direct`], [`Reversed`]) -- byte order, chosen once per session
//! - [`Binary`] / [`EntityWriter`] -- bounds-checked read and write views of one entity
//! - [`ChunksBuffer`] / [`ChannelChunks`] -- append-only entity sinks, one per channel
//! - [`ReferenceTraverser`] -- compiled reference traversal programs
//! - [`TypeDescription`] / [`TypeDictionary`] -- persisted member layouts
//! - [`TypeHandler`] -- per-type store, create and initialize logic

pub mod analyzer;
pub mod binary;
pub mod builtin;
pub mod chunk;
pub mod codec;
pub mod dictionary;
pub mod entities;
pub mod generic;
pub mod handler;
pub mod lists;
pub mod member;
pub mod traversal;
pub mod writer;

pub use analyzer::{analyze, derive_reference_traversers};
pub use binary::Binary;
pub use builtin::{
    ByteArrayHandler, ObjectList, ObjectListHandler, ObjectMap, ObjectMapHandler, StringHandler, BYTES_TYPE_ID,
    OBJECT_LIST_TYPE_ID, OBJECT_MAP_TYPE_ID, STRING_TYPE_ID,
};
pub use chunk::{ChannelChunk, ChannelChunks, ChunksBuffer, DEFAULT_BUFFER_CAPACITY};
pub use codec::{ByteCodec, ByteOrder, Direct, Primitive, Reversed};
pub use dictionary::TypeDictionary;
pub use entities::{iterate_entities, Entities};
pub use generic::{GenericHandler, PersistentRecord};
pub use handler::{
    instance_of, MemberAccess, MemberValue, ObjectResolver, PrimitiveValue, ReferenceStorer, SharedTypeHandler,
    TypeHandler,
};
pub use member::{MemberKind, PrimitiveType, TypeDescription, TypeMember, ORDINAL_MEMBER};
pub use traversal::{calculate_simple_reference_count, ObjectIdAcceptor, ReferenceTraverser};
pub use writer::{EntityBuffer, EntityWriter};
