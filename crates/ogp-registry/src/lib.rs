//! Identity services for object-graph persistence.
//!
//! # Key Types
//!
//! - [`ObjectRegistry`] -- weak, bidirectional ObjectId ↔ instance table
//! - [`ObjectIdProvider`] / [`TransientObjectIdProvider`] -- id assignment
//! - [`ObjectManager`] -- one lock around registry, ids and pending sessions
//! - [`TypeHandlerRegistry`] -- handler lookup by type id and Rust type

pub mod handlers;
pub mod ids;
pub mod manager;
pub mod registry;

pub use handlers::{shared, TypeHandlerRegistry};
pub use ids::{ObjectIdProvider, TransientObjectIdProvider};
pub use manager::{LocalObjectRegistry, ObjectIdRequestor, ObjectManager, RegistryGuard};
pub use registry::ObjectRegistry;
