//! Foundation types for binary object-graph persistence (OGP).
//!
//! This crate provides the identifiers, wire layout arithmetic and error
//! taxonomy shared by every other OGP crate. It has no behavior beyond layout
//! math and classification.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- 64-bit identifier of one logical instance (0 = null)
//! - [`TypeId`] -- 64-bit identifier of a persisted type's binary shape
//! - [`Instance`] -- shared, type-erased handle to a persistable instance
//! - [`layout`] -- entity header, list header and reference slot arithmetic
//! - [`PersistenceError`] -- layout, type resolution, consistency, capacity and
//!   storage failures, classified by [`ErrorCategory`]

pub mod error;
pub mod instance;
pub mod layout;
pub mod object;

pub use error::{ErrorCategory, PersistenceError, PersistenceResult};
pub use instance::{downcast, identity_of, same_instance, type_name_of, Instance};
pub use object::{IdRange, ObjectId, TypeId};
