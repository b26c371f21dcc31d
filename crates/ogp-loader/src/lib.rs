//! Loading object graphs from stored entities.
//!
//! # Key Types
//!
//! - [`Loader`] -- demand-driven batch loading: discover, create, update, complete
//! - [`BuildItems`] / [`BuildState`] -- per-batch items keyed by object id
//! - [`LoadItemsChain`] -- requested object ids, as one set or per channel
//! - [`LoaderConfig`] -- update-existing mode and channel grouping

pub mod config;
pub mod items;
pub mod loader;

pub use config::LoaderConfig;
pub use items::{BuildItem, BuildItems, BuildState, LoadItemsChain};
pub use loader::Loader;
