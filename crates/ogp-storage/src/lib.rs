//! Storage backends for object-graph persistence.
//!
//! A storer hands completed channel chunks to a [`StorageTarget`]; a loader
//! pulls entities by object id from a [`StorageSource`]. Two backends
//! implement both:
//!
//! - [`InMemoryStorage`] -- latest entity per object id, in memory
//! - [`FileStorage`] -- per-channel data files with a CRC-checked
//!   transaction log, recovered on open

pub mod config;
pub mod file;
pub mod memory;
pub mod traits;
mod tx;

pub use config::{FileStorageConfig, StorageManifest, SyncMode};
pub use file::{data_file_name, tx_file_name, FileStorage, StorageStats};
pub use memory::InMemoryStorage;
pub use traits::{ObjectIdSet, StorageSource, StorageTarget};
