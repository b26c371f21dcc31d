//! Storer sessions: turn an object graph into committed channel chunks.
//!
//! # Key Types
//!
//! - [`Storer`] -- one session: local identity index, chunk buffers, commit
//! - [`StoringPolicy`] -- lazy (new instances only) or eager (everything reachable)
//! - [`StorerConfig`] -- policy, channel count and buffer capacity

pub mod config;
pub mod storer;

pub use config::{StorerConfig, StoringPolicy};
pub use storer::Storer;
