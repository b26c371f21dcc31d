use std::collections::BTreeSet;

use bytes::Bytes;
use ogp_binary::ChannelChunk;
use ogp_types::{ObjectId, PersistenceResult};

/// A set of object ids requested from one channel.
pub type ObjectIdSet = BTreeSet<ObjectId>;

/// Where committed chunks go.
pub trait StorageTarget: Send + Sync {
    /// Persist completed channel chunks. Either every entity of the call
    /// becomes visible or, on error, none of them does.
    fn write(&self, chunks: &[ChannelChunk]) -> PersistenceResult<()>;

    /// Fails if the target currently refuses writes.
    fn validate_is_storing_enabled(&self) -> PersistenceResult<()> {
        Ok(())
    }
}

/// Where loaders read entities from.
pub trait StorageSource: Send + Sync {
    /// The initial read of a load: the latest roots entity, if any.
    fn read(&self) -> PersistenceResult<Vec<Bytes>>;

    /// The latest entity of every requested object id. Sets are grouped per
    /// channel by the caller; an unknown id is an error.
    fn read_by_object_ids(&self, oids: &[ObjectIdSet]) -> PersistenceResult<Vec<Bytes>>;

    /// Highest object id ever written, or null for an empty storage.
    fn highest_object_id(&self) -> PersistenceResult<ObjectId>;
}
