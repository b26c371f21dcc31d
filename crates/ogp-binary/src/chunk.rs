//! Append-only entity sinks.
//!
//! A [`ChunksBuffer`] is a growable list of byte buffers that entities are
//! appended to back to back. Once completed it yields immutable [`Bytes`]
//! and refuses further writes. [`ChannelChunks`] fans entities out to one
//! buffer per channel by object id.

use std::marker::PhantomData;

use bytes::Bytes;
use ogp_types::layout::ENTITY_HEADER_LENGTH;
use ogp_types::{ObjectId, PersistenceError, PersistenceResult, TypeId};
use tracing::debug;

use crate::binary::Binary;
use crate::codec::ByteCodec;
use crate::writer::{checked_total_length, write_entity_header, EntityWriter};

/// Default size of a freshly allocated chunk buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Growable sequence of buffers holding serialized entities.
pub struct ChunksBuffer<C: ByteCodec> {
    buffers: Vec<Vec<u8>>,
    capacity: usize,
    completed: Option<Vec<Bytes>>,
    entity_count: usize,
    byte_count: u64,
    _codec: PhantomData<C>,
}

impl<C: ByteCodec> ChunksBuffer<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: vec![Vec::new()],
            capacity: capacity.max(ENTITY_HEADER_LENGTH),
            completed: None,
            entity_count: 0,
            byte_count: 0,
            _codec: PhantomData,
        }
    }

    /// Reserve space for one entity, write its header and hand out a writer
    /// over its zeroed content.
    ///
    /// If the current buffer cannot take the entity a new one of
    /// `max(capacity, total)` bytes is allocated. An empty current buffer is
    /// replaced in place instead of being left behind.
    pub fn store_entity_header(
        &mut self,
        content_length: usize,
        tid: TypeId,
        oid: ObjectId,
    ) -> PersistenceResult<EntityWriter<'_, C>> {
        if self.completed.is_some() {
            return Err(PersistenceError::ChunkCompleted);
        }
        let total = checked_total_length(content_length, tid, oid)?;
        let size = usize::try_from(total).map_err(|_| PersistenceError::Capacity { requested: usize::MAX })?;

        let fits = self
            .buffers
            .last()
            .is_some_and(|current| current.capacity() - current.len() >= size);
        if !fits {
            let allocation = self.capacity.max(size);
            let mut fresh = Vec::new();
            fresh
                .try_reserve_exact(allocation)
                .map_err(|_| PersistenceError::Capacity { requested: allocation })?;
            match self.buffers.last_mut() {
                Some(current) if current.is_empty() => *current = fresh,
                _ => self.buffers.push(fresh),
            }
            debug!(%oid, allocation, buffers = self.buffers.len(), "chunk buffer grown");
        }

        let buffer = self
            .buffers
            .last_mut()
            .ok_or_else(|| PersistenceError::Consistency("chunk has no buffer".into()))?;
        let start = buffer.len();
        buffer.resize(start + size, 0);
        let entity = &mut buffer[start..];
        write_entity_header::<C>(entity, total, tid, oid);
        self.entity_count += 1;
        self.byte_count += total;
        Ok(EntityWriter::new(&mut entity[ENTITY_HEADER_LENGTH..], oid))
    }

    /// Append an already serialized entity unchanged.
    pub fn store_binary(&mut self, data: &Binary<C>) -> PersistenceResult<()> {
        let mut writer = self.store_entity_header(data.content_length(), data.type_id(), data.object_id())?;
        writer.put_raw(0, data.content())?;
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Buffers allocated so far, the empty initial one included.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    /// Freeze the written buffers. Calling it again returns the same bytes.
    pub fn complete(&mut self) -> Vec<Bytes> {
        if let Some(done) = &self.completed {
            return done.clone();
        }
        let done: Vec<Bytes> = std::mem::take(&mut self.buffers)
            .into_iter()
            .filter(|b| !b.is_empty())
            .map(Bytes::from)
            .collect();
        self.completed = Some(done.clone());
        done
    }
}

/// The completed buffers of one channel.
#[derive(Clone, Debug)]
pub struct ChannelChunk {
    pub channel: usize,
    pub buffers: Vec<Bytes>,
}

impl ChannelChunk {
    pub fn byte_count(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }
}

/// One [`ChunksBuffer`] per channel; entities are routed by object id.
pub struct ChannelChunks<C: ByteCodec> {
    channels: Vec<ChunksBuffer<C>>,
}

impl<C: ByteCodec> ChannelChunks<C> {
    /// `channel_count` must be a power of two.
    pub fn new(channel_count: usize, buffer_capacity: usize) -> PersistenceResult<Self> {
        if !channel_count.is_power_of_two() {
            return Err(PersistenceError::StorageConfiguration(format!(
                "channel count {channel_count} is not a power of two"
            )));
        }
        Ok(Self {
            channels: (0..channel_count).map(|_| ChunksBuffer::new(buffer_capacity)).collect(),
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_index(&self, oid: ObjectId) -> usize {
        oid.channel_index(self.channels.len())
    }

    /// The buffer an entity with this object id belongs in.
    pub fn chunk_for(&mut self, oid: ObjectId) -> &mut ChunksBuffer<C> {
        let index = self.channel_index(oid);
        &mut self.channels[index]
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(ChunksBuffer::is_empty)
    }

    pub fn entity_count(&self) -> usize {
        self.channels.iter().map(ChunksBuffer::entity_count).sum()
    }

    pub fn byte_count(&self) -> u64 {
        self.channels.iter().map(ChunksBuffer::byte_count).sum()
    }

    /// Complete every channel. Channels without entities are omitted.
    pub fn complete(&mut self) -> Vec<ChannelChunk> {
        self.channels
            .iter_mut()
            .enumerate()
            .filter(|(_, chunk)| !chunk.is_empty())
            .map(|(channel, chunk)| ChannelChunk {
                channel,
                buffers: chunk.complete(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Direct, Reversed};
    use crate::entities::iterate_entities;

    #[test]
    fn first_entity_replaces_empty_buffer() {
        let mut chunk = ChunksBuffer::<Direct>::new(64);
        chunk.store_entity_header(8, TypeId::new(3), ObjectId::new(1)).unwrap();
        let done = chunk.complete();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].len(), 32);
    }

    #[test]
    fn entities_share_a_buffer_until_full() {
        let mut chunk = ChunksBuffer::<Direct>::new(64);
        for oid in 1..=3 {
            let mut w = chunk.store_entity_header(4, TypeId::new(3), ObjectId::new(oid)).unwrap();
            w.put(0, oid as i32).unwrap();
        }
        // 28 + 28 fit in 64, the third entity opens a second buffer.
        let done = chunk.complete();
        assert_eq!(done.iter().map(Bytes::len).collect::<Vec<_>>(), vec![56, 28]);
        assert_eq!(chunk.entity_count(), 3);
        assert_eq!(chunk.byte_count(), 84);
    }

    #[test]
    fn buffers_grow_only_when_full() {
        let mut chunk = ChunksBuffer::<Direct>::new(64);
        assert_eq!(chunk.buffer_count(), 1);
        chunk.store_entity_header(4, TypeId::new(3), ObjectId::new(1)).unwrap();
        chunk.store_entity_header(4, TypeId::new(3), ObjectId::new(2)).unwrap();
        assert_eq!(chunk.buffer_count(), 1);
        chunk.store_entity_header(4, TypeId::new(3), ObjectId::new(3)).unwrap();
        assert_eq!(chunk.buffer_count(), 2);
        chunk.store_entity_header(500, TypeId::new(3), ObjectId::new(4)).unwrap();
        assert_eq!(chunk.buffer_count(), 3);
    }

    #[test]
    fn oversized_entity_gets_its_own_buffer() {
        let mut chunk = ChunksBuffer::<Reversed>::new(32);
        chunk.store_entity_header(1000, TypeId::new(3), ObjectId::new(1)).unwrap();
        let done = chunk.complete();
        assert_eq!(done[0].len(), 1024);
        let read: Vec<_> = iterate_entities::<Reversed>(&done[0], false)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(read[0].content_length(), 1000);
    }

    #[test]
    fn complete_is_idempotent_and_final() {
        let mut chunk = ChunksBuffer::<Direct>::new(64);
        chunk.store_entity_header(0, TypeId::new(3), ObjectId::new(1)).unwrap();
        let first = chunk.complete();
        let second = chunk.complete();
        assert_eq!(first, second);
        assert!(chunk.is_completed());
        let err = chunk.store_entity_header(0, TypeId::new(3), ObjectId::new(2)).err().unwrap();
        assert!(matches!(err, PersistenceError::ChunkCompleted));
    }

    #[test]
    fn empty_chunk_completes_to_nothing() {
        let mut chunk = ChunksBuffer::<Direct>::new(64);
        assert!(chunk.complete().is_empty());
    }

    #[test]
    fn store_binary_copies_verbatim() {
        let mut source = ChunksBuffer::<Direct>::new(64);
        source
            .store_entity_header(4, TypeId::new(9), ObjectId::new(5))
            .unwrap()
            .put(0, 77i32)
            .unwrap();
        let bytes = source.complete().remove(0);
        let data = Binary::<Direct>::from_entity(bytes.clone()).unwrap();

        let mut target = ChunksBuffer::<Direct>::new(64);
        target.store_binary(&data).unwrap();
        assert_eq!(target.complete()[0], bytes);
    }

    #[test]
    fn channels_route_by_object_id() {
        let mut chunks = ChannelChunks::<Direct>::new(4, 256).unwrap();
        for oid in [4u64, 5, 9, 12] {
            chunks.chunk_for(ObjectId::new(oid)).store_entity_header(0, TypeId::new(3), ObjectId::new(oid)).unwrap();
        }
        let done = chunks.complete();
        let channels: Vec<_> = done.iter().map(|c| (c.channel, c.byte_count())).collect();
        // 4 and 12 land in channel 0, 5 and 9 in channel 1.
        assert_eq!(channels, vec![(0, 48), (1, 48)]);
        assert_eq!(chunks.entity_count(), 4);
    }

    #[test]
    fn channel_count_must_be_power_of_two() {
        assert!(ChannelChunks::<Direct>::new(3, 64).is_err());
        assert!(ChannelChunks::<Direct>::new(0, 64).is_err());
    }
}
