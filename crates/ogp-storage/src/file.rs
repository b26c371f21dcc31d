//! Channel-file storage.
//!
//! A storage directory holds a `storage.toml` manifest and, per channel, an
//! append-only data file of entities (`channel_NNN.dat`) next to a
//! transaction log (`channel_NNN.tx`) of fixed-size CRC-framed records.
//! A data byte is committed once a write record covers it.
//!
//! On open every channel is recovered: a torn transaction record is cut off,
//! a final write whose bytes are missing or fail their CRC is dropped, and
//! uncommitted data past the last write is truncated. The committed data is
//! then scanned (gaps allowed) to rebuild the object id index.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use ogp_binary::{iterate_entities, ByteCodec, ChannelChunk, Primitive};
use ogp_types::layout::{LengthField, LENGTH_FIELD_LENGTH};
use ogp_types::{ObjectId, PersistenceError, PersistenceResult, TypeId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{FileStorageConfig, StorageManifest, SyncMode};
use crate::traits::{ObjectIdSet, StorageSource, StorageTarget};
use crate::tx::{RecordKind, TransactionRecord, RECORD_LENGTH};

/// Where the latest entity of an object lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Location {
    channel: usize,
    offset: u64,
    length: u64,
}

struct ChannelFile {
    data: File,
    tx: File,
    /// Committed data length.
    length: u64,
    tx_length: u64,
}

impl ChannelFile {
    fn open(directory: &Path, channel: usize) -> PersistenceResult<Self> {
        let open = |name: String| {
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(directory.join(name))
        };
        let mut file = Self {
            data: open(data_file_name(channel))?,
            tx: open(tx_file_name(channel))?,
            length: 0,
            tx_length: 0,
        };
        file.recover(channel)?;
        Ok(file)
    }

    fn recover(&mut self, channel: usize) -> PersistenceResult<()> {
        let tx_len = self.tx.metadata()?.len();
        let whole = tx_len - tx_len % RECORD_LENGTH as u64;
        if whole != tx_len {
            warn!(channel, tx_len, "truncating torn transaction record");
        }

        let mut raw = vec![0u8; whole as usize];
        self.tx.seek(SeekFrom::Start(0))?;
        self.tx.read_exact(&mut raw)?;

        let data_len = self.data.metadata()?.len();
        let mut records = Vec::with_capacity(raw.len() / RECORD_LENGTH);
        for (i, bytes) in raw.chunks_exact(RECORD_LENGTH).enumerate() {
            let mut record = [0u8; RECORD_LENGTH];
            record.copy_from_slice(bytes);
            match TransactionRecord::decode(&record) {
                Some(r) if r.end() <= data_len => records.push(r),
                Some(r) => {
                    warn!(channel, record = i, end = r.end(), data_len, "record past end of data, truncating log");
                    break;
                }
                None => {
                    warn!(channel, record = i, "unknown transaction record kind, truncating log");
                    break;
                }
            }
        }

        if let Some(last) = records.last().copied() {
            if last.kind == RecordKind::Write {
                let data = read_region(&mut self.data, last.offset, last.length)?;
                if crc32fast::hash(&data) != last.crc {
                    warn!(
                        channel,
                        offset = last.offset,
                        length = last.length,
                        "CRC mismatch on last write, dropping it"
                    );
                    records.pop();
                }
            }
        }

        self.tx_length = (records.len() * RECORD_LENGTH) as u64;
        if self.tx_length != tx_len {
            self.tx.set_len(self.tx_length)?;
        }

        self.length = records
            .iter()
            .filter(|r| r.kind == RecordKind::Write)
            .map(TransactionRecord::end)
            .max()
            .unwrap_or(0);
        if data_len > self.length {
            warn!(channel, data_len, committed = self.length, "truncating uncommitted data");
            self.data.set_len(self.length)?;
        }
        Ok(())
    }

    fn committed(&mut self) -> PersistenceResult<Bytes> {
        Ok(Bytes::from(read_region(&mut self.data, 0, self.length)?))
    }

    fn append_record(&mut self, record: TransactionRecord) -> io::Result<()> {
        self.tx.seek(SeekFrom::Start(self.tx_length))?;
        self.tx.write_all(&record.encode())?;
        self.tx_length += RECORD_LENGTH as u64;
        Ok(())
    }

    /// Append `bytes` and its write record; returns the data offset.
    fn append(&mut self, bytes: &[u8], sync: bool) -> io::Result<u64> {
        let offset = self.length;
        self.data.seek(SeekFrom::Start(offset))?;
        self.data.write_all(bytes)?;
        if sync {
            self.data.sync_data()?;
        }
        self.append_record(TransactionRecord::write(offset, bytes))?;
        if sync {
            self.tx.sync_data()?;
        }
        self.length += bytes.len() as u64;
        Ok(offset)
    }

    fn truncate_to(&mut self, length: u64, tx_length: u64) -> io::Result<()> {
        self.data.set_len(length)?;
        self.tx.set_len(tx_length)?;
        self.length = length;
        self.tx_length = tx_length;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.data.sync_data()?;
        self.tx.sync_data()
    }
}

fn read_region(file: &mut File, offset: u64, length: u64) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; length as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn data_file_name(channel: usize) -> String {
    format!("channel_{channel:03}.dat")
}

pub fn tx_file_name(channel: usize) -> String {
    format!("channel_{channel:03}.tx")
}

struct FileState {
    channels: Vec<ChannelFile>,
    index: HashMap<ObjectId, Location>,
    roots: Option<ObjectId>,
    highest: ObjectId,
    enabled: bool,
    last_sync: Instant,
}

impl FileState {
    fn track(&mut self, oid: ObjectId, tid: TypeId, location: Location) {
        if tid == TypeId::ROOTS {
            self.roots = Some(oid);
        }
        self.highest = self.highest.max(oid);
        self.index.insert(oid, location);
    }

    fn read_location(&mut self, location: Location) -> PersistenceResult<Bytes> {
        let file = &mut self.channels[location.channel].data;
        Ok(Bytes::from(read_region(file, location.offset, location.length)?))
    }
}

/// Summary of a storage directory's live content.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub channel_count: usize,
    pub live_entities: usize,
    pub live_bytes: u64,
    /// Committed bytes across all data files, superseded entities and gaps included.
    pub file_bytes: u64,
}

/// Durable storage over one directory of channel files.
pub struct FileStorage<C: ByteCodec> {
    directory: PathBuf,
    config: FileStorageConfig,
    state: Mutex<FileState>,
    _codec: PhantomData<C>,
}

impl<C: ByteCodec> FileStorage<C> {
    /// Open (or create) the storage in `directory`.
    pub fn open(directory: &Path, config: FileStorageConfig) -> PersistenceResult<Self> {
        config.validate()?;
        fs::create_dir_all(directory)?;

        let manifest = StorageManifest {
            channel_count: config.channel_count,
            byte_order: C::ORDER,
        };
        match StorageManifest::load(directory)? {
            Some(existing) => existing.ensure_matches(&manifest)?,
            None => manifest.save(directory)?,
        }

        let mut state = FileState {
            channels: Vec::with_capacity(config.channel_count),
            index: HashMap::new(),
            roots: None,
            highest: ObjectId::NULL,
            enabled: true,
            last_sync: Instant::now(),
        };
        for channel in 0..config.channel_count {
            let mut file = ChannelFile::open(directory, channel)?;
            let committed = file.committed()?;
            state.channels.push(file);

            let mut entities = iterate_entities::<C>(&committed, true);
            while let Some(entity) = entities.next() {
                let entity = entity?;
                let length = entity.total_length();
                let offset = entities.position() as u64 - length;
                state.track(entity.object_id(), entity.type_id(), Location { channel, offset, length });
            }
        }
        info!(
            directory = %directory.display(),
            channels = config.channel_count,
            objects = state.index.len(),
            "opened file storage"
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            config,
            state: Mutex::new(state),
            _codec: PhantomData,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &FileStorageConfig {
        &self.config
    }

    pub fn set_storing_enabled(&self, enabled: bool) {
        self.state.lock().expect("storage lock poisoned").enabled = enabled;
    }

    pub fn contains(&self, oid: ObjectId) -> bool {
        self.state.lock().expect("storage lock poisoned").index.contains_key(&oid)
    }

    /// All live object ids, sorted.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let state = self.state.lock().expect("storage lock poisoned");
        let mut ids: Vec<_> = state.index.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The committed bytes of one channel's data file, gaps included.
    pub fn channel_data(&self, channel: usize) -> PersistenceResult<Bytes> {
        let mut state = self.state.lock().expect("storage lock poisoned");
        let file = state.channels.get_mut(channel).ok_or_else(|| {
            PersistenceError::StorageConfiguration(format!("no channel {channel}"))
        })?;
        file.committed()
    }

    pub fn stats(&self) -> StorageStats {
        let state = self.state.lock().expect("storage lock poisoned");
        StorageStats {
            channel_count: state.channels.len(),
            live_entities: state.index.len(),
            live_bytes: state.index.values().map(|l| l.length).sum(),
            file_bytes: state.channels.iter().map(|c| c.length).sum(),
        }
    }

    /// Overwrite every committed version of `oid` with a gap marker, so that
    /// reopening cannot index a superseded one. Returns whether the object
    /// was present.
    pub fn erase(&self, oid: ObjectId) -> PersistenceResult<bool> {
        let mut state = self.state.lock().expect("storage lock poisoned");
        if !state.enabled {
            return Err(PersistenceError::StoringDisabled("file storage is read-only".into()));
        }
        let Some(latest) = state.index.get(&oid).copied() else {
            return Ok(false);
        };

        let file = &mut state.channels[latest.channel];
        let committed = file.committed()?;
        let mut versions = Vec::new();
        let mut entities = iterate_entities::<C>(&committed, true);
        while let Some(entity) = entities.next() {
            let entity = entity?;
            if entity.object_id() == oid {
                let length = entity.total_length();
                versions.push((entities.position() as u64 - length, length));
            }
        }

        for &(offset, length) in &versions {
            let marker = LengthField::gap_marker(length).ok_or(PersistenceError::Capacity {
                requested: length as usize,
            })?;
            let mut raw = [0u8; LENGTH_FIELD_LENGTH];
            marker.encode::<C>(&mut raw);
            file.data.seek(SeekFrom::Start(offset))?;
            file.data.write_all(&raw)?;
            file.append_record(TransactionRecord::erase(offset, length))?;
        }
        if self.config.sync_mode == SyncMode::EveryWrite {
            file.sync()?;
        }

        state.index.remove(&oid);
        if state.roots == Some(oid) {
            state.roots = None;
        }
        debug!(oid = oid.value(), versions = versions.len(), "erased entity");
        Ok(true)
    }

    fn maybe_sync(&self, state: &mut FileState, touched: &[usize]) -> io::Result<()> {
        let due = match self.config.sync_mode.interval() {
            Some(interval) => state.last_sync.elapsed() >= interval,
            None => false,
        };
        if due {
            for &channel in touched {
                state.channels[channel].sync()?;
            }
            state.last_sync = Instant::now();
        }
        Ok(())
    }
}

/// Entities of one buffer, relative to the buffer start.
struct ParsedBuffer<'a> {
    channel: usize,
    bytes: &'a Bytes,
    entities: Vec<(ObjectId, TypeId, u64, u64)>,
}

fn parse_chunks<C: ByteCodec>(chunks: &[ChannelChunk], channel_count: usize) -> PersistenceResult<Vec<ParsedBuffer<'_>>> {
    let mut parsed = Vec::new();
    for chunk in chunks {
        if chunk.channel >= channel_count {
            return Err(PersistenceError::StorageConfiguration(format!(
                "chunk for channel {} in a storage of {channel_count} channels",
                chunk.channel
            )));
        }
        for bytes in &chunk.buffers {
            let mut entities = Vec::new();
            let mut iter = iterate_entities::<C>(bytes, false);
            while let Some(entity) = iter.next() {
                let entity = entity?;
                let length = entity.total_length();
                let offset = iter.position() as u64 - length;
                entities.push((entity.object_id(), entity.type_id(), offset, length));
            }
            parsed.push(ParsedBuffer {
                channel: chunk.channel,
                bytes,
                entities,
            });
        }
    }
    Ok(parsed)
}

impl<C: ByteCodec> StorageTarget for FileStorage<C> {
    fn write(&self, chunks: &[ChannelChunk]) -> PersistenceResult<()> {
        let parsed = parse_chunks::<C>(chunks, self.config.channel_count)?;
        let mut state = self.state.lock().expect("storage lock poisoned");
        if !state.enabled {
            return Err(PersistenceError::StoringDisabled("file storage is read-only".into()));
        }

        let sync = self.config.sync_mode == SyncMode::EveryWrite;
        let before: Vec<(u64, u64)> = state.channels.iter().map(|c| (c.length, c.tx_length)).collect();
        let mut offsets = Vec::with_capacity(parsed.len());
        for buffer in &parsed {
            match state.channels[buffer.channel].append(buffer.bytes, sync) {
                Ok(offset) => offsets.push(offset),
                Err(e) => {
                    for (file, &(length, tx_length)) in state.channels.iter_mut().zip(&before) {
                        if let Err(rollback) = file.truncate_to(length, tx_length) {
                            warn!(error = %rollback, "rollback of partial write failed");
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        let mut touched: Vec<usize> = parsed.iter().map(|b| b.channel).collect();
        touched.dedup();
        let mut count = 0;
        for (buffer, base) in parsed.iter().zip(offsets) {
            for &(oid, tid, offset, length) in &buffer.entities {
                let location = Location {
                    channel: buffer.channel,
                    offset: base + offset,
                    length,
                };
                state.track(oid, tid, location);
                count += 1;
            }
        }
        self.maybe_sync(&mut state, &touched)?;
        debug!(entities = count, buffers = parsed.len(), "committed chunks");
        Ok(())
    }

    fn validate_is_storing_enabled(&self) -> PersistenceResult<()> {
        if self.state.lock().expect("storage lock poisoned").enabled {
            Ok(())
        } else {
            Err(PersistenceError::StoringDisabled("file storage is read-only".into()))
        }
    }
}

impl<C: ByteCodec> StorageSource for FileStorage<C> {
    fn read(&self) -> PersistenceResult<Vec<Bytes>> {
        let mut state = self.state.lock().expect("storage lock poisoned");
        let Some(location) = state.roots.and_then(|oid| state.index.get(&oid).copied()) else {
            return Ok(Vec::new());
        };
        Ok(vec![state.read_location(location)?])
    }

    fn read_by_object_ids(&self, oids: &[ObjectIdSet]) -> PersistenceResult<Vec<Bytes>> {
        let mut state = self.state.lock().expect("storage lock poisoned");
        let locations = oids
            .iter()
            .flatten()
            .map(|oid| state.index.get(oid).copied().ok_or(PersistenceError::ObjectNotFound(*oid)))
            .collect::<PersistenceResult<Vec<_>>>()?;
        locations.into_iter().map(|l| state.read_location(l)).collect()
    }

    fn highest_object_id(&self) -> PersistenceResult<ObjectId> {
        Ok(self.state.lock().expect("storage lock poisoned").highest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogp_binary::{Binary, ChannelChunks, Direct, Reversed};
    use ogp_types::TypeId;

    const VALUE_TYPE: TypeId = TypeId::new(5);

    fn config(channel_count: usize) -> FileStorageConfig {
        FileStorageConfig {
            channel_count,
            sync_mode: SyncMode::EveryWrite,
        }
    }

    fn chunks(channel_count: usize, entries: &[(u64, i64)]) -> Vec<ChannelChunk> {
        let mut chunks = ChannelChunks::<Direct>::new(channel_count, 128).unwrap();
        for &(oid, value) in entries {
            let oid = ObjectId::new(oid);
            chunks.chunk_for(oid).store_single_value(VALUE_TYPE, oid, value).unwrap();
        }
        chunks.complete()
    }

    fn value_of(storage: &FileStorage<Direct>, oid: u64) -> PersistenceResult<i64> {
        let read = storage.read_by_object_ids(&[ObjectIdSet::from([ObjectId::new(oid)])])?;
        Binary::<Direct>::from_entity(read[0].clone())?.get_i64(0)
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::<Direct>::open(dir.path(), config(2)).unwrap();
            storage.write(&chunks(2, &[(10, 1), (11, 2)])).unwrap();
            storage.write(&chunks(2, &[(10, 3)])).unwrap();
        }
        let storage = FileStorage::<Direct>::open(dir.path(), config(2)).unwrap();
        assert_eq!(value_of(&storage, 10).unwrap(), 3);
        assert_eq!(value_of(&storage, 11).unwrap(), 2);
        assert_eq!(storage.highest_object_id().unwrap(), ObjectId::new(11));
        let stats = storage.stats();
        assert_eq!(stats.live_entities, 2);
        assert_eq!(stats.file_bytes, 3 * 32);
        assert_eq!(stats.live_bytes, 2 * 32);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
            storage.write(&chunks(1, &[(10, 7)])).unwrap();
        }
        let data_path = dir.path().join(data_file_name(0));
        let tx_path = dir.path().join(tx_file_name(0));
        let mut data = OpenOptions::new().append(true).open(&data_path).unwrap();
        data.write_all(&[0xAB; 20]).unwrap();
        let mut tx = OpenOptions::new().append(true).open(&tx_path).unwrap();
        tx.write_all(&[1; 10]).unwrap();
        drop((data, tx));

        let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
        assert_eq!(value_of(&storage, 10).unwrap(), 7);
        assert_eq!(fs::metadata(&data_path).unwrap().len(), 32);
        assert_eq!(fs::metadata(&tx_path).unwrap().len(), RECORD_LENGTH as u64);
    }

    #[test]
    fn corrupt_last_write_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
            storage.write(&chunks(1, &[(10, 1)])).unwrap();
            storage.write(&chunks(1, &[(11, 2)])).unwrap();
        }
        let mut data = OpenOptions::new()
            .write(true)
            .open(dir.path().join(data_file_name(0)))
            .unwrap();
        data.seek(SeekFrom::Start(32 + 24)).unwrap();
        data.write_all(&[0xFF]).unwrap();
        drop(data);

        let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
        assert_eq!(value_of(&storage, 10).unwrap(), 1);
        assert!(matches!(value_of(&storage, 11), Err(PersistenceError::ObjectNotFound(_))));
        storage.write(&chunks(1, &[(11, 5)])).unwrap();
        assert_eq!(value_of(&storage, 11).unwrap(), 5);
    }

    #[test]
    fn erased_entity_becomes_a_gap() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
            storage.write(&chunks(1, &[(10, 1), (11, 2)])).unwrap();
            storage.write(&chunks(1, &[(10, 3)])).unwrap();
            assert!(storage.erase(ObjectId::new(10)).unwrap());
            assert!(!storage.erase(ObjectId::new(10)).unwrap());
        }
        let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
        assert!(!storage.contains(ObjectId::new(10)));
        assert_eq!(value_of(&storage, 11).unwrap(), 2);
        let committed = storage.channel_data(0).unwrap();
        let raw = u64::decode::<Direct>(&committed[..8]);
        assert_eq!(LengthField::classify(raw), LengthField::Gap(32));
    }

    #[test]
    fn roots_are_the_initial_read() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
        assert!(storage.read().unwrap().is_empty());
        let mut chunks = ChannelChunks::<Direct>::new(1, 128).unwrap();
        let roots = ObjectId::new(40);
        chunks.chunk_for(roots).store_stateless(TypeId::ROOTS, roots).unwrap();
        storage.write(&chunks.complete()).unwrap();
        let read = storage.read().unwrap();
        assert_eq!(Binary::<Direct>::from_entity(read[0].clone()).unwrap().object_id(), roots);
    }

    #[test]
    fn layout_mismatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        FileStorage::<Direct>::open(dir.path(), config(2)).unwrap();
        assert!(matches!(
            FileStorage::<Direct>::open(dir.path(), config(4)),
            Err(PersistenceError::StorageConfiguration(_))
        ));
        assert!(matches!(
            FileStorage::<Reversed>::open(dir.path(), config(2)),
            Err(PersistenceError::StorageConfiguration(_))
        ));
    }

    #[test]
    fn read_only_storage_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::<Direct>::open(dir.path(), config(1)).unwrap();
        storage.set_storing_enabled(false);
        assert!(storage.write(&chunks(1, &[(10, 1)])).is_err());
        assert!(storage.object_ids().is_empty());
    }
}
