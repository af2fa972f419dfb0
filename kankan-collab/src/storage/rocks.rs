//! RocksDB-backed board store.
//!
//! Column families:
//! - `snapshots`: compacted full board state (LZ4 compressed), keyed by board key
//! - `updates`: incremental updates (LZ4 compressed), keyed by `board key \0 seq`
//! - `metadata`: per-board bookkeeping (bincode) and the board directory (JSON)
//!
//! A board key is the storage namespace of one board, e.g. `kanban:board:<id>`.
//! Loading a board yields the snapshot (if any) followed by the logged
//! updates in append order.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use kankan_core::now_millis;

use crate::config::StoreConfig;

const CF_SNAPSHOTS: &str = "snapshots";
const CF_UPDATES: &str = "updates";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_SNAPSHOTS, CF_UPDATES, CF_METADATA];

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Per-board bookkeeping stored next to the update log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMetadata {
    /// Sequence number the next appended update receives
    pub next_seq: u64,
    /// Updates currently in the log
    pub update_count: u64,
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
    pub compressed_size: u64,
    /// Epoch millis
    pub created_at: i64,
    pub updated_at: i64,
}

impl BoardMetadata {
    fn new() -> Self {
        let now = now_millis();
        Self {
            next_seq: 0,
            update_count: 0,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

/// Durable store for board updates, snapshots and the board directory.
pub struct BoardStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes metadata read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl BoardStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened board store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Values are already LZ4 framed.
            CF_SNAPSHOTS | CF_UPDATES => {
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(if name == CF_UPDATES { 4 } else { 2 });
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }
        opts
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Board updates ────────────────────────────────────────────────

    /// Append one update to the board's log. Returns the board metadata
    /// after the append.
    pub fn append_update(
        &self,
        board_key: &str,
        update: &[u8],
    ) -> Result<BoardMetadata, StoreError> {
        let cf_updates = self.cf(CF_UPDATES)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let _guard = self.lock();
        let mut meta = self.load_metadata(board_key)?.unwrap_or_else(BoardMetadata::new);
        let key = Self::update_key(board_key, meta.next_seq);
        meta.next_seq += 1;
        meta.update_count += 1;
        meta.updated_at = now_millis();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_updates, &key, lz4_flex::compress_prepend_size(update));
        batch.put_cf(&cf_meta, Self::meta_key(board_key), meta.encode()?);
        self.write(batch)?;

        Ok(meta)
    }

    /// Everything stored for a board, in apply order: the snapshot first,
    /// then logged updates by sequence. Entries that fail to decompress are
    /// skipped so the rest of the board stays loadable.
    pub fn load_board(&self, board_key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut updates = Vec::new();
        if let Some(compressed) = self.db.get_cf(&self.cf(CF_SNAPSHOTS)?, board_key.as_bytes())? {
            match Self::decompress(&compressed) {
                Ok(snapshot) => updates.push(snapshot),
                Err(e) => log::warn!("Skipping unreadable snapshot of {board_key}: {e}"),
            }
        }
        for (seq, compressed) in self.scan_updates(board_key)? {
            match Self::decompress(&compressed) {
                Ok(update) => updates.push(update),
                Err(e) => log::warn!("Skipping unreadable update {seq} of {board_key}: {e}"),
            }
        }
        Ok(updates)
    }

    /// Replace the logged updates up to and including `up_to_seq` with
    /// `snapshot`. Returns the number of updates removed.
    pub fn compact(
        &self,
        board_key: &str,
        snapshot: &[u8],
        up_to_seq: u64,
    ) -> Result<u64, StoreError> {
        let cf_snapshots = self.cf(CF_SNAPSHOTS)?;
        let cf_updates = self.cf(CF_UPDATES)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(snapshot);
        let _guard = self.lock();
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snapshots, board_key.as_bytes(), &compressed);

        let mut removed = 0u64;
        for (seq, _) in self.scan_updates(board_key)? {
            if seq > up_to_seq {
                break;
            }
            batch.delete_cf(&cf_updates, Self::update_key(board_key, seq));
            removed += 1;
        }

        let mut meta = self.load_metadata(board_key)?.unwrap_or_else(BoardMetadata::new);
        meta.update_count = meta.update_count.saturating_sub(removed);
        meta.snapshot_size = snapshot.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_millis();
        batch.put_cf(&cf_meta, Self::meta_key(board_key), meta.encode()?);

        self.write(batch)?;
        log::debug!(
            "Compacted {removed} updates of {board_key} into a {} byte snapshot",
            snapshot.len()
        );
        Ok(removed)
    }

    /// Delete the snapshot, the update log and the metadata of a board.
    pub fn clear_board(&self, board_key: &str) -> Result<(), StoreError> {
        let cf_updates = self.cf(CF_UPDATES)?;

        let _guard = self.lock();
        let mut batch = WriteBatch::default();
        batch.delete_cf(&self.cf(CF_SNAPSHOTS)?, board_key.as_bytes());
        batch.delete_cf(&self.cf(CF_METADATA)?, Self::meta_key(board_key));
        for (seq, _) in self.scan_updates(board_key)? {
            batch.delete_cf(&cf_updates, Self::update_key(board_key, seq));
        }
        self.write(batch)?;
        Ok(())
    }

    pub fn board_exists(&self, board_key: &str) -> Result<bool, StoreError> {
        Ok(self.load_metadata(board_key)?.is_some())
    }

    pub fn load_metadata(&self, board_key: &str) -> Result<Option<BoardMetadata>, StoreError> {
        match self.db.get_cf(&self.cf(CF_METADATA)?, Self::meta_key(board_key))? {
            Some(bytes) => BoardMetadata::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    // ─── Board directory ──────────────────────────────────────────────

    pub fn load_directory(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.db.get_cf(&self.cf(CF_METADATA)?, key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn save_directory(&self, key: &str, json: &str) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .put_cf_opt(&self.cf(CF_METADATA)?, key.as_bytes(), json.as_bytes(), &write_opts)?;
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn decompress(bytes: &[u8]) -> Result<Vec<u8>, StoreError> {
        lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::Compression(e.to_string()))
    }

    /// `board key \0` prefix shared by every update of a board.
    fn update_prefix(board_key: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(board_key.len() + 1);
        prefix.extend_from_slice(board_key.as_bytes());
        prefix.push(0);
        prefix
    }

    /// Update key: board key, a NUL separator, then the sequence big-endian.
    fn update_key(board_key: &str, seq: u64) -> Vec<u8> {
        let mut key = Self::update_prefix(board_key);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    /// Metadata lives beside the directory record; the suffix keeps the two
    /// namespaces apart.
    fn meta_key(board_key: &str) -> Vec<u8> {
        let mut key = Self::update_prefix(board_key);
        key.extend_from_slice(b"meta");
        key
    }

    /// `(seq, compressed value)` of every logged update, in order.
    fn scan_updates(&self, board_key: &str) -> Result<Vec<(u64, Box<[u8]>)>, StoreError> {
        let cf = self.cf(CF_UPDATES)?;
        let prefix = Self::update_prefix(board_key);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Ok(seq_bytes) = <[u8; 8]>::try_from(&key[prefix.len()..]) else {
                log::warn!("Skipping malformed update key under {board_key}");
                continue;
            };
            entries.push((u64::from_be_bytes(seq_bytes), value));
        }
        Ok(entries)
    }
}
