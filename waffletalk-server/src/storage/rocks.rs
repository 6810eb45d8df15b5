//! RocksDB-backed record store.
//!
//! Column families:
//! - one per record kind (`user`, `guild`, `guildchannel`, `guildmember`,
//!   `message`) — JSON property bags keyed by big-endian snowflake, so
//!   iteration order is creation order
//! - `credential` — username → bincode [`Credential`]
//! - `session`    — token → user snowflake

use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use rustc_hash::FxHashMap;
use waffletalk_core::{Properties, Snowflake};

use crate::domain::RecordKind;
use crate::error::StoreError;
use crate::storage::credential::Credential;
use crate::storage::journal::WriteOp;

const CF_CREDENTIAL: &str = "credential";
const CF_SESSION: &str = "session";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("waffletalk_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

pub struct RecordStore {
    /// Single-threaded mode; callers serialize through the world lock or
    /// the flush task.
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RecordStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let names = RecordKind::ALL
            .iter()
            .map(|k| k.namespace())
            .chain([CF_CREDENTIAL, CF_SESSION]);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = names
            .map(|name| ColumnFamilyDescriptor::new(name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::debug!("opened record store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Point lookups only, never scanned.
            CF_CREDENTIAL | CF_SESSION => {
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            // Messages dominate write volume.
            "message" => opts.set_max_write_buffer_number(4),
            _ => opts.set_max_write_buffer_number(2),
        }
        opts
    }

    // ─── Records ──────────────────────────────────────────────────────

    /// Write a new record immediately.
    pub fn insert(&self, kind: RecordKind, id: Snowflake, data: &Properties) -> Result<(), StoreError> {
        let cf = self.cf(kind.namespace())?;
        self.db
            .put_cf_opt(&cf, id.to_key(), encode(data)?, &self.write_options())?;
        Ok(())
    }

    pub fn load(&self, kind: RecordKind, id: Snowflake) -> Result<Option<Properties>, StoreError> {
        let cf = self.cf(kind.namespace())?;
        self.db
            .get_cf(&cf, id.to_key())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Every record of one kind, in creation order.
    pub fn scan(&self, kind: RecordKind) -> Result<Vec<(Snowflake, Properties)>, StoreError> {
        let cf = self.cf(kind.namespace())?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let id = Snowflake::from_key(&key).ok_or_else(|| {
                StoreError::Deserialization(format!("invalid {kind} key of {} bytes", key.len()))
            })?;
            rows.push((id, decode(&value)?));
        }
        Ok(rows)
    }

    /// Apply queued writes in one atomic batch. Returns the number of ops.
    ///
    /// Updates to the same record are folded in memory first, so the batch
    /// holds at most one write per record.
    pub fn apply(&self, ops: &[WriteOp]) -> Result<usize, StoreError> {
        if ops.is_empty() {
            return Ok(0);
        }
        let mut staged: FxHashMap<(RecordKind, Snowflake), Option<Properties>> =
            FxHashMap::default();
        for op in ops {
            match op {
                WriteOp::Update {
                    kind,
                    id,
                    property,
                    value,
                } => {
                    let slot = match staged.entry((*kind, *id)) {
                        Entry::Occupied(e) => e.into_mut(),
                        Entry::Vacant(e) => e.insert(self.load(*kind, *id)?),
                    };
                    match slot {
                        Some(data) => {
                            data.insert(property.clone(), value.clone());
                        }
                        None => log::warn!("dropping update of missing {kind} {id}"),
                    }
                }
                WriteOp::Delete { kind, id } => {
                    staged.insert((*kind, *id), None);
                }
            }
        }

        let mut batch = WriteBatch::default();
        for ((kind, id), data) in &staged {
            let cf = self.cf(kind.namespace())?;
            match data {
                Some(data) => batch.put_cf(&cf, id.to_key(), encode(data)?),
                None => batch.delete_cf(&cf, id.to_key()),
            }
        }
        self.db.write_opt(batch, &self.write_options())?;
        Ok(ops.len())
    }

    // ─── Credentials and sessions ─────────────────────────────────────

    pub fn put_credential(&self, username: &str, credential: &Credential) -> Result<(), StoreError> {
        let cf = self.cf(CF_CREDENTIAL)?;
        self.db
            .put_cf_opt(&cf, username.as_bytes(), credential.encode()?, &self.write_options())?;
        Ok(())
    }

    pub fn credential(&self, username: &str) -> Result<Option<Credential>, StoreError> {
        let cf = self.cf(CF_CREDENTIAL)?;
        self.db
            .get_cf(&cf, username.as_bytes())?
            .map(|bytes| Credential::decode(&bytes))
            .transpose()
    }

    pub fn put_session(&self, token: &str, user: Snowflake) -> Result<(), StoreError> {
        let cf = self.cf(CF_SESSION)?;
        self.db
            .put_cf_opt(&cf, token.as_bytes(), user.to_key(), &self.write_options())?;
        Ok(())
    }

    /// User a session token was issued to.
    pub fn session(&self, token: &str) -> Result<Option<Snowflake>, StoreError> {
        let cf = self.cf(CF_SESSION)?;
        Ok(self
            .db
            .get_cf(&cf, token.as_bytes())?
            .and_then(|bytes| Snowflake::from_key(&bytes)))
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family '{name}' not found")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }
}

fn encode(data: &Properties) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Properties, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
}
