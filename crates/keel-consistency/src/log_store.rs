// RocksDB-based log and stable storage for Raft
// One store serves as both the append-only log and the engine's metadata store

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rocksdb::{BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, DB, Options};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;

// Column family names
const CF_LOGS: &str = "logs";
const CF_STABLE: &str = "stable";

// RocksDB performance tuning constants
/// Write buffer size: 64MB for better write throughput
const WRITE_BUFFER_SIZE: usize = 64 * 1024 * 1024;
/// Maximum number of write buffers for write stall prevention
const MAX_WRITE_BUFFER_NUMBER: i32 = 3;
/// Block cache size: 64MB, log reads are mostly of recent entries
const BLOCK_CACHE_SIZE: usize = 64 * 1024 * 1024;
/// Bloom filter bits per key for faster lookups
const BLOOM_FILTER_BITS_PER_KEY: f64 = 10.0;

/// Kind of a replicated log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    /// Application command handed to the state machine
    Command,
    /// Entry written by a new leader to commit its term
    Noop,
    /// Membership change adding a peer
    AddPeer,
    /// Membership change removing a peer
    RemovePeer,
    /// Barrier used to wait for all preceding entries to apply
    Barrier,
}

/// A single Raft log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: LogKind,
    pub data: Vec<u8>,
}

/// Append-only replicated log
pub trait LogStore: Send + Sync {
    /// Index of the first entry, 0 when empty
    fn first_index(&self) -> Result<u64, StoreError>;

    /// Index of the last entry, 0 when empty
    fn last_index(&self) -> Result<u64, StoreError>;

    fn get_log(&self, index: u64) -> Result<Option<LogEntry>, StoreError>;

    fn store_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.store_logs(std::slice::from_ref(entry))
    }

    fn store_logs(&self, entries: &[LogEntry]) -> Result<(), StoreError>;

    /// Delete entries in `min..=max`
    fn delete_range(&self, min: u64, max: u64) -> Result<(), StoreError>;
}

/// Durable key/value store for engine metadata (current term, vote, ...)
pub trait StableStore: Send + Sync {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn set_u64(&self, key: &[u8], value: u64) -> Result<(), StoreError>;

    /// Read a value written by `set_u64`, 0 when missing
    fn get_u64(&self, key: &[u8]) -> Result<u64, StoreError>;
}

/// RocksDB-based log store for Raft
pub struct RocksLogStore {
    db: DB,
    /// Cached first log index, 0 when the log is empty
    first_index: AtomicU64,
    /// Cached last log index, 0 when the log is empty
    last_index: AtomicU64,
}

impl RocksLogStore {
    /// Open (or create) a RocksDB log store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(WRITE_BUFFER_SIZE);
        db_opts.set_max_write_buffer_number(MAX_WRITE_BUFFER_NUMBER);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut block_opts = BlockBasedOptions::default();
        let cache = rocksdb::Cache::new_lru_cache(BLOCK_CACHE_SIZE);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(BLOOM_FILTER_BITS_PER_KEY, false);

        let mut cf_opts = Options::default();
        cf_opts.set_write_buffer_size(WRITE_BUFFER_SIZE);
        cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        cf_opts.set_block_based_table_factory(&block_opts);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_LOGS, cf_opts.clone()),
            ColumnFamilyDescriptor::new(CF_STABLE, cf_opts),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cfs)?;

        let store = Self {
            db,
            first_index: AtomicU64::new(0),
            last_index: AtomicU64::new(0),
        };
        store.load_bounds()?;

        info!(
            first_index = store.first_index.load(Ordering::Acquire),
            last_index = store.last_index.load(Ordering::Acquire),
            "RocksDB log store initialized"
        );
        Ok(store)
    }

    /// Column family handles are created in `open`; a missing one is a bug
    fn cf_logs(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_LOGS)
            .expect("CF_LOGS must exist - database may be corrupted")
    }

    fn cf_stable(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_STABLE)
            .expect("CF_STABLE must exist - database may be corrupted")
    }

    /// Encode log index to bytes (big-endian for proper ordering)
    fn encode_log_index(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn decode_log_index(bytes: &[u8]) -> Result<u64, StoreError> {
        let mut cursor = std::io::Cursor::new(bytes);
        Ok(cursor.read_u64::<BigEndian>()?)
    }

    /// Recompute the cached first/last index from disk
    fn load_bounds(&self) -> Result<(), StoreError> {
        let mut iter = self.db.raw_iterator_cf(self.cf_logs());

        iter.seek_to_first();
        let first = match iter.key() {
            Some(key) if iter.valid() => Self::decode_log_index(key)?,
            _ => 0,
        };

        iter.seek_to_last();
        let last = match iter.key() {
            Some(key) if iter.valid() => Self::decode_log_index(key)?,
            _ => 0,
        };
        iter.status()?;

        self.first_index.store(first, Ordering::Release);
        self.last_index.store(last, Ordering::Release);
        Ok(())
    }
}

impl LogStore for RocksLogStore {
    fn first_index(&self) -> Result<u64, StoreError> {
        Ok(self.first_index.load(Ordering::Acquire))
    }

    fn last_index(&self) -> Result<u64, StoreError> {
        Ok(self.last_index.load(Ordering::Acquire))
    }

    fn get_log(&self, index: u64) -> Result<Option<LogEntry>, StoreError> {
        match self
            .db
            .get_cf(self.cf_logs(), Self::encode_log_index(index))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_logs(&self, entries: &[LogEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut batch = rocksdb::WriteBatch::default();
        for entry in entries {
            let value = serde_json::to_vec(entry)?;
            batch.put_cf(self.cf_logs(), Self::encode_log_index(entry.index), value);
        }
        self.db.write(batch)?;

        let min = entries.iter().map(|e| e.index).min().unwrap_or(0);
        let max = entries.iter().map(|e| e.index).max().unwrap_or(0);
        let first = self.first_index.load(Ordering::Acquire);
        if first == 0 || min < first {
            self.first_index.store(min, Ordering::Release);
        }
        self.last_index.fetch_max(max, Ordering::AcqRel);

        debug!("Appended {} log entries", entries.len());
        Ok(())
    }

    fn delete_range(&self, min: u64, max: u64) -> Result<(), StoreError> {
        if min > max {
            return Ok(());
        }

        let mut batch = rocksdb::WriteBatch::default();
        let mut iter = self.db.raw_iterator_cf(self.cf_logs());
        iter.seek(Self::encode_log_index(min));

        while iter.valid() {
            if let Some(key) = iter.key() {
                if Self::decode_log_index(key)? > max {
                    break;
                }
                batch.delete_cf(self.cf_logs(), key);
            }
            iter.next();
        }
        iter.status()?;

        self.db.write(batch)?;
        self.load_bounds()?;

        debug!("Deleted logs in range {}..={}", min, max);
        Ok(())
    }
}

impl StableStore for RocksLogStore {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.put_cf(self.cf_stable(), key, value)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get_cf(self.cf_stable(), key)?)
    }

    fn set_u64(&self, key: &[u8], value: u64) -> Result<(), StoreError> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u64::<BigEndian>(value)?;
        self.set(key, &buf)
    }

    fn get_u64(&self, key: &[u8]) -> Result<u64, StoreError> {
        match self.get(key)? {
            Some(bytes) => Self::decode_log_index(&bytes),
            None => Ok(0),
        }
    }
}
