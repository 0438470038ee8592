//! Directory-backed snapshot store
//!
//! Layout under the store root:
//!
//! ```text
//! <dir>/snapshots/<term>-<index>-<millis>/meta.json
//! <dir>/snapshots/<term>-<index>-<millis>/state.bin
//! ```
//!
//! Ids taken at the same term and index within one millisecond get a `-<n>`
//! suffix.
//!
//! A snapshot is written into `<id>.tmp` and renamed into place on commit, so
//! readers never see a partial snapshot. Only the newest `retain` snapshots
//! are kept.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;

const SNAPSHOT_DIR: &str = "snapshots";
const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.bin";
const TMP_SUFFIX: &str = ".tmp";
const PERM_TEST_FILE: &str = "permTest";

/// Description of a stored snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    /// Index of the last log entry included in the snapshot
    pub index: u64,
    /// Term of the last log entry included in the snapshot
    pub term: u64,
    /// Serialized cluster membership at `index`
    pub configuration: Vec<u8>,
    /// Size of the state in bytes
    pub size: u64,
    /// Hex MD5 of the state
    pub checksum: String,
}

/// Storage for engine snapshots with bounded retention
pub trait SnapshotStore: Send + Sync {
    /// Begin writing a snapshot covering the log up to `index`/`term`
    fn create(
        &self,
        index: u64,
        term: u64,
        configuration: &[u8],
    ) -> Result<Box<dyn SnapshotSink>, StoreError>;

    /// Stored snapshots, most recent first
    fn list(&self) -> Result<Vec<SnapshotMeta>, StoreError>;

    /// Read a snapshot by id
    fn open(&self, id: &str) -> Result<(SnapshotMeta, Vec<u8>), StoreError>;
}

/// An in-progress snapshot; nothing is visible until `close`
pub trait SnapshotSink: Write + Send {
    fn id(&self) -> &str;

    /// Persist the snapshot and make it visible to `list`
    fn close(self: Box<Self>) -> Result<SnapshotMeta, StoreError>;

    /// Discard everything written so far
    fn cancel(self: Box<Self>) -> Result<(), StoreError>;
}

/// Snapshot store keeping each snapshot in its own directory
#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    /// Create the store under `<dir>/snapshots`.
    ///
    /// Fails if `retain` is 0 or the directory cannot be created or written.
    pub fn new(dir: impl AsRef<Path>, retain: usize) -> Result<Self, StoreError> {
        if retain < 1 {
            return Err(StoreError::InvalidRetainCount(retain));
        }

        let path = dir.as_ref().join(SNAPSHOT_DIR);
        fs::create_dir_all(&path)?;

        let store = Self { path, retain };
        store.test_permissions()?;

        info!(path = %store.path.display(), retain, "File snapshot store initialized");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn test_permissions(&self) -> Result<(), StoreError> {
        let marker = self.path.join(PERM_TEST_FILE);
        File::create(&marker)?;
        fs::remove_file(&marker)?;
        Ok(())
    }

    fn snapshot_id(term: u64, index: u64) -> String {
        format!(
            "{}-{}-{}",
            term,
            index,
            chrono::Utc::now().timestamp_millis()
        )
    }

    /// Claim a fresh id by creating its temporary directory. A snapshot that
    /// would reuse a live or committed id gets a `-<n>` suffix instead.
    fn reserve(&self, term: u64, index: u64) -> Result<(String, PathBuf), StoreError> {
        let base = Self::snapshot_id(term, index);
        let mut attempt = 0u32;
        loop {
            let id = match attempt {
                0 => base.clone(),
                n => format!("{}-{}", base, n),
            };
            attempt += 1;

            if self.path.join(&id).exists() {
                continue;
            }
            let tmp_dir = self.path.join(format!("{}{}", id, TMP_SUFFIX));
            match fs::create_dir(&tmp_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
            // Committed by another sink between the check and the claim
            if self.path.join(&id).exists() {
                fs::remove_dir(&tmp_dir)?;
                continue;
            }
            return Ok((id, tmp_dir));
        }
    }

    fn read_meta(dir: &Path) -> Result<SnapshotMeta, StoreError> {
        let bytes = fs::read(dir.join(META_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every committed snapshot, newest first
    fn all_snapshots(&self) -> Result<Vec<SnapshotMeta>, StoreError> {
        let mut metas = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            match Self::read_meta(&entry.path()) {
                Ok(meta) => metas.push(meta),
                Err(e) => warn!(snapshot = %name, "Skipping unreadable snapshot: {}", e),
            }
        }

        metas.sort_by(|a, b| {
            b.term
                .cmp(&a.term)
                .then(b.index.cmp(&a.index))
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(metas)
    }

    /// Delete snapshots beyond the retention count
    fn reap(&self) -> Result<(), StoreError> {
        let snapshots = self.all_snapshots()?;
        for meta in snapshots.iter().skip(self.retain) {
            fs::remove_dir_all(self.path.join(&meta.id))?;
            info!(snapshot = %meta.id, "Reaped snapshot");
        }
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn create(
        &self,
        index: u64,
        term: u64,
        configuration: &[u8],
    ) -> Result<Box<dyn SnapshotSink>, StoreError> {
        let (id, tmp_dir) = self.reserve(term, index)?;

        let state = BufWriter::new(File::create(tmp_dir.join(STATE_FILE))?);
        debug!(snapshot = %id, "Creating snapshot");

        Ok(Box::new(FileSnapshotSink {
            store_path: self.path.clone(),
            retain: self.retain,
            tmp_dir,
            state,
            hasher: Md5::new(),
            size: 0,
            meta: SnapshotMeta {
                id,
                index,
                term,
                configuration: configuration.to_vec(),
                size: 0,
                checksum: String::new(),
            },
        }))
    }

    fn list(&self) -> Result<Vec<SnapshotMeta>, StoreError> {
        let mut snapshots = self.all_snapshots()?;
        snapshots.truncate(self.retain);
        Ok(snapshots)
    }

    fn open(&self, id: &str) -> Result<(SnapshotMeta, Vec<u8>), StoreError> {
        let dir = self.path.join(id);
        if id.ends_with(TMP_SUFFIX) || !dir.is_dir() {
            return Err(StoreError::SnapshotNotFound(id.to_string()));
        }

        let meta = Self::read_meta(&dir)?;
        let data = fs::read(dir.join(STATE_FILE))?;

        let actual = const_hex::encode(Md5::digest(&data));
        if actual != meta.checksum {
            return Err(StoreError::ChecksumMismatch {
                id: id.to_string(),
                expected: meta.checksum,
                actual,
            });
        }
        Ok((meta, data))
    }
}

struct FileSnapshotSink {
    store_path: PathBuf,
    retain: usize,
    tmp_dir: PathBuf,
    state: BufWriter<File>,
    hasher: Md5,
    size: u64,
    meta: SnapshotMeta,
}

impl Write for FileSnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.state.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn close(self: Box<Self>) -> Result<SnapshotMeta, StoreError> {
        let FileSnapshotSink {
            store_path,
            retain,
            tmp_dir,
            state,
            hasher,
            size,
            mut meta,
        } = *self;

        let file = state.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        meta.size = size;
        meta.checksum = const_hex::encode(hasher.finalize());

        let meta_file = File::create(tmp_dir.join(META_FILE))?;
        let mut writer = BufWriter::new(meta_file);
        serde_json::to_writer(&mut writer, &meta)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&tmp_dir, store_path.join(&meta.id))?;
        info!(snapshot = %meta.id, size = meta.size, "Snapshot committed");

        FileSnapshotStore {
            path: store_path,
            retain,
        }
        .reap()?;

        Ok(meta)
    }

    fn cancel(self: Box<Self>) -> Result<(), StoreError> {
        let tmp_dir = self.tmp_dir.clone();
        drop(self);
        fs::remove_dir_all(&tmp_dir)?;
        debug!(path = %tmp_dir.display(), "Snapshot cancelled");
        Ok(())
    }
}
