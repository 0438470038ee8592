//! Peer registry
//!
//! The registry is written by the cluster join/bootstrap path and read by the
//! engine and the lone-node check. Every `peers()` call returns a consistent
//! copy of the list as the backing store sees it at that moment.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::StoreError;

const PEERS_FILE: &str = "peers.json";
const PEERS_TMP_FILE: &str = "peers.json.tmp";

/// Ordered set of peer addresses known to this node
pub trait PeerStore: Send + Sync {
    fn peers(&self) -> Result<Vec<String>, StoreError>;

    fn set_peers(&self, peers: &[String]) -> Result<(), StoreError>;
}

/// Drop repeated addresses, keeping the first occurrence
fn dedup(peers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    peers
        .iter()
        .filter(|addr| seen.insert(addr.as_str()))
        .cloned()
        .collect()
}

/// Peer registry persisted as a JSON array in `<dir>/peers.json`
#[derive(Debug)]
pub struct JsonPeerStore {
    path: PathBuf,
    /// Serializes writers against each other
    write_lock: Mutex<()>,
}

impl JsonPeerStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(PEERS_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PeerStore for JsonPeerStore {
    fn peers(&self) -> Result<Vec<String>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn set_peers(&self, peers: &[String]) -> Result<(), StoreError> {
        let peers = dedup(peers);
        let bytes = serde_json::to_vec(&peers)?;

        let _guard = self.write_lock.lock();
        let tmp_path = self.path.with_file_name(PEERS_TMP_FILE);
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(count = peers.len(), path = %self.path.display(), "Saved peers");
        Ok(())
    }
}

/// In-memory peer registry
#[derive(Debug, Default)]
pub struct StaticPeers {
    peers: RwLock<Vec<String>>,
}

impl StaticPeers {
    pub fn new(peers: Vec<String>) -> Self {
        Self {
            peers: RwLock::new(dedup(&peers)),
        }
    }
}

impl PeerStore for StaticPeers {
    fn peers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.peers.read().clone())
    }

    fn set_peers(&self, peers: &[String]) -> Result<(), StoreError> {
        *self.peers.write() = dedup(peers);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_file_means_no_peers() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonPeerStore::new(tmp_dir.path());
        assert!(store.peers().unwrap().is_empty());
    }

    #[test]
    fn test_json_store_persists_order() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonPeerStore::new(tmp_dir.path());

        store
            .set_peers(&addrs(&["10.0.0.2:9000", "10.0.0.1:9000"]))
            .unwrap();

        let reopened = JsonPeerStore::new(tmp_dir.path());
        assert_eq!(
            reopened.peers().unwrap(),
            addrs(&["10.0.0.2:9000", "10.0.0.1:9000"])
        );
        assert!(!tmp_dir.path().join(PEERS_TMP_FILE).exists());
    }

    #[test]
    fn test_json_store_dedups() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonPeerStore::new(tmp_dir.path());

        store
            .set_peers(&addrs(&["a:1", "b:2", "a:1", "c:3", "b:2"]))
            .unwrap();
        assert_eq!(store.peers().unwrap(), addrs(&["a:1", "b:2", "c:3"]));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonPeerStore::new(tmp_dir.path());
        fs::write(store.path(), b"{not json").unwrap();

        assert!(matches!(
            store.peers(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_static_peers() {
        let store = StaticPeers::new(addrs(&["a:1", "a:1"]));
        assert_eq!(store.peers().unwrap(), addrs(&["a:1"]));

        store.set_peers(&[]).unwrap();
        assert!(store.peers().unwrap().is_empty());
    }
}
