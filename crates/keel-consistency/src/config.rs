// Raft engine configuration
// Maps the operator-facing timing knobs onto the full engine parameter set

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use tracing::Span;

use crate::error::EngineError;
use crate::notify::LeadershipNotifier;
use crate::transport::Transport;

// Fixed engine parameters. These are deliberately kept out of `EngineOptions`
// and `EngineSettings`; snapshot cadence, log retention and append batch size
// must be tuned together.

/// Maximum entries sent in a single append request
pub const MAX_APPEND_ENTRIES: u64 = 64;
/// Log entries kept after a snapshot so lagging followers can catch up
pub const TRAILING_LOGS: u64 = 256;
/// How often the engine checks whether a snapshot is due
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);
/// Committed entries required since the last snapshot before taking another
pub const SNAPSHOT_THRESHOLD: u64 = 64;
/// Snapshot files kept on disk
pub const RETAIN_SNAPSHOT_COUNT: usize = 2;
/// Shut the engine down when this node is removed from the cluster
pub const SHUTDOWN_ON_REMOVE: bool = true;
/// Never re-run single-node bootstrap once a leader has been elected
pub const DISABLE_BOOTSTRAP_AFTER_ELECT: bool = true;

/// Cluster name reported to openraft
pub const CLUSTER_NAME: &str = "keel";

// Bounds enforced by `EngineConfig::validate`
const MIN_TIMEOUT: Duration = Duration::from_millis(5);
const MIN_COMMIT_TIMEOUT: Duration = Duration::from_millis(1);
const MAX_APPEND_ENTRIES_LIMIT: u64 = 1024;

const ENV_PREFIX: &str = "KEEL";

/// Options supplied by the node at startup
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Follower wait before it considers the leader gone
    pub heartbeat_timeout: Duration,
    /// Candidate wait before starting a new election
    pub election_timeout: Duration,
    /// Maximum delay before the leader flushes pending commits
    pub commit_timeout: Duration,
    /// How long a leader keeps leadership without reaching a quorum
    pub leader_lease_timeout: Duration,
    /// Allow this node to elect itself when it is the only member
    pub enable_single_node: bool,
    /// Span the engine logs under
    pub span: Span,
    /// Directory for snapshots
    pub dir: PathBuf,
    /// Transport used to talk to peers
    pub transport: Arc<dyn Transport>,
}

impl EngineOptions {
    /// Options with default timings
    pub fn new(dir: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        EngineSettings::default().into_options_at(dir.into(), transport)
    }
}

/// Full engine parameter set, built once at startup and never mutated
#[derive(Clone, Debug)]
pub struct EngineConfig {
    heartbeat_timeout: Duration,
    election_timeout: Duration,
    commit_timeout: Duration,
    leader_lease_timeout: Duration,
    enable_single_node: bool,
    max_append_entries: u64,
    trailing_logs: u64,
    snapshot_interval: Duration,
    snapshot_threshold: u64,
    retain_snapshot_count: usize,
    shutdown_on_remove: bool,
    disable_bootstrap_after_elect: bool,
    notifier: Option<LeadershipNotifier>,
    span: Span,
}

impl EngineConfig {
    /// Translate caller options into the engine configuration.
    ///
    /// This is a pure mapping; it never rejects input. Engines call
    /// `validate` before using the result.
    pub fn from_options(options: &EngineOptions, notifier: Option<LeadershipNotifier>) -> Self {
        Self {
            heartbeat_timeout: options.heartbeat_timeout,
            election_timeout: options.election_timeout,
            commit_timeout: options.commit_timeout,
            leader_lease_timeout: options.leader_lease_timeout,
            enable_single_node: options.enable_single_node,
            max_append_entries: MAX_APPEND_ENTRIES,
            trailing_logs: TRAILING_LOGS,
            snapshot_interval: SNAPSHOT_INTERVAL,
            snapshot_threshold: SNAPSHOT_THRESHOLD,
            retain_snapshot_count: RETAIN_SNAPSHOT_COUNT,
            shutdown_on_remove: SHUTDOWN_ON_REMOVE,
            disable_bootstrap_after_elect: DISABLE_BOOTSTRAP_AFTER_ELECT,
            notifier,
            span: options.span.clone(),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    pub fn election_timeout(&self) -> Duration {
        self.election_timeout
    }

    pub fn commit_timeout(&self) -> Duration {
        self.commit_timeout
    }

    pub fn leader_lease_timeout(&self) -> Duration {
        self.leader_lease_timeout
    }

    pub fn enable_single_node(&self) -> bool {
        self.enable_single_node
    }

    pub fn max_append_entries(&self) -> u64 {
        self.max_append_entries
    }

    pub fn trailing_logs(&self) -> u64 {
        self.trailing_logs
    }

    pub fn snapshot_interval(&self) -> Duration {
        self.snapshot_interval
    }

    pub fn snapshot_threshold(&self) -> u64 {
        self.snapshot_threshold
    }

    pub fn retain_snapshot_count(&self) -> usize {
        self.retain_snapshot_count
    }

    pub fn shutdown_on_remove(&self) -> bool {
        self.shutdown_on_remove
    }

    pub fn disable_bootstrap_after_elect(&self) -> bool {
        self.disable_bootstrap_after_elect
    }

    /// Channel the engine reports leadership transitions on, if any
    pub fn notifier(&self) -> Option<&LeadershipNotifier> {
        self.notifier.as_ref()
    }

    /// Span the engine should log under
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Check the values a Raft engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.heartbeat_timeout < MIN_TIMEOUT {
            return Err(EngineError::InvalidConfig(format!(
                "heartbeat timeout {:?} is too low",
                self.heartbeat_timeout
            )));
        }
        if self.election_timeout < MIN_TIMEOUT {
            return Err(EngineError::InvalidConfig(format!(
                "election timeout {:?} is too low",
                self.election_timeout
            )));
        }
        if self.commit_timeout < MIN_COMMIT_TIMEOUT {
            return Err(EngineError::InvalidConfig(format!(
                "commit timeout {:?} is too low",
                self.commit_timeout
            )));
        }
        if self.leader_lease_timeout < MIN_TIMEOUT {
            return Err(EngineError::InvalidConfig(format!(
                "leader lease timeout {:?} is too low",
                self.leader_lease_timeout
            )));
        }
        if self.max_append_entries > MAX_APPEND_ENTRIES_LIMIT {
            return Err(EngineError::InvalidConfig(format!(
                "max append entries {} is too large",
                self.max_append_entries
            )));
        }
        if self.snapshot_interval < MIN_TIMEOUT {
            return Err(EngineError::InvalidConfig(format!(
                "snapshot interval {:?} is too low",
                self.snapshot_interval
            )));
        }
        if self.leader_lease_timeout > self.heartbeat_timeout {
            return Err(EngineError::InvalidConfig(
                "leader lease timeout cannot be larger than heartbeat timeout".to_string(),
            ));
        }
        if self.election_timeout < self.heartbeat_timeout {
            return Err(EngineError::InvalidConfig(
                "election timeout must be equal or greater than heartbeat timeout".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert to openraft Config, validated by openraft itself
    pub fn to_openraft_config(&self) -> Result<openraft::Config, EngineError> {
        let election_timeout_ms = millis("election timeout", self.election_timeout)?;
        let election_timeout_max = election_timeout_ms.checked_mul(2).ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "election timeout {:?} is too large",
                self.election_timeout
            ))
        })?;
        let config = openraft::Config {
            cluster_name: CLUSTER_NAME.to_string(),
            election_timeout_min: election_timeout_ms,
            election_timeout_max,
            heartbeat_interval: millis("heartbeat timeout", self.heartbeat_timeout)?,
            max_payload_entries: self.max_append_entries,
            snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(self.snapshot_threshold),
            max_in_snapshot_log_to_keep: self.trailing_logs,
            ..Default::default()
        };
        Ok(config.validate()?)
    }
}

/// Whole milliseconds of `value`, or an error naming the setting if it does
/// not fit in a `u64`
fn millis(name: &str, value: Duration) -> Result<u64, EngineError> {
    u64::try_from(value.as_millis())
        .map_err(|_| EngineError::InvalidConfig(format!("{} {:?} is too large", name, value)))
}

/// Operator-facing timing settings, loadable from a file and the environment
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Heartbeat timeout in milliseconds (default: 500ms)
    pub heartbeat_timeout_ms: u64,

    /// Election timeout in milliseconds (default: 1000ms)
    pub election_timeout_ms: u64,

    /// Commit timeout in milliseconds (default: 50ms)
    pub commit_timeout_ms: u64,

    /// Leader lease timeout in milliseconds (default: 500ms)
    pub leader_lease_timeout_ms: u64,

    /// Allow single-node bootstrap (default: false)
    pub enable_single_node: bool,

    /// Data directory for Raft storage
    pub data_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 500,
            election_timeout_ms: 1000,
            commit_timeout_ms: 50,
            leader_lease_timeout_ms: 500,
            enable_single_node: false,
            data_dir: PathBuf::from("./data/raft"),
        }
    }
}

impl EngineSettings {
    /// Load settings from an optional config file, overridden by `KEEL_*`
    /// environment variables (e.g. `KEEL_ELECTION_TIMEOUT_MS`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Options rooted at `data_dir`
    pub fn into_options(self, transport: Arc<dyn Transport>) -> EngineOptions {
        let dir = self.data_dir.clone();
        self.into_options_at(dir, transport)
    }

    fn into_options_at(self, dir: PathBuf, transport: Arc<dyn Transport>) -> EngineOptions {
        EngineOptions {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            election_timeout: Duration::from_millis(self.election_timeout_ms),
            commit_timeout: Duration::from_millis(self.commit_timeout_ms),
            leader_lease_timeout: Duration::from_millis(self.leader_lease_timeout_ms),
            enable_single_node: self.enable_single_node,
            span: Span::none(),
            dir,
            transport,
        }
    }
}
