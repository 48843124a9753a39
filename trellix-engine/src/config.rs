//! Engine configuration loaded with Figment
//!
//! Sources are layered in precedence order, later ones overriding earlier:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `TRELLIX_`, nested with `__`
//!    (e.g. `TRELLIX_SYNC__TIMEOUT_MS=2500`)

use crate::error::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TRELLIX_";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub snapshot: SnapshotConfig,
}

/// Remote dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A remote call unresolved after this long counts as failed
    pub timeout_ms: u64,
    /// Roll back failed field patches and creates too, not only deletes and moves
    pub rollback_patches: bool,
    /// Buffer size of the sync event channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            rollback_patches: true,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_rollback_patches(mut self, rollback_patches: bool) -> Self {
        self.rollback_patches = rollback_patches;
        self
    }
}

/// Where the local session snapshot lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
    /// File stem of the snapshot, `<dir>/<namespace>.json`
    pub namespace: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".trellix"),
            namespace: "trellix-storage".to_string(),
        }
    }
}

impl SnapshotConfig {
    /// Full path of the snapshot file
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.namespace))
    }
}

impl EngineConfig {
    /// Load configuration from defaults, `file` if given, and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file).extract()?;
        debug!(
            timeout_ms = config.sync.timeout_ms,
            rollback_patches = config.sync.rollback_patches,
            snapshot = %config.snapshot.path().display(),
            "loaded engine configuration"
        );
        Ok(config)
    }

    /// The layered sources, for callers that want to merge their own
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
