//! Tunables for interactive processes.
//!
//! Loaded from JSON (camelCase keys, every field optional):
//!
//! ```json
//! { "chunkSize": 4096, "readinessCapacity": 10, "receiveTimeoutMs": 1000 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Project-local config file name, looked up in the working directory
pub const LOCAL_CONFIG: &str = "iexec.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Bytes requested from the child's stdout/stderr per read
    pub chunk_size: usize,
    /// Readiness tokens a stream may queue before its pump blocks
    pub readiness_capacity: usize,
    /// Receive cycle timeout used by the command-line front end
    pub receive_timeout_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            readiness_capacity: 10,
            receive_timeout_ms: 1000,
        }
    }
}

impl ProcessConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.normalized())
    }

    /// Find config in order of priority:
    /// 1. ./iexec.json
    /// 2. <config dir>/iexec/config.json
    /// 3. Built-in defaults
    ///
    /// Returns the config and the file it came from, if any.
    pub fn find() -> Result<(Self, Option<PathBuf>)> {
        for path in Self::candidates() {
            if path.exists() {
                let config = Self::load(&path)?;
                return Ok((config, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("iexec").join("config.json"));
        }
        paths
    }

    /// Clamp values that would stall the pumps (a zero-byte read buffer
    /// reads nothing, a zero-capacity queue never accepts a token).
    pub fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.readiness_capacity = self.readiness_capacity.max(1);
        self
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}
