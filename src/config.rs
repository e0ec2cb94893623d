// src/config.rs
//! Crate configuration
//!
//! Loaded from `<project_root>/.nts/config.toml` if present, falling back to
//! defaults otherwise. Mirrors the grounding repo's pattern of a small,
//! serde-derived config struct with a `Default` impl rather than a
//! hand-rolled builder.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_UNDO_HISTORY: usize = 50;
pub const DEFAULT_GIT_QUERY_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_GIT_COMMIT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum bytes readable in a single read operation.
    pub max_read_bytes: u64,
    /// Maximum number of entries retained per undo/redo stack.
    pub max_undo_history: usize,
    /// Legacy single-byte encoding to fall back to when a file is not valid UTF-8.
    pub legacy_encoding: String,
    /// Timeout for read-only git queries (status, log).
    pub git_query_timeout_secs: u64,
    /// Timeout for git commit/restore operations.
    pub git_commit_timeout_secs: u64,
    /// Whether snapshots are kept on disk after eviction from the undo
    /// history, for long-tail manual recovery, or deleted immediately.
    pub preserve_old_content: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_undo_history: DEFAULT_MAX_UNDO_HISTORY,
            legacy_encoding: "windows-1252".to_string(),
            git_query_timeout_secs: DEFAULT_GIT_QUERY_TIMEOUT_SECS,
            git_commit_timeout_secs: DEFAULT_GIT_COMMIT_TIMEOUT_SECS,
            preserve_old_content: true,
        }
    }
}

impl Config {
    /// Load configuration from `<project_root>/.nts/config.toml`, falling
    /// back to defaults if the file does not exist.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".nts").join("config.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(".nts").join("config.toml")
    }
}
