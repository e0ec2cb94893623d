// src/external_change.rs
//! External change tracker: detects drift between the content a session
//! last observed and the file's current on-disk state. (spec component E)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ioutil::{self, Encoding};

/// The authoritative expected state for one tracked path, set every time a
/// read issues a LAT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalChangeSnapshot {
    pub content_hash: u32,
    pub line_count: usize,
    pub encoding: String,
    pub byte_size: u64,
}

impl ExternalChangeSnapshot {
    pub fn capture(content: &str, encoding: Encoding, byte_size: u64) -> Self {
        Self {
            content_hash: ioutil::crc32c(content.as_bytes()),
            line_count: ioutil::line_count(content),
            encoding: format!("{encoding:?}"),
            byte_size,
        }
    }
}

/// Outcome of consulting the tracker before a write.
pub struct DriftCheck {
    pub drifted: bool,
    pub previous_snapshot: Option<ExternalChangeSnapshot>,
    pub previous_crc: u32,
    pub current_crc: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExternalChangeTracker {
    snapshots: HashMap<PathBuf, ExternalChangeSnapshot>,
}

impl ExternalChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: &Path, snapshot: ExternalChangeSnapshot) {
        self.snapshots.insert(path.to_path_buf(), snapshot);
    }

    pub fn get(&self, path: &Path) -> Option<&ExternalChangeSnapshot> {
        self.snapshots.get(path)
    }

    /// Invalidate the snapshot for a path, e.g. after an undo/redo restores
    /// content the tracker did not itself observe, to prevent a false
    /// "external change" signal on the next read.
    pub fn invalidate(&mut self, path: &Path) {
        self.snapshots.remove(path);
    }

    /// Compare on-disk state for `path` against the last recorded snapshot.
    /// Returns `drifted = false` when there is no prior snapshot: a file the
    /// tracker has never observed cannot have drifted under it yet.
    pub fn check_drift(&self, path: &Path) -> Result<DriftCheck> {
        let previous = self.snapshots.get(path).cloned();
        let bytes = if path.exists() {
            std::fs::read(path)?
        } else {
            Vec::new()
        };
        let current_crc = ioutil::crc32c(&bytes);

        let drifted = match &previous {
            Some(snapshot) => snapshot.content_hash != current_crc,
            None => false,
        };

        let previous_crc = previous.as_ref().map(|s| s.content_hash).unwrap_or(0);

        Ok(DriftCheck {
            drifted,
            previous_snapshot: previous,
            previous_crc,
            current_crc,
        })
    }
}
