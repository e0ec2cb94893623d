// src/access.rs
//! Access tracker: per-session record of files read. (spec component C)
//!
//! Gates destructive operations on files the session has not observed, so a
//! stale plan cannot blindly overwrite content it never saw.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ioutil;

#[derive(Debug, Default)]
pub struct AccessTracker {
    read_paths: HashSet<PathBuf>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_read(&mut self, path: &Path) {
        self.read_paths.insert(path.to_path_buf());
    }

    pub fn has_been_read(&self, path: &Path) -> bool {
        self.read_paths.contains(path)
    }

    pub fn read_count(&self) -> usize {
        self.read_paths.len()
    }

    pub fn move_record(&mut self, from: &Path, to: &Path) {
        if self.read_paths.remove(from) {
            self.read_paths.insert(to.to_path_buf());
        }
    }

    pub fn reset(&mut self) {
        self.read_paths.clear();
    }

    /// Enforce the "must have been read" precondition for a destructive
    /// operation, with an `expected_checksum` bypass: a matching checksum
    /// itself counts as a read.
    pub fn require_read_or_checksum(
        &mut self,
        path: &Path,
        expected_checksum: Option<u32>,
    ) -> Result<()> {
        if self.has_been_read(path) {
            return Ok(());
        }

        // A path that does not exist on disk cannot have been read, but
        // there is also nothing to blindly overwrite; callers that create
        // new files never reach this precondition.
        if !path.exists() {
            self.register_read(path);
            return Ok(());
        }

        match expected_checksum {
            Some(expected) => {
                let bytes = std::fs::read(path)?;
                let actual = ioutil::crc32c(&bytes);
                if actual != expected {
                    return Err(Error::OptimisticLockFailure {
                        path: path.to_path_buf(),
                        expected,
                        actual,
                    });
                }
                self.register_read(path);
                Ok(())
            }
            None => Err(Error::NotRead(path.to_path_buf())),
        }
    }
}
