// src/snapshot.rs
//! Content-addressed snapshot store: pre-mutation file backups scoped to a
//! session directory. (spec component G)

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

const SNAPSHOTS_DIR: &str = "snapshots";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    session_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(session_dir: PathBuf) -> Self {
        Self { session_dir }
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.session_dir.join(SNAPSHOTS_DIR)
    }

    fn snapshot_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir().join(format!("{snapshot_id}.bak"))
    }

    /// Copy `target_path`'s current bytes into the snapshot directory and
    /// return a UUID identifying the backup. Returns `None` if the target
    /// does not currently exist: the null snapshot means "rollback deletes
    /// it."
    pub fn backup(&self, target_path: &Path) -> Result<Option<String>> {
        if !target_path.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(self.snapshots_dir())?;
        let id = Uuid::new_v4().to_string();
        std::fs::copy(target_path, self.snapshot_path(&id))?;
        Ok(Some(id))
    }

    /// Restore `target_path` from `snapshot_id`. `None` means delete
    /// `target_path` and any empty parent directories up to (but excluding)
    /// `stop_at`.
    pub fn restore(
        &self,
        snapshot_id: Option<&str>,
        target_path: &Path,
        stop_at: &Path,
    ) -> Result<()> {
        match snapshot_id {
            Some(id) => {
                if let Some(parent) = target_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(self.snapshot_path(id), target_path)?;
                Ok(())
            }
            None => {
                if target_path.exists() {
                    std::fs::remove_file(target_path)?;
                }
                remove_empty_ancestors(target_path, stop_at);
                Ok(())
            }
        }
    }

    pub fn delete(&self, snapshot_id: &str) -> Result<()> {
        let path = self.snapshot_path(snapshot_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn read_bytes(&self, snapshot_id: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.snapshot_path(snapshot_id))?)
    }
}

/// Remove empty directories walking up from `path`'s parent toward, but not
/// including, `stop_at`. Stops at the first non-empty directory.
fn remove_empty_ancestors(path: &Path, stop_at: &Path) {
    let mut current = path.parent().map(|p| p.to_path_buf());
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        match std::fs::read_dir(&dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(_) => break,
        }
        if std::fs::remove_dir(&dir).is_err() {
            break;
        }
        current = dir.parent().map(|p| p.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn backup_and_restore_round_trips_content() {
        let temp = TempDir::new().unwrap();
        let project_root = temp.path().join("project");
        std::fs::create_dir_all(&project_root).unwrap();
        let session_dir = temp.path().join("session");
        let store = SnapshotStore::new(session_dir);

        let target = project_root.join("f.txt");
        std::fs::write(&target, "original").unwrap();

        let id = store.backup(&target).unwrap().unwrap();
        std::fs::write(&target, "modified").unwrap();
        store.restore(Some(&id), &target, &project_root).unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn backup_of_nonexistent_file_is_null_snapshot() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().join("session"));
        let target = temp.path().join("never-existed.txt");
        assert_eq!(store.backup(&target).unwrap(), None);
    }

    #[test]
    fn restore_with_null_snapshot_deletes_file_and_empty_parents() {
        let temp = TempDir::new().unwrap();
        let project_root = temp.path().join("project");
        let nested = project_root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let target = nested.join("new.txt");
        std::fs::write(&target, "created in this transaction").unwrap();

        let store = SnapshotStore::new(temp.path().join("session"));
        store.restore(None, &target, &project_root).unwrap();

        assert!(!target.exists());
        assert!(!nested.exists());
        assert!(!project_root.join("a").exists());
        assert!(project_root.exists());
    }

    #[test]
    fn delete_removes_snapshot_file() {
        let temp = TempDir::new().unwrap();
        let project_root = temp.path().join("project");
        std::fs::create_dir_all(&project_root).unwrap();
        let target = project_root.join("f.txt");
        std::fs::write(&target, "x").unwrap();

        let store = SnapshotStore::new(temp.path().join("session"));
        let id = store.backup(&target).unwrap().unwrap();
        store.delete(&id).unwrap();
        assert!(store.read_bytes(&id).is_err());
    }
}
