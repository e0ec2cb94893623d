// src/transaction/undo.rs
//! Smart undo engine: restores the files captured by a journal entry,
//! redirecting through the lineage tracker so a file that has since moved is
//! restored at its current location rather than its original one. (spec
//! component I)
//!
//! The same procedure runs for both undo and redo: the direction only
//! changes which snapshot id is treated as "the state to restore to" versus
//! "the state to capture on the way out," so `apply_undo` produces the
//! inverse entry the caller pushes onto the opposite stack.
//!
//! Restoration is not all-or-nothing. Each file in a transaction is resolved
//! independently: if its target directory has uncommitted changes from
//! another transaction sitting on top of it, the file is placed at another
//! location already holding the same content instead, or the file is left
//! unrestored and reported rather than aborting the whole entry.

use std::path::{Path, PathBuf};

use crate::external_change::ExternalChangeTracker;
use crate::lineage::{hash_content, LineageTracker};
use crate::snapshot::SnapshotStore;

use super::journal::{
    CheckpointEntry, EntryStatus, ExternalChangeEntry, JournalEntry, TransactionEntry,
};

/// How a restoration attempt for one journal entry turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Every file restored at its original (or lineage-redirected) target.
    Success,
    /// Every file restored, but at least one took a relocation fallback —
    /// either a lineage move or a dirty-parent content-hash relocation.
    ResolvedMove,
    /// Some files restored, some did not.
    Partial,
    /// No file could be restored.
    Failed,
}

/// An explanatory note attached to a file that did not restore at its
/// straightforward target.
#[derive(Debug, Clone)]
pub struct FileNote {
    pub path: PathBuf,
    pub note: String,
}

/// Result of running the undo/redo procedure over one journal entry.
pub struct UndoReport {
    pub outcome: UndoOutcome,
    /// The entry to push onto the opposite stack (undo produces a redo
    /// entry and vice versa), reflecting whatever actually ended up on disk.
    pub inverse: JournalEntry,
    pub notes: Vec<FileNote>,
    /// Paths that could not be restored anywhere, with the reason each one
    /// failed.
    pub failed: Vec<(PathBuf, String)>,
    /// Whether at least one file was actually restored. An entry with no
    /// progress should not be pushed onto the opposite stack at all.
    pub progress: bool,
}

/// Resolve the effective path to restore for an entry's original path,
/// following any recorded move of that path's content.
fn effective_target(lineage: &LineageTracker, original: &Path) -> PathBuf {
    lineage
        .current_location_of(original)
        .unwrap_or_else(|| original.to_path_buf())
}

/// A directory is "dirty" if a file directly inside it, other than the
/// restore target itself, has drifted from the external-change tracker's
/// last recorded snapshot — i.e. something else touched this directory
/// since it was last observed, and restoring into it risks clobbering that.
fn parent_is_dirty(external_changes: &ExternalChangeTracker, target: &Path) -> bool {
    let Some(parent) = target.parent() else {
        return false;
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path == target {
            continue;
        }
        if external_changes.get(&path).is_some() {
            if let Ok(check) = external_changes.check_drift(&path) {
                if check.drifted {
                    return true;
                }
            }
        }
    }
    false
}

/// Look for another current location already holding the content a snapshot
/// would restore, excluding the contested target itself.
fn relocate_via_content_hash(
    snapshots: &SnapshotStore,
    lineage: &LineageTracker,
    before_snapshot: Option<&str>,
    excluded: &Path,
) -> Option<PathBuf> {
    let id = before_snapshot?;
    let bytes = snapshots.read_bytes(id).ok()?;
    let hash = hash_content(&bytes);
    lineage
        .find_by_content_hash(&hash)
        .into_iter()
        .find(|p| p.as_path() != excluded)
}

fn restore_one(
    snapshots: &SnapshotStore,
    project_root: &Path,
    target: &Path,
    before_snapshot: Option<&str>,
) -> std::result::Result<Option<String>, String> {
    let after = snapshots
        .backup(target)
        .map_err(|e| format!("failed to capture current state of {}: {e}", target.display()))?;
    snapshots
        .restore(before_snapshot, target, project_root)
        .map_err(|e| format!("failed to restore {}: {e}", target.display()))?;
    Ok(after)
}

pub fn apply_undo(
    snapshots: &SnapshotStore,
    project_root: &Path,
    lineage: &LineageTracker,
    external_changes: &ExternalChangeTracker,
    entry: &JournalEntry,
) -> UndoReport {
    match entry {
        JournalEntry::Transaction(t) => {
            apply_transaction(snapshots, project_root, lineage, external_changes, t)
        }
        JournalEntry::ExternalChange(e) => apply_external_change(snapshots, project_root, e),
        JournalEntry::Checkpoint(c) => UndoReport {
            outcome: UndoOutcome::Success,
            inverse: JournalEntry::Checkpoint(CheckpointEntry {
                id: c.id.clone(),
                name: c.name.clone(),
                timestamp: c.timestamp,
            }),
            notes: Vec::new(),
            failed: Vec::new(),
            progress: true,
        },
    }
}

fn apply_transaction(
    snapshots: &SnapshotStore,
    project_root: &Path,
    lineage: &LineageTracker,
    external_changes: &ExternalChangeTracker,
    t: &TransactionEntry,
) -> UndoReport {
    let mut inverse_files = Vec::with_capacity(t.files.len());
    let mut notes = Vec::new();
    let mut failed = Vec::new();
    let mut took_fallback = false;

    for (original_path, before_snapshot) in &t.files {
        let target = effective_target(lineage, original_path);
        if &target != original_path {
            took_fallback = true;
        }

        if parent_is_dirty(external_changes, &target) {
            match relocate_via_content_hash(snapshots, lineage, before_snapshot.as_deref(), &target) {
                Some(alt) => match restore_one(snapshots, project_root, &alt, before_snapshot.as_deref()) {
                    Ok(after) => {
                        took_fallback = true;
                        notes.push(FileNote {
                            path: alt.clone(),
                            note: format!(
                                "parent of {} has uncommitted changes from another transaction; restored at this relocated path instead",
                                target.display()
                            ),
                        });
                        inverse_files.push((alt, after));
                    }
                    Err(e) => failed.push((target, format!("parent directory dirty and relocation failed: {e}"))),
                },
                None => failed.push((
                    target,
                    "parent directory has uncommitted changes from another transaction, and no other copy of this content was found".to_string(),
                )),
            }
            continue;
        }

        match restore_one(snapshots, project_root, &target, before_snapshot.as_deref()) {
            Ok(after) => inverse_files.push((target, after)),
            Err(e) => failed.push((target, e)),
        }
    }

    let progress = !inverse_files.is_empty();
    let outcome = if failed.is_empty() {
        if took_fallback { UndoOutcome::ResolvedMove } else { UndoOutcome::Success }
    } else if progress {
        UndoOutcome::Partial
    } else {
        UndoOutcome::Failed
    };

    let status = if matches!(outcome, UndoOutcome::Partial | UndoOutcome::Failed) {
        EntryStatus::Stuck
    } else {
        EntryStatus::Committed
    };

    let inverse = JournalEntry::Transaction(TransactionEntry {
        id: t.id.clone(),
        description: t.description.clone(),
        instruction: t.instruction.clone(),
        timestamp: t.timestamp,
        status,
        files: inverse_files,
        diff_stats: t.diff_stats.clone(),
    });

    UndoReport { outcome, inverse, notes, failed, progress }
}

fn apply_external_change(
    snapshots: &SnapshotStore,
    project_root: &Path,
    e: &ExternalChangeEntry,
) -> UndoReport {
    match restore_one(snapshots, project_root, &e.path, e.previous_snapshot.as_deref()) {
        Ok(after_snapshot) => UndoReport {
            outcome: UndoOutcome::Success,
            inverse: JournalEntry::ExternalChange(ExternalChangeEntry {
                id: e.id.clone(),
                path: e.path.clone(),
                previous_snapshot: after_snapshot,
                previous_crc: e.current_crc,
                current_crc: e.previous_crc,
                description: e.description.clone(),
                timestamp: e.timestamp,
                status: EntryStatus::Committed,
            }),
            notes: Vec::new(),
            failed: Vec::new(),
            progress: true,
        },
        Err(err) => UndoReport {
            outcome: UndoOutcome::Failed,
            inverse: JournalEntry::ExternalChange(e.clone()),
            notes: Vec::new(),
            failed: vec![(e.path.clone(), err)],
            progress: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_change::ExternalChangeSnapshot;
    use crate::ioutil::Encoding;
    use crate::transaction::journal::DiffStats;
    use tempfile::TempDir;

    #[test]
    fn undo_redirects_through_lineage_after_a_move() {
        let temp = TempDir::new().unwrap();
        let project_root = temp.path().to_path_buf();
        let snapshots = SnapshotStore::new(project_root.join(".nts/sessions/s1"));
        let mut lineage = LineageTracker::new();
        let external_changes = ExternalChangeTracker::new();

        let a = project_root.join("a.txt");
        let b = project_root.join("b.txt");
        std::fs::write(&a, "v1").unwrap();

        // transaction 1: create a.txt with v1 (null before-snapshot)
        lineage.register_file(&a, b"v1", 1000);
        let create_entry = JournalEntry::Transaction(TransactionEntry {
            id: "tx1".into(),
            description: "create a".into(),
            instruction: None,
            timestamp: 1000,
            status: EntryStatus::Committed,
            files: vec![(a.clone(), None)],
            diff_stats: DiffStats::default(),
        });

        // simulate rename a -> b, then edit b to v2
        std::fs::rename(&a, &b).unwrap();
        lineage.record_move(&a, &b, 1001);
        std::fs::write(&b, "v2").unwrap();

        // undo the edit is out of scope here; we directly undo the create,
        // which should now target b.txt, not the no-longer-existing a.txt
        let report = apply_undo(&snapshots, &project_root, &lineage, &external_changes, &create_entry);
        assert_eq!(report.outcome, UndoOutcome::ResolvedMove);
        assert!(!b.exists());
        assert!(!a.exists());
        match report.inverse {
            JournalEntry::Transaction(t) => {
                assert_eq!(t.files[0].0, b);
            }
            _ => panic!("expected transaction entry"),
        }
    }

    #[test]
    fn external_change_undo_swaps_crc_direction() {
        let temp = TempDir::new().unwrap();
        let project_root = temp.path().to_path_buf();
        let snapshots = SnapshotStore::new(project_root.join(".nts/sessions/s1"));

        let f = project_root.join("f.txt");
        std::fs::write(&f, "original").unwrap();
        let previous_snapshot = snapshots.backup(&f).unwrap();
        std::fs::write(&f, "changed externally").unwrap();

        let entry = JournalEntry::ExternalChange(ExternalChangeEntry {
            id: "ec1".into(),
            path: f.clone(),
            previous_snapshot,
            previous_crc: 111,
            current_crc: 222,
            description: "drift".into(),
            timestamp: 1000,
            status: EntryStatus::Committed,
        });

        let report = apply_external_change(&snapshots, &project_root, match &entry {
            JournalEntry::ExternalChange(e) => e,
            _ => unreachable!(),
        });
        assert_eq!(report.outcome, UndoOutcome::Success);
        assert_eq!(std::fs::read_to_string(&f).unwrap(), "original");
        match report.inverse {
            JournalEntry::ExternalChange(e) => {
                assert_eq!(e.previous_crc, 222);
                assert_eq!(e.current_crc, 111);
            }
            _ => panic!("expected external change entry"),
        }
    }

    #[test]
    fn dirty_parent_relocates_via_content_hash() {
        let temp = TempDir::new().unwrap();
        let project_root = temp.path().to_path_buf();
        let snapshots = SnapshotStore::new(project_root.join(".nts/sessions/s1"));
        let mut lineage = LineageTracker::new();
        let mut external_changes = ExternalChangeTracker::new();

        std::fs::create_dir(project_root.join("docs")).unwrap();
        let target = project_root.join("docs/a.txt");
        let alt = project_root.join("docs/other.txt");
        let sibling = project_root.join("docs/sibling.txt");

        std::fs::write(&target, "v1").unwrap();
        let before_snapshot = snapshots.backup(&target).unwrap();
        std::fs::write(&target, "v2").unwrap();

        std::fs::write(&alt, "v1").unwrap();
        lineage.register_file(&target, b"v1", 1000);
        lineage.register_file(&alt, b"v1", 1000);

        std::fs::write(&sibling, "clean").unwrap();
        external_changes.record(&sibling, ExternalChangeSnapshot::capture("clean", Encoding::Utf8, 5));
        std::fs::write(&sibling, "dirtied by another transaction").unwrap();

        let entry = TransactionEntry {
            id: "tx2".into(),
            description: "edit a".into(),
            instruction: None,
            timestamp: 1000,
            status: EntryStatus::Committed,
            files: vec![(target.clone(), before_snapshot)],
            diff_stats: DiffStats::default(),
        };

        let report = apply_transaction(&snapshots, &project_root, &lineage, &external_changes, &entry);
        assert_eq!(report.outcome, UndoOutcome::ResolvedMove);
        assert_eq!(report.notes.len(), 1);
        assert_eq!(std::fs::read_to_string(&alt).unwrap(), "v1");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "v2");
    }

    #[test]
    fn dirty_parent_without_alternate_location_fails_that_file() {
        let temp = TempDir::new().unwrap();
        let project_root = temp.path().to_path_buf();
        let snapshots = SnapshotStore::new(project_root.join(".nts/sessions/s1"));
        let lineage = LineageTracker::new();
        let mut external_changes = ExternalChangeTracker::new();

        std::fs::create_dir(project_root.join("docs")).unwrap();
        let target = project_root.join("docs/a.txt");
        let sibling = project_root.join("docs/sibling.txt");

        std::fs::write(&target, "v1").unwrap();
        let before_snapshot = snapshots.backup(&target).unwrap();
        std::fs::write(&target, "v2").unwrap();

        std::fs::write(&sibling, "clean").unwrap();
        external_changes.record(&sibling, ExternalChangeSnapshot::capture("clean", Encoding::Utf8, 5));
        std::fs::write(&sibling, "dirtied by another transaction").unwrap();

        let entry = TransactionEntry {
            id: "tx3".into(),
            description: "edit a".into(),
            instruction: None,
            timestamp: 1000,
            status: EntryStatus::Committed,
            files: vec![(target.clone(), before_snapshot)],
            diff_stats: DiffStats::default(),
        };

        let report = apply_transaction(&snapshots, &project_root, &lineage, &external_changes, &entry);
        assert_eq!(report.outcome, UndoOutcome::Failed);
        assert!(!report.progress);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "v2");
    }
}
