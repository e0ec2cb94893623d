// src/transaction/mod.rs
//! Transaction manager: nested scopes, commit/rollback, checkpoints, and the
//! undo/redo stacks. (spec component H, core of the system)

pub mod journal;
pub mod undo;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::external_change::ExternalChangeTracker;
use crate::lineage::LineageTracker;
use crate::snapshot::SnapshotStore;
use journal::{
    extract_affected_blocks, CheckpointEntry, DiffStats, EntryStatus, ExternalChangeEntry,
    JournalEntry, TransactionEntry,
};

/// An open, not-yet-committed transaction scope. Nested `start_transaction`
/// calls increment `depth` without creating a second scope; only the
/// outermost `commit`/`rollback` resolves it.
struct Scope {
    description: String,
    instruction: Option<String>,
    started_at: i64,
    /// Insertion-ordered list of files touched, each with the snapshot id
    /// backing it up (`None` meaning the file did not exist before).
    files: Vec<(PathBuf, Option<String>)>,
    touched: HashSet<PathBuf>,
}

pub struct TransactionManager {
    project_root: PathBuf,
    snapshots: SnapshotStore,
    depth: usize,
    scope: Option<Scope>,
    undo_stack: Vec<JournalEntry>,
    redo_stack: Vec<JournalEntry>,
    max_history: usize,
    total_edits: usize,
    total_undos: usize,
}

impl TransactionManager {
    pub fn new(project_root: PathBuf, snapshots: SnapshotStore, max_history: usize) -> Self {
        Self {
            project_root,
            snapshots,
            depth: 0,
            scope: None,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_history,
            total_edits: 0,
            total_undos: 0,
        }
    }

    pub fn total_edits(&self) -> usize {
        self.total_edits
    }

    pub fn total_undos(&self) -> usize {
        self.total_undos
    }

    pub fn is_in_transaction(&self) -> bool {
        self.depth > 0
    }

    pub fn undo_stack(&self) -> &[JournalEntry] {
        &self.undo_stack
    }

    pub fn redo_stack(&self) -> &[JournalEntry] {
        &self.redo_stack
    }

    pub fn restore_stacks(&mut self, undo: Vec<JournalEntry>, redo: Vec<JournalEntry>) {
        self.undo_stack = undo;
        self.redo_stack = redo;
    }

    pub fn set_counters(&mut self, total_edits: usize, total_undos: usize) {
        self.total_edits = total_edits;
        self.total_undos = total_undos;
    }

    /// Open a new scope, or, if one is already open, increment the nesting
    /// depth without touching it.
    pub fn start_transaction(
        &mut self,
        description: impl Into<String>,
        instruction: Option<String>,
        now: i64,
    ) {
        if self.scope.is_none() {
            self.scope = Some(Scope {
                description: description.into(),
                instruction,
                started_at: now,
                files: Vec::new(),
                touched: HashSet::new(),
            });
        }
        self.depth += 1;
    }

    /// Lazily back up `path` within the current scope. A no-op if this path
    /// was already backed up earlier in the same scope.
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        let scope = self
            .scope
            .as_mut()
            .ok_or_else(|| Error::TransactionError("backup called outside a transaction".into()))?;
        if scope.touched.contains(path) {
            return Ok(());
        }
        let snapshot_id = self.snapshots.backup(path)?;
        scope.touched.insert(path.to_path_buf());
        scope.files.push((path.to_path_buf(), snapshot_id));
        Ok(())
    }

    /// Decrement the nesting depth; at depth 0, finalize the scope into a
    /// committed journal entry.
    pub fn commit(&mut self, now: i64) -> Result<Option<TransactionEntry>> {
        if self.depth == 0 {
            return Err(Error::TransactionError("commit called with no open transaction".into()));
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok(None);
        }

        let scope = self
            .scope
            .take()
            .ok_or_else(|| Error::TransactionError("commit reached depth 0 with no scope".into()))?;

        let diff_stats = self.compute_diff_stats(&scope.files)?;
        let entry = TransactionEntry {
            id: Uuid::new_v4().to_string(),
            description: scope.description,
            instruction: scope.instruction,
            timestamp: scope.started_at,
            status: EntryStatus::Committed,
            files: scope.files,
            diff_stats,
        };

        self.push_undo(JournalEntry::Transaction(entry.clone()));
        self.total_edits += 1;
        Ok(Some(entry))
    }

    /// Restore every file touched by the current scope and discard it,
    /// regardless of nesting depth.
    pub fn rollback(&mut self) -> Result<()> {
        let scope = self
            .scope
            .take()
            .ok_or_else(|| Error::TransactionError("rollback called with no open transaction".into()))?;
        self.depth = 0;

        for (path, snapshot_id) in scope.files.iter().rev() {
            self.snapshots
                .restore(snapshot_id.as_deref(), path, &self.project_root)?;
            if let Some(id) = snapshot_id {
                self.snapshots.delete(id)?;
            }
        }
        Ok(())
    }

    /// Abort the currently open scope after a failure mid-transaction
    /// (an IO error, or any other error raised after `backup` opened it),
    /// attempting to restore every file it had already touched.
    ///
    /// If every touched file restores cleanly, `cause` is returned
    /// unchanged — the operation failed but left no trace. If some file
    /// cannot be restored, the partially-rolled-back scope is recorded as a
    /// STUCK entry on the undo stack instead of silently discarded, and a
    /// `StuckTransaction` naming the unrestorable paths and a Git fallback
    /// command is returned in place of `cause`.
    pub fn abort_scope(&mut self, cause: Error) -> Error {
        let Some(scope) = self.scope.take() else {
            return cause;
        };
        self.depth = 0;

        let mut unrestorable = Vec::new();
        for (path, snapshot_id) in scope.files.iter().rev() {
            match self
                .snapshots
                .restore(snapshot_id.as_deref(), path, &self.project_root)
            {
                Ok(()) => {
                    if let Some(id) = snapshot_id {
                        let _ = self.snapshots.delete(id);
                    }
                }
                Err(e) => unrestorable.push((path.clone(), e.to_string())),
            }
        }

        if unrestorable.is_empty() {
            return cause;
        }

        let tx_id = Uuid::new_v4().to_string();
        let paths: Vec<PathBuf> = unrestorable.iter().map(|(p, _)| p.clone()).collect();
        self.push_undo(JournalEntry::Transaction(TransactionEntry {
            id: tx_id.clone(),
            description: scope.description,
            instruction: scope.instruction,
            timestamp: scope.started_at,
            status: EntryStatus::Stuck,
            files: scope.files,
            diff_stats: DiffStats::default(),
        }));

        let reason = format!(
            "{cause}; rollback also failed for: {}",
            unrestorable
                .iter()
                .map(|(p, e)| format!("{} ({e})", p.display()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Error::StuckTransaction {
            tx_id,
            reason,
            git_fallback: git_fallback_command(&self.project_root, &paths),
            unrestorable: paths,
        }
    }

    pub fn create_checkpoint(&mut self, name: impl Into<String>, now: i64) {
        self.push_undo(JournalEntry::Checkpoint(CheckpointEntry {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp: now,
        }));
    }

    /// Record a drift detection as a pseudo-transaction on the undo stack.
    pub fn record_external_change(
        &mut self,
        path: &Path,
        previous_snapshot: Option<String>,
        previous_crc: u32,
        current_crc: u32,
        description: impl Into<String>,
        now: i64,
    ) {
        self.push_undo(JournalEntry::ExternalChange(ExternalChangeEntry {
            id: Uuid::new_v4().to_string(),
            path: path.to_path_buf(),
            previous_snapshot,
            previous_crc,
            current_crc,
            description: description.into(),
            timestamp: now,
            status: EntryStatus::Committed,
        }));
    }

    /// Pop and discard the top entry's referenced snapshots, if any, without
    /// restoring it. Used internally on eviction and redo-stack clearing.
    fn discard_entry_snapshots(&self, entry: &JournalEntry) {
        for id in entry.snapshot_ids() {
            let _ = self.snapshots.delete(id);
        }
    }

    fn push_undo(&mut self, entry: JournalEntry) {
        let cleared_entries: Vec<_> = self.redo_stack.drain(..).collect();
        for cleared in &cleared_entries {
            self.discard_entry_snapshots(cleared);
        }
        self.undo_stack.push(entry);
        if self.undo_stack.len() > self.max_history {
            let evicted = self.undo_stack.remove(0);
            self.discard_entry_snapshots(&evicted);
        }
    }

    /// Undo the topmost entry. Returns the entry as it looked before
    /// restoration (for the caller to report), with its status updated to
    /// `Stuck` in place if restoration was incomplete.
    pub fn undo(
        &mut self,
        lineage: &LineageTracker,
        external_changes: &ExternalChangeTracker,
        now: i64,
    ) -> Result<Option<JournalEntry>> {
        let Some(mut entry) = self.undo_stack.pop() else {
            return Ok(None);
        };
        let _ = now;

        let report = undo::apply_undo(&self.snapshots, &self.project_root, lineage, external_changes, &entry);
        match report.outcome {
            undo::UndoOutcome::Success | undo::UndoOutcome::ResolvedMove => {
                self.redo_stack.push(report.inverse);
                self.total_undos += 1;
                Ok(Some(entry))
            }
            undo::UndoOutcome::Partial | undo::UndoOutcome::Failed => {
                if let Some(status) = entry.status_mut() {
                    *status = EntryStatus::Stuck;
                }
                self.undo_stack.push(entry.clone());
                if report.progress {
                    self.redo_stack.push(report.inverse.clone());
                    self.total_undos += 1;
                }
                Err(self.stuck_error(entry.id(), &report))
            }
        }
    }

    /// Redo the topmost entry on the redo stack.
    pub fn redo(
        &mut self,
        lineage: &LineageTracker,
        external_changes: &ExternalChangeTracker,
    ) -> Result<Option<JournalEntry>> {
        let Some(mut entry) = self.redo_stack.pop() else {
            return Ok(None);
        };

        let report = undo::apply_undo(&self.snapshots, &self.project_root, lineage, external_changes, &entry);
        match report.outcome {
            undo::UndoOutcome::Success | undo::UndoOutcome::ResolvedMove => {
                self.undo_stack.push(report.inverse);
                Ok(Some(entry))
            }
            undo::UndoOutcome::Partial | undo::UndoOutcome::Failed => {
                if let Some(status) = entry.status_mut() {
                    *status = EntryStatus::Stuck;
                }
                self.redo_stack.push(entry.clone());
                if report.progress {
                    self.undo_stack.push(report.inverse.clone());
                }
                Err(self.stuck_error(entry.id(), &report))
            }
        }
    }

    /// Repeatedly undo until the named checkpoint has been passed (popped).
    pub fn rollback_to_checkpoint(
        &mut self,
        name: &str,
        lineage: &LineageTracker,
        external_changes: &ExternalChangeTracker,
        now: i64,
    ) -> Result<usize> {
        let mut undone = 0;
        loop {
            let Some(top) = self.undo_stack.last() else {
                return Err(Error::TransactionError(format!("checkpoint '{name}' not found")));
            };
            let is_target = top.is_checkpoint_named(name);
            self.undo(lineage, external_changes, now)?;
            undone += 1;
            if is_target {
                return Ok(undone);
            }
        }
    }

    /// Build a `StuckTransaction` from an incomplete `UndoReport`, combining
    /// every per-file failure reason and relocation note into one message.
    fn stuck_error(&self, tx_id: &str, report: &undo::UndoReport) -> Error {
        let unrestorable: Vec<PathBuf> = report.failed.iter().map(|(p, _)| p.clone()).collect();
        let reason = report
            .failed
            .iter()
            .map(|(p, r)| format!("{}: {r}", p.display()))
            .chain(report.notes.iter().map(|n| format!("{}: {}", n.path.display(), n.note)))
            .collect::<Vec<_>>()
            .join("; ");
        Error::StuckTransaction {
            tx_id: tx_id.to_string(),
            reason,
            git_fallback: git_fallback_command(&self.project_root, &unrestorable),
            unrestorable,
        }
    }

    fn compute_diff_stats(&self, files: &[(PathBuf, Option<String>)]) -> Result<DiffStats> {
        let mut stats = DiffStats::default();
        for (path, snapshot_id) in files {
            let before = match snapshot_id {
                Some(id) => String::from_utf8_lossy(&self.snapshots.read_bytes(id)?).into_owned(),
                None => String::new(),
            };
            let after = if path.exists() {
                String::from_utf8_lossy(&std::fs::read(path)?).into_owned()
            } else {
                String::new()
            };

            let patch = diffy::create_patch(&before, &after);
            let mut changed_lines: Vec<String> = Vec::new();
            for hunk in patch.hunks() {
                for line in hunk.lines() {
                    match line {
                        diffy::Line::Insert(text) => {
                            stats.lines_added += 1;
                            changed_lines.push(text.to_string());
                        }
                        diffy::Line::Delete(_) => stats.lines_deleted += 1,
                        diffy::Line::Context(_) => {}
                    }
                }
            }
            let refs: Vec<&str> = changed_lines.iter().map(|s| s.as_str()).collect();
            for block in extract_affected_blocks(&refs) {
                if !stats.affected_blocks.contains(&block) {
                    stats.affected_blocks.push(block);
                }
            }
        }
        Ok(stats)
    }
}

/// A ready-to-run shell command suggesting the project's Git checkout as a
/// manual fallback for paths the transaction engine could not restore.
fn git_fallback_command(root: &Path, paths: &[PathBuf]) -> String {
    let relative: Vec<String> = paths
        .iter()
        .map(|p| p.strip_prefix(root).unwrap_or(p).display().to_string())
        .collect();
    format!("git -C {} checkout -- {}", root.display(), relative.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(project_root: &Path) -> TransactionManager {
        let store = SnapshotStore::new(project_root.join(".nts/sessions/test"));
        TransactionManager::new(project_root.to_path_buf(), store, 50)
    }

    #[test]
    fn commit_records_one_transaction_and_clears_depth() {
        let temp = TempDir::new().unwrap();
        let mut tx = manager(temp.path());
        let file = temp.path().join("a.txt");
        std::fs::write(&file, "v1").unwrap();

        tx.start_transaction("edit a", None, 1000);
        tx.backup(&file).unwrap();
        std::fs::write(&file, "v2").unwrap();
        let entry = tx.commit(1001).unwrap().unwrap();

        assert!(!tx.is_in_transaction());
        assert_eq!(tx.undo_stack().len(), 1);
        assert_eq!(entry.status, EntryStatus::Committed);
    }

    #[test]
    fn nested_transactions_only_commit_at_outer_depth() {
        let temp = TempDir::new().unwrap();
        let mut tx = manager(temp.path());
        tx.start_transaction("outer", None, 1000);
        tx.start_transaction("inner", None, 1000);
        assert_eq!(tx.commit(1001).unwrap(), None);
        assert!(tx.is_in_transaction());
        let entry = tx.commit(1002).unwrap();
        assert!(entry.is_some());
        assert!(!tx.is_in_transaction());
    }

    #[test]
    fn rollback_restores_prior_content_at_any_depth() {
        let temp = TempDir::new().unwrap();
        let mut tx = manager(temp.path());
        let file = temp.path().join("a.txt");
        std::fs::write(&file, "v1").unwrap();

        tx.start_transaction("outer", None, 1000);
        tx.backup(&file).unwrap();
        std::fs::write(&file, "v2").unwrap();
        tx.start_transaction("inner", None, 1000);
        tx.rollback().unwrap();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v1");
        assert!(!tx.is_in_transaction());
        assert!(tx.undo_stack().is_empty());
    }

    #[test]
    fn undo_moves_entry_to_redo_stack() {
        let temp = TempDir::new().unwrap();
        let mut tx = manager(temp.path());
        let lineage = LineageTracker::new();
        let external_changes = ExternalChangeTracker::new();
        let file = temp.path().join("a.txt");
        std::fs::write(&file, "v1").unwrap();

        tx.start_transaction("edit a", None, 1000);
        tx.backup(&file).unwrap();
        std::fs::write(&file, "v2").unwrap();
        tx.commit(1001).unwrap();

        tx.undo(&lineage, &external_changes, 1002).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v1");
        assert_eq!(tx.total_undos(), 1);
        assert_eq!(tx.redo_stack().len(), 1);

        tx.redo(&lineage, &external_changes).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v2");
    }

    #[test]
    fn eviction_beyond_max_history_deletes_oldest_snapshot() {
        let temp = TempDir::new().unwrap();
        let mut tx = manager(temp.path());
        tx.max_history = 1;
        let file_a = temp.path().join("a.txt");
        let file_b = temp.path().join("b.txt");
        std::fs::write(&file_a, "a1").unwrap();
        std::fs::write(&file_b, "b1").unwrap();

        tx.start_transaction("edit a", None, 1000);
        tx.backup(&file_a).unwrap();
        std::fs::write(&file_a, "a2").unwrap();
        tx.commit(1001).unwrap();

        tx.start_transaction("edit b", None, 1002);
        tx.backup(&file_b).unwrap();
        std::fs::write(&file_b, "b2").unwrap();
        tx.commit(1003).unwrap();

        assert_eq!(tx.undo_stack().len(), 1);
    }
}
