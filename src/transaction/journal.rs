// src/transaction/journal.rs
//! Journal entry types: the closed sum of things that appear in a session's
//! undo/redo stacks. Pattern-matched by tag when serializing and when
//! rendering the journal view; never a trait object.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Committed,
    Stuck,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffStats {
    pub lines_added: usize,
    pub lines_deleted: usize,
    /// Names heuristically extracted from changed signature-like lines
    /// (function/struct/class declarations), for a human-readable summary.
    pub affected_blocks: Vec<String>,
}

/// One file's disposition within a transaction scope: the snapshot id to
/// restore from on rollback, or `None` if the file did not exist before the
/// scope touched it (rollback deletes it).
pub type FileBackup = (PathBuf, Option<String>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub id: String,
    pub description: String,
    pub instruction: Option<String>,
    pub timestamp: i64,
    pub status: EntryStatus,
    pub files: Vec<FileBackup>,
    pub diff_stats: DiffStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalChangeEntry {
    pub id: String,
    pub path: PathBuf,
    pub previous_snapshot: Option<String>,
    pub previous_crc: u32,
    pub current_crc: u32,
    pub description: String,
    pub timestamp: i64,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub id: String,
    pub name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JournalEntry {
    Transaction(TransactionEntry),
    ExternalChange(ExternalChangeEntry),
    Checkpoint(CheckpointEntry),
}

impl JournalEntry {
    pub fn id(&self) -> &str {
        match self {
            JournalEntry::Transaction(t) => &t.id,
            JournalEntry::ExternalChange(e) => &e.id,
            JournalEntry::Checkpoint(c) => &c.id,
        }
    }

    pub fn status_mut(&mut self) -> Option<&mut EntryStatus> {
        match self {
            JournalEntry::Transaction(t) => Some(&mut t.status),
            JournalEntry::ExternalChange(e) => Some(&mut e.status),
            JournalEntry::Checkpoint(_) => None,
        }
    }

    pub fn is_checkpoint_named(&self, name: &str) -> bool {
        matches!(self, JournalEntry::Checkpoint(c) if c.name == name)
    }

    /// Snapshot ids referenced by this entry, for eviction cleanup.
    pub fn snapshot_ids(&self) -> Vec<&str> {
        match self {
            JournalEntry::Transaction(t) => t
                .files
                .iter()
                .filter_map(|(_, id)| id.as_deref())
                .collect(),
            JournalEntry::ExternalChange(e) => {
                e.previous_snapshot.as_deref().into_iter().collect()
            }
            JournalEntry::Checkpoint(_) => Vec::new(),
        }
    }
}

/// Extract heuristic signature-line names from a unified diff's added lines,
/// used as `diff_stats.affected_blocks`. Matches common declaration
/// keywords across languages rather than parsing any one grammar.
pub fn extract_affected_blocks(changed_lines: &[&str]) -> Vec<String> {
    let pattern = regex::Regex::new(
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:fn|struct|enum|impl|trait|class|def|function|interface)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("static regex is valid");

    let mut names = Vec::new();
    for line in changed_lines {
        if let Some(captures) = pattern.captures(line)
            && let Some(name) = captures.get(1)
        {
            let name = name.as_str().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_affected_blocks_finds_function_and_struct_names() {
        let lines = vec![
            "pub fn commit(&mut self) -> Result<()> {",
            "    let x = 1;",
            "struct DiffStats {",
        ];
        let names = extract_affected_blocks(&lines);
        assert_eq!(names, vec!["commit".to_string(), "DiffStats".to_string()]);
    }

    #[test]
    fn is_checkpoint_named_matches_only_checkpoints() {
        let entry = JournalEntry::Checkpoint(CheckpointEntry {
            id: "1".into(),
            name: "before-refactor".into(),
            timestamp: 0,
        });
        assert!(entry.is_checkpoint_named("before-refactor"));
        assert!(!entry.is_checkpoint_named("other"));
    }
}
