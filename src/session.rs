// src/session.rs
//! Session context: the per-session holder for every tracker, journal, and
//! snapshot directory. (spec component M)

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::AccessTracker;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::external_change::ExternalChangeTracker;
use crate::lat::LatIssuer;
use crate::lineage::LineageTracker;
use crate::sandbox::Sandbox;
use crate::snapshot::SnapshotStore;
use crate::transaction::journal::JournalEntry;
use crate::transaction::TransactionManager;

const LOCK_RETRIES: u32 = 5;
const LOCK_BASE_BACKOFF_MS: u64 = 100;

/// Durable journal payload, written atomically to
/// `<session_dir>/journal.json` after every stack-mutating operation.
///
/// Always written as v2 (stacks nested under `transactions`); v1 (top-level
/// `undo_stack`/`redo_stack`) is accepted on read for compatibility with
/// journals written by older sessions.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum JournalFile {
    V2(JournalFileV2),
    V1(JournalFileV1),
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalFileV2 {
    schema_version: u32,
    transactions: JournalStacks,
    lineage: LineageTracker,
    external_changes: ExternalChangeTracker,
    active_todo: Option<String>,
    total_edits: usize,
    total_undos: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalFileV1 {
    undo_stack: Vec<JournalEntry>,
    redo_stack: Vec<JournalEntry>,
    lineage: LineageTracker,
    external_changes: ExternalChangeTracker,
    active_todo: Option<String>,
    total_edits: usize,
    total_undos: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalStacks {
    undo_stack: Vec<JournalEntry>,
    redo_stack: Vec<JournalEntry>,
}

pub struct Session {
    pub id: String,
    pub sandbox: Sandbox,
    pub access: AccessTracker,
    pub lat_issuer: LatIssuer,
    pub external_changes: ExternalChangeTracker,
    pub lineage: LineageTracker,
    pub tx: TransactionManager,
    pub active_todo: Option<String>,
    _lock_file: File,
}

impl Session {
    fn session_dir(sandbox: &Sandbox, id: &str) -> PathBuf {
        sandbox.session_root(id)
    }

    /// Create (or rehydrate) a session, taking an exclusive lock on its
    /// directory with retrying exponential backoff so two processes cannot
    /// run the same session concurrently.
    pub fn open(sandbox: Sandbox, id: String) -> Result<Self> {
        let session_dir = Self::session_dir(&sandbox, &id);
        std::fs::create_dir_all(&session_dir)?;

        let lock_path = session_dir.join("session.lock");
        let lock_file = File::create(&lock_path)?;
        acquire_lock(&lock_file)?;

        let max_history = sandbox.config().max_undo_history;
        let snapshots = SnapshotStore::new(session_dir.clone());
        let secret = session_secret(&id);

        let mut session = Self {
            lat_issuer: LatIssuer::new(id.clone(), secret),
            id,
            tx: TransactionManager::new(sandbox.project_root().to_path_buf(), snapshots, max_history),
            access: AccessTracker::new(),
            external_changes: ExternalChangeTracker::new(),
            lineage: LineageTracker::new(),
            active_todo: None,
            sandbox,
            _lock_file: lock_file,
        };

        session.load_journal()?;
        Ok(session)
    }

    fn journal_path(&self) -> PathBuf {
        Self::session_dir(&self.sandbox, &self.id).join("journal.json")
    }

    /// Serialize current state to `journal.json`. Best-effort: failures are
    /// logged but never propagated as a failure of the in-memory operation
    /// that triggered the save.
    pub fn save_journal(&self) {
        let file = JournalFile::V2(JournalFileV2 {
            schema_version: 2,
            transactions: JournalStacks {
                undo_stack: self.tx.undo_stack().to_vec(),
                redo_stack: self.tx.redo_stack().to_vec(),
            },
            lineage: clone_lineage(&self.lineage),
            external_changes: clone_external_changes(&self.external_changes),
            active_todo: self.active_todo.clone(),
            total_edits: self.tx.total_edits(),
            total_undos: self.tx.total_undos(),
        });

        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = atomic_write(&self.journal_path(), &json) {
                    log::warn!("session {}: failed to persist journal: {e}", self.id);
                }
            }
            Err(e) => log::warn!("session {}: failed to serialize journal: {e}", self.id),
        }
    }

    /// Reconstruct state from `journal.json`, dropping entries whose
    /// referenced snapshot files no longer exist on disk. A missing journal
    /// file means a fresh session; this is not an error.
    fn load_journal(&mut self) -> Result<()> {
        let path = self.journal_path();
        if !path.exists() {
            return Ok(());
        }

        let text = std::fs::read_to_string(&path)?;
        let file: JournalFile = serde_json::from_str(&text)?;
        let (undo_stack, redo_stack, lineage, external_changes, active_todo, total_edits, total_undos) =
            match file {
                JournalFile::V2(v2) => (
                    v2.transactions.undo_stack,
                    v2.transactions.redo_stack,
                    v2.lineage,
                    v2.external_changes,
                    v2.active_todo,
                    v2.total_edits,
                    v2.total_undos,
                ),
                JournalFile::V1(v1) => (
                    v1.undo_stack,
                    v1.redo_stack,
                    v1.lineage,
                    v1.external_changes,
                    v1.active_todo,
                    v1.total_edits,
                    v1.total_undos,
                ),
            };

        let snapshots_dir = self.tx_snapshots_dir();
        let undo = filter_valid(undo_stack, &snapshots_dir);
        let redo = filter_valid(redo_stack, &snapshots_dir);

        self.tx.restore_stacks(undo, redo);
        self.tx.set_counters(total_edits, total_undos);
        self.lineage = lineage;
        self.external_changes = external_changes;
        self.active_todo = active_todo;
        Ok(())
    }

    fn tx_snapshots_dir(&self) -> PathBuf {
        Self::session_dir(&self.sandbox, &self.id).join("snapshots")
    }

    pub fn reset(&mut self) {
        self.access.reset();
        self.lineage = LineageTracker::new();
        self.external_changes = ExternalChangeTracker::new();
        self.tx.restore_stacks(Vec::new(), Vec::new());
        self.tx.set_counters(0, 0);
        self.active_todo = None;
        self.save_journal();
    }

    pub fn unlocked_file_count(&self) -> usize {
        self.access.read_count()
    }
}

fn filter_valid(entries: Vec<JournalEntry>, snapshots_dir: &std::path::Path) -> Vec<JournalEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            entry
                .snapshot_ids()
                .iter()
                .all(|id| snapshots_dir.join(format!("{id}.bak")).exists())
        })
        .collect()
}

fn clone_lineage(lineage: &LineageTracker) -> LineageTracker {
    serde_json::from_value(serde_json::to_value(lineage).expect("lineage is serializable"))
        .expect("lineage round-trips through json")
}

fn clone_external_changes(tracker: &ExternalChangeTracker) -> ExternalChangeTracker {
    serde_json::from_value(serde_json::to_value(tracker).expect("tracker is serializable"))
        .expect("tracker round-trips through json")
}

fn atomic_write(path: &std::path::Path, content: &str) -> Result<()> {
    let temp = path.with_extension("json.tmp");
    std::fs::write(&temp, content)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

fn acquire_lock(file: &File) -> Result<()> {
    let mut delay = LOCK_BASE_BACKOFF_MS;
    for attempt in 0..LOCK_RETRIES {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if attempt + 1 < LOCK_RETRIES => {
                std::thread::sleep(std::time::Duration::from_millis(delay));
                delay *= 2;
            }
            Err(e) => {
                return Err(Error::TransactionError(format!(
                    "could not acquire session lock after {LOCK_RETRIES} attempts: {e}"
                )))
            }
        }
    }
    Ok(())
}

/// Deterministic per-session signing secret. Derived rather than random so a
/// rehydrated session (after a process restart) can still validate LATs it
/// issued before the restart.
fn session_secret(session_id: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"nts-fs-session-secret-v1");
    hasher.update(session_id.as_bytes());
    let digest = hasher.finalize();
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&digest);
    secret
}

/// Holds every active session for one process, keyed by session id.
pub struct SessionManager {
    sandbox: Sandbox,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(project_root: PathBuf, config: Config) -> Result<Self> {
        Ok(Self {
            sandbox: Sandbox::new(project_root, config)?,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_or_create(&self, session_id: Option<String>) -> Result<Arc<Mutex<Session>>> {
        let id = session_id.unwrap_or_else(default_session_id);
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| Error::TransactionError("session registry lock poisoned".into()))?;
        if let Some(existing) = sessions.get(&id) {
            return Ok(existing.clone());
        }
        let session = Session::open(self.sandbox.clone(), id.clone())?;
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(id, handle.clone());
        Ok(handle)
    }
}

fn default_session_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}
