// src/error.rs
//! Crate-wide error type
//!
//! Every fatal condition in the error taxonomy gets its own variant so the
//! router (component N) can map it to a stable, user-facing diagnostic
//! without re-deriving context from a generic message string.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A path resolved outside the project root.
    #[error("path escapes project root: {0}")]
    SandboxEscape(PathBuf),

    /// A path is protected and the caller did not pass `allow_protected`.
    #[error("path is protected: {0} (pass allow_protected to override)")]
    Protected(PathBuf),

    /// A read exceeded the configured size cap.
    #[error("file too large: {path} is {size} bytes, max is {max}")]
    TooLarge {
        path: PathBuf,
        size: u64,
        max: u64,
    },

    /// A destructive op targeted a file with no read record and no checksum.
    #[error("{0} has not been read in this session; read it first or supply expected_checksum")]
    NotRead(PathBuf),

    /// A LAT or checksum precondition failed.
    #[error("optimistic lock failure on {path}: expected crc {expected:08x}, found {actual:08x}; re-read before editing")]
    OptimisticLockFailure {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    /// A LAT failed validation for a reason other than staleness.
    #[error("access token invalid: {0}")]
    InvalidToken(String),

    /// A hunk addressed a line range outside the file's bounds.
    #[error("addressing error in {path}: requested [{start}, {end:?}], file has {line_count} lines")]
    AddressingError {
        path: PathBuf,
        start: usize,
        end: Option<usize>,
        line_count: usize,
    },

    /// A hunk's `expected_content` did not match the file's current text.
    #[error("content mismatch in {path} at [{start}, {end}]:\n--- expected ---\n{expected}\n--- actual ---\n{actual}")]
    ContentMismatch {
        path: PathBuf,
        start: usize,
        end: usize,
        expected: String,
        actual: String,
    },

    /// A fuzzy `old_text` matched more than once.
    #[error("ambiguous match for old_text in {path}: {count} occurrences found; use an operation list with explicit line numbers")]
    AmbiguousMatch { path: PathBuf, count: usize },

    /// A fuzzy `old_text` matched zero times.
    #[error("no match for old_text in {0}")]
    NoMatch(PathBuf),

    /// An undo/redo/checkpoint traversal, or a write failure mid-transaction,
    /// left one or more files that could not be restored to a known-good
    /// state; the entry is marked STUCK in the journal. `unrestorable` lists
    /// every affected path and `git_fallback` is a ready-to-run command for
    /// recovering them manually.
    #[error("transaction {tx_id} is stuck: {reason}; unrestorable paths: {unrestorable:?}; fallback: {git_fallback}")]
    StuckTransaction {
        tx_id: String,
        reason: String,
        unrestorable: Vec<PathBuf>,
        git_fallback: String,
    },

    /// A destination for move/rename/create already exists.
    #[error("target already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A directory delete without recursive=true hit a non-empty directory.
    #[error("directory not empty: {0} (pass recursive=true)")]
    DirectoryNotEmpty(PathBuf),

    /// Batch orchestrator could not resolve a `{{ref.prop}}` interpolation.
    #[error("batch step {step} refers to unknown id/step '{reference}'")]
    UnknownInterpolationRef { step: usize, reference: String },

    /// Batch step failed; names the step index and tool for the caller.
    #[error("batch step {index} ({tool}) failed: {source}")]
    BatchStepFailed {
        index: usize,
        tool: String,
        #[source]
        source: Box<Error>,
    },

    /// Task was cancelled at a suspension point.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Generic transaction-state error (e.g. commit called at wrong depth).
    #[error("transaction error: {0}")]
    TransactionError(String),

    /// Journal or snapshot corruption that could not be recovered.
    #[error("journal error: {0}")]
    JournalError(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error represents a non-fatal, recoverable condition
    /// that the router should still report `isError: true` for, but that
    /// did not corrupt session state.
    pub fn is_fatal_to_op(&self) -> bool {
        !matches!(self, Error::Cancelled(_))
    }
}
