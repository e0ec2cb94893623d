// src/ops.rs
//! File operations: create, delete, move, rename, read, edit, and
//! project-wide search/replace — every one of them transaction-aware.
//! (spec component K)

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::edit::EditRequest;
use crate::error::{Error, Result};
use crate::external_change::ExternalChangeSnapshot;
use crate::ioutil::{self, Encoding};
use crate::lat::{self, Validation};
use crate::session::Session;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Run `body` inside the scope most recently opened by `start_transaction`.
/// Any error it returns — an IO failure mid-write, a validation failure, a
/// commit failing its own invariants — aborts the open scope instead of
/// leaving it dangling for the next `start_transaction` call to silently
/// absorb. If the abort itself cannot restore every touched file, the
/// returned error becomes a `StuckTransaction` naming the survivors.
fn in_transaction<T>(session: &mut Session, body: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
    body(session).map_err(|e| session.tx.abort_scope(e))
}

#[derive(Debug, Serialize)]
pub struct ReadResult {
    pub content: String,
    pub token: String,
    pub line_count: usize,
    pub encoding: String,
}

/// Read a file, registering it with the access tracker and the
/// external-change tracker, and issuing a LAT covering the returned range.
pub fn read_file(
    session: &mut Session,
    path: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Result<ReadResult> {
    let resolved = session.sandbox.sanitize(path, false)?;
    session.sandbox.check_file_size(&resolved)?;

    let (full_text, encoding) = ioutil::read_text(&resolved)?;
    let total_lines = ioutil::line_count(&full_text);
    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(total_lines).min(total_lines.max(1));
    let content = ioutil::line_range_bytes(&full_text, start, end);

    let token = session
        .lat_issuer
        .issue(path, start, end, &full_text, total_lines, now());

    session.access.register_read(&resolved);
    let byte_size = std::fs::metadata(&resolved)?.len();
    session.external_changes.record(
        &resolved,
        ExternalChangeSnapshot::capture(&full_text, encoding, byte_size),
    );

    Ok(ReadResult {
        content,
        token,
        line_count: total_lines,
        encoding: format!("{encoding:?}"),
    })
}

#[derive(Debug, Serialize)]
pub struct EditResult {
    pub token: String,
    pub line_count: usize,
    pub crc32c: u32,
}

/// Apply an edit request to a file, under optimistic-lock protection from
/// either a LAT (`access_token`) or a direct `expected_checksum`.
pub fn edit_file(
    session: &mut Session,
    path: &str,
    request: EditRequest,
    access_token: Option<&str>,
    expected_checksum: Option<u32>,
) -> Result<EditResult> {
    let resolved = session.sandbox.sanitize(path, false)?;
    let exists = resolved.exists();

    let (current_text, encoding) = if exists {
        ioutil::read_text(&resolved)?
    } else {
        (String::new(), Encoding::Utf8)
    };
    let current_lines = ioutil::line_count(&current_text);

    let infinity_range = validate_edit_precondition(
        session,
        &resolved,
        access_token,
        expected_checksum,
        &current_text,
        current_lines,
    )?;

    check_external_drift(session, &resolved, &current_text)?;

    session.tx.start_transaction(format!("edit {path}"), None, now());
    let result = in_transaction(session, |session| {
        session.tx.backup(&resolved)?;

        let new_text = crate::edit::apply_edit(&current_text, &request, infinity_range)?;

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        ioutil::safe_write(&resolved, &new_text, encoding)?;

        let bytes = new_text.as_bytes();
        let crc = ioutil::crc32c(bytes);
        let new_line_count = ioutil::line_count(&new_text);

        session.lineage.update_crc(&resolved, bytes, now());
        session.external_changes.record(
            &resolved,
            ExternalChangeSnapshot::capture(&new_text, encoding, bytes.len() as u64),
        );
        session.access.register_read(&resolved);

        let path_str = resolved.to_string_lossy().into_owned();
        let token = session
            .lat_issuer
            .issue(&path_str, 1, new_line_count.max(1), &new_text, new_line_count, now());

        session.tx.commit(now())?;

        Ok(EditResult {
            token,
            line_count: new_line_count,
            crc32c: crc,
        })
    })?;

    session.save_journal();
    Ok(result)
}

fn validate_edit_precondition(
    session: &mut Session,
    resolved: &Path,
    access_token: Option<&str>,
    expected_checksum: Option<u32>,
    current_text: &str,
    current_lines: usize,
) -> Result<bool> {
    if let Some(token) = access_token {
        let validation = session.lat_issuer.validate(token, current_text, current_lines);
        let infinity_range = matches!(validation, Validation::Ok)
            && session
                .lat_issuer
                .decode_and_verify(token)
                .map(|p| p.infinity_range)
                .unwrap_or(false);
        let result: Result<()> = validation.into();
        result?;
        session.access.register_read(resolved);
        return Ok(infinity_range);
    }

    session
        .access
        .require_read_or_checksum(resolved, expected_checksum)?;
    Ok(false)
}

fn check_external_drift(session: &mut Session, resolved: &Path, current_text: &str) -> Result<()> {
    let check = session.external_changes.check_drift(resolved)?;
    if check.drifted {
        session.tx.record_external_change(
            resolved,
            None,
            check.previous_crc,
            check.current_crc,
            "external modification detected before write",
            now(),
        );
        session.external_changes.record(
            resolved,
            ExternalChangeSnapshot::capture(current_text, Encoding::Utf8, current_text.len() as u64),
        );
    }
    Ok(())
}

pub fn create_file(
    session: &mut Session,
    path: &str,
    content: &str,
    allow_protected: bool,
) -> Result<String> {
    let resolved = session.sandbox.sanitize(path, allow_protected)?;
    if resolved.exists() {
        session.access.require_read_or_checksum(&resolved, None)?;
    }

    session.tx.start_transaction(format!("create {path}"), None, now());
    let token = in_transaction(session, |session| {
        session.tx.backup(&resolved)?;

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        ioutil::safe_write(&resolved, content, Encoding::Utf8)?;

        session.lineage.register_file(&resolved, content.as_bytes(), now());
        let byte_size = content.len() as u64;
        session
            .external_changes
            .record(&resolved, ExternalChangeSnapshot::capture(content, Encoding::Utf8, byte_size));
        session.access.register_read(&resolved);

        let line_count = ioutil::line_count(content);
        let path_str = resolved.to_string_lossy().into_owned();
        let token = session
            .lat_issuer
            .issue_infinity_range(&path_str, line_count, now());

        session.tx.commit(now())?;
        Ok(token)
    })?;

    session.save_journal();
    Ok(token)
}

pub fn delete_file(
    session: &mut Session,
    path: &str,
    recursive: bool,
    allow_protected: bool,
) -> Result<()> {
    let resolved = session.sandbox.sanitize(path, allow_protected)?;
    if !resolved.exists() {
        return Err(Error::InvalidPath(format!("{} does not exist", resolved.display())));
    }

    session.tx.start_transaction(format!("delete {path}"), None, now());
    in_transaction(session, |session| {
        if resolved.is_dir() {
            let mut entries = std::fs::read_dir(&resolved)?;
            if entries.next().is_some() && !recursive {
                return Err(Error::DirectoryNotEmpty(resolved.clone()));
            }
            let files: Vec<PathBuf> = WalkDir::new(&resolved)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.path().to_path_buf())
                .collect();
            for file in &files {
                session.tx.backup(file)?;
            }
            std::fs::remove_dir_all(&resolved)?;
        } else {
            session.tx.backup(&resolved)?;
            std::fs::remove_file(&resolved)?;
        }

        session.tx.commit(now())?;
        Ok(())
    })?;

    session.save_journal();
    Ok(())
}

pub fn move_file(
    session: &mut Session,
    from: &str,
    to: &str,
    allow_protected: bool,
) -> Result<()> {
    let resolved_from = session.sandbox.sanitize(from, allow_protected)?;
    let resolved_to = session.sandbox.sanitize(to, allow_protected)?;

    if resolved_to.exists() {
        return Err(Error::AlreadyExists(resolved_to));
    }
    if !resolved_from.exists() {
        return Err(Error::InvalidPath(format!("{} does not exist", resolved_from.display())));
    }

    session.tx.start_transaction(format!("move {from} -> {to}"), None, now());
    in_transaction(session, |session| {
        session.tx.backup(&resolved_from)?;
        session.tx.backup(&resolved_to)?;

        if let Some(parent) = resolved_to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        move_atomic(&resolved_from, &resolved_to)?;

        session.access.move_record(&resolved_from, &resolved_to);
        session.lineage.record_move(&resolved_from, &resolved_to, now());

        session.tx.commit(now())?;
        Ok(())
    })?;

    session.save_journal();
    Ok(())
}

/// Rename is move within the same parent directory; kept as a distinct
/// entry point because the external tool surface names it separately.
pub fn rename_file(
    session: &mut Session,
    path: &str,
    new_name: &str,
    allow_protected: bool,
) -> Result<()> {
    let resolved_from = session.sandbox.sanitize(path, allow_protected)?;
    let to = resolved_from
        .parent()
        .map(|p| p.join(new_name))
        .ok_or_else(|| Error::InvalidPath(format!("{path} has no parent directory")))?;
    let to_str = to.to_string_lossy().into_owned();
    move_file(session, path, &to_str, allow_protected)
}

fn move_atomic(from: &Path, to: &Path) -> Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            // EXDEV: cross-device rename. Fall back to copy-then-delete.
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
pub struct ReplaceMatch {
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReplaceResult {
    pub matches: Vec<ReplaceMatch>,
    pub diff: Option<String>,
    pub applied: bool,
}

/// Two-phase project-wide replace: a scan phase that never touches disk,
/// and an apply phase that runs inside a single transaction with a
/// preceding checkpoint.
pub fn project_replace(
    session: &mut Session,
    pattern: &str,
    replacement: &str,
    dry_run: bool,
) -> Result<ReplaceResult> {
    let re = Regex::new(pattern).map_err(|e| Error::InvalidPath(format!("invalid pattern: {e}")))?;
    let root = session.sandbox.project_root().to_path_buf();

    let mut matches = Vec::new();
    let mut diff_text = String::new();

    for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if session.sandbox.is_protected(path) {
            continue;
        }
        if ioutil::is_binary(path).unwrap_or(true) {
            continue;
        }
        if session.sandbox.check_file_size(path).is_err() {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => continue,
        };
        let count = re.find_iter(&text).count();
        if count == 0 {
            continue;
        }

        let relative = path.strip_prefix(&root).unwrap_or(path);
        matches.push(ReplaceMatch {
            path: relative.to_string_lossy().into_owned(),
            count,
        });

        if dry_run {
            let new_text = re.replace_all(&text, replacement).into_owned();
            let patch = diffy::create_patch(&text, &new_text);
            diff_text.push_str(&patch.to_string());
        }
    }

    if dry_run {
        return Ok(ReplaceResult {
            matches,
            diff: Some(diff_text),
            applied: false,
        });
    }

    if matches.is_empty() {
        return Ok(ReplaceResult {
            matches,
            diff: None,
            applied: false,
        });
    }

    session.tx.create_checkpoint("before-project-replace", now());
    session.tx.start_transaction(format!("project_replace {pattern}"), None, now());
    in_transaction(session, |session| {
        for m in &matches {
            let full_path = root.join(&m.path);
            session.tx.backup(&full_path)?;
            let text = std::fs::read_to_string(&full_path)?;
            let new_text = re.replace_all(&text, replacement).into_owned();
            ioutil::safe_write(&full_path, &new_text, Encoding::Utf8)?;

            session.external_changes.record(
                &full_path,
                ExternalChangeSnapshot::capture(&new_text, Encoding::Utf8, new_text.len() as u64),
            );
            let line_count = ioutil::line_count(&new_text);
            let _ = session
                .lat_issuer
                .issue(&m.path, 1, line_count.max(1), &new_text, line_count, now());
        }

        session.tx.commit(now())?;
        Ok(())
    })?;

    session.save_journal();

    Ok(ReplaceResult {
        matches,
        diff: None,
        applied: true,
    })
}

/// Validate a LAT without any file-level side effects, for callers (the
/// batch interpolator) that only need to know a token is well-formed.
pub fn decode_lat(session: &Session, token: &str) -> std::result::Result<lat::LatPayload, String> {
    session.lat_issuer.decode_and_verify(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::edit::{Hunk, HunkOp};
    use crate::sandbox::Sandbox;
    use tempfile::TempDir;

    fn session(temp: &TempDir) -> Session {
        let sandbox = Sandbox::new(temp.path().to_path_buf(), Config::default()).unwrap();
        Session::open(sandbox, "test-sess".to_string()).unwrap()
    }

    #[test]
    fn read_then_edit_with_lat_succeeds() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f.txt"), "a\nb\nc\n").unwrap();
        let mut session = session(&temp);

        let read = read_file(&mut session, "f.txt", None, None).unwrap();
        assert_eq!(read.content, "a\nb\nc\n");

        let request = EditRequest::Hunks(vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 2,
            end_line: Some(2),
            content: Some("B\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }]);
        let result = edit_file(&mut session, "f.txt", request, Some(&read.token), None).unwrap();
        assert_eq!(result.line_count, 3);

        let content = std::fs::read_to_string(temp.path().join("f.txt")).unwrap();
        assert_eq!(content, "a\nB\nc\n");
    }

    #[test]
    fn edit_without_read_or_checksum_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f.txt"), "a\n").unwrap();
        let mut session = session(&temp);

        let request = EditRequest::Hunks(vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 1,
            end_line: Some(1),
            content: Some("b\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }]);
        let result = edit_file(&mut session, "f.txt", request, None, None);
        assert!(matches!(result, Err(Error::NotRead(_))));
    }

    #[test]
    fn create_then_delete_round_trip() {
        let temp = TempDir::new().unwrap();
        let mut session = session(&temp);
        create_file(&mut session, "new.txt", "hello", false).unwrap();
        assert!(temp.path().join("new.txt").exists());

        delete_file(&mut session, "new.txt", false, false).unwrap();
        assert!(!temp.path().join("new.txt").exists());
    }

    #[test]
    fn move_to_existing_target_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::write(temp.path().join("b.txt"), "b").unwrap();
        let mut session = session(&temp);

        let result = move_file(&mut session, "a.txt", "b.txt", false);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn rename_migrates_access_record() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "hello\n").unwrap();
        let mut session = session(&temp);
        read_file(&mut session, "a.txt", None, None).unwrap();

        rename_file(&mut session, "a.txt", "b.txt", false).unwrap();
        assert!(temp.path().join("b.txt").exists());
        assert!(session.access.has_been_read(&temp.path().join("b.txt")));
    }

    #[test]
    fn project_replace_dry_run_does_not_touch_disk() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "Foo bar\n").unwrap();
        let mut session = session(&temp);

        let result = project_replace(&mut session, "Foo", "Bar", true).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert!(!result.applied);
        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "Foo bar\n");
    }

    #[test]
    fn delete_nonempty_directory_without_recursive_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("dir")).unwrap();
        std::fs::write(temp.path().join("dir/f.txt"), "x").unwrap();
        let mut session = session(&temp);

        let result = delete_file(&mut session, "dir", false, false);
        assert!(matches!(result, Err(Error::DirectoryNotEmpty(_))));
    }
}
