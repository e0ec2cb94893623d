// src/collab.rs
//! External collaborators: thin wrappers around Git, a markdown TODO list,
//! and plain directory/text search. None of these contribute novel
//! transaction semantics; they exist so the router has something to dispatch
//! to for tool names outside the core subsystem.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};

fn run_git(project_root: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new("git")
        .current_dir(project_root)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let start = std::time::Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            let output = child.wait_with_output()?;
            if status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            return Err(Error::TransactionError(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            return Err(Error::TransactionError(format!(
                "git {} timed out after {:?}",
                args.join(" "),
                timeout
            )));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

pub fn git_checkpoint(project_root: &Path, config: &Config, message: &str) -> Result<String> {
    let timeout = Duration::from_secs(config.git_commit_timeout_secs);
    run_git(project_root, &["add", "-A"], timeout)?;
    run_git(project_root, &["commit", "--allow-empty", "-m", message], timeout)
}

pub fn git_restore(project_root: &Path, config: &Config, revision: &str) -> Result<String> {
    let timeout = Duration::from_secs(config.git_commit_timeout_secs);
    run_git(project_root, &["checkout", revision, "--", "."], timeout)
}

pub fn git_commit_session(project_root: &Path, config: &Config, message: &str) -> Result<String> {
    git_checkpoint(project_root, config, message)
}

const TODOS_DIR: &str = "todos";

#[derive(Debug, Clone)]
pub struct TodoProgress {
    pub done: usize,
    pub pending: usize,
    pub next_task: Option<String>,
}

/// Create `<project_root>/.nts/todos/TODO_<yyyymmdd_hhmmss>.md` from a list
/// of task titles, returning its path.
pub fn create_todo(nts_dir: &Path, timestamp_tag: &str, tasks: &[String]) -> Result<PathBuf> {
    let dir = nts_dir.join(TODOS_DIR);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("TODO_{timestamp_tag}.md"));
    let mut body = String::new();
    for task in tasks {
        body.push_str("- [ ] ");
        body.push_str(task);
        body.push('\n');
    }
    std::fs::write(&path, body)?;
    Ok(path)
}

/// Toggle the checkbox of the `index`-th task (0-based) to done or pending.
pub fn update_todo(path: &Path, index: usize, done: bool) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
    let marker = if done { "- [x] " } else { "- [ ] " };
    let other_marker = if done { "- [ ] " } else { "- [x] " };

    if let Some(line) = lines.get_mut(index) {
        if let Some(rest) = line.strip_prefix(other_marker) {
            *line = format!("{marker}{rest}");
        } else if let Some(rest) = line.strip_prefix(marker) {
            *line = format!("{marker}{rest}");
        }
    }
    std::fs::write(path, lines.join("\n") + "\n")?;
    Ok(())
}

/// Line-counting checklist progress only; no structural parsing beyond the
/// leading `- [ ]` / `- [x]` marker.
pub fn todo_progress(path: &Path) -> Result<TodoProgress> {
    let text = std::fs::read_to_string(path)?;
    let mut done = 0;
    let mut pending = 0;
    let mut next_task = None;

    for line in text.lines() {
        if let Some(title) = line.strip_prefix("- [x] ") {
            done += 1;
            let _ = title;
        } else if let Some(title) = line.strip_prefix("- [ ] ") {
            pending += 1;
            if next_task.is_none() {
                next_task = Some(title.to_string());
            }
        }
    }

    Ok(TodoProgress { done, pending, next_task })
}

#[derive(Debug, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub fn list_directory(path: &Path) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type()?.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// A flat directory tree listing: no symbol-level awareness, just paths.
pub fn project_structure(root: &Path, max_depth: usize) -> Vec<String> {
    WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !is_hidden(e.path()))
        .map(|e| e.path().strip_prefix(root).unwrap_or(e.path()).to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.') && s != "." && s != "..")
            .unwrap_or(false)
    })
}

pub fn find_file(root: &Path, name_pattern: &str) -> Result<Vec<String>> {
    let re = Regex::new(name_pattern).map_err(|e| Error::InvalidPath(format!("invalid pattern: {e}")))?;
    let matches = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| re.is_match(n))
                .unwrap_or(false)
        })
        .map(|e| e.path().strip_prefix(root).unwrap_or(e.path()).to_string_lossy().into_owned())
        .collect();
    Ok(matches)
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// Plain regex grep across text files; no tree-sitter symbol awareness.
pub fn search_files(root: &Path, pattern: &str) -> Result<Vec<SearchHit>> {
    let re = Regex::new(pattern).map_err(|e| Error::InvalidPath(format!("invalid pattern: {e}")))?;
    let mut hits = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_hidden(path) || crate::ioutil::is_binary(path).unwrap_or(true) {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        for (i, line) in text.lines().enumerate() {
            if re.is_match(line) {
                hits.push(SearchHit {
                    path: path.strip_prefix(root).unwrap_or(path).to_string_lossy().into_owned(),
                    line: i + 1,
                    text: line.to_string(),
                });
            }
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_and_update_todo_toggles_checkbox() {
        let temp = TempDir::new().unwrap();
        let nts_dir = temp.path().join(".nts");
        let path = create_todo(&nts_dir, "20260101_000000", &["first".into(), "second".into()]).unwrap();

        update_todo(&path, 0, true).unwrap();
        let progress = todo_progress(&path).unwrap();
        assert_eq!(progress.done, 1);
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.next_task, Some("second".to_string()));
    }

    #[test]
    fn find_file_matches_by_name_regex() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("main.rs"), "").unwrap();
        std::fs::write(temp.path().join("lib.rs"), "").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "").unwrap();

        let matches = find_file(temp.path(), r"\.rs$").unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn search_files_finds_matching_lines() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "hello\nworld\nhello again\n").unwrap();
        let hits = search_files(temp.path(), "hello").unwrap();
        assert_eq!(hits.len(), 2);
    }
}
