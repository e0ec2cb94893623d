// src/sandbox.rs
//! Path sandbox: canonicalization, confinement to the project root,
//! protected-path classification, and size caps. (spec component A)

use std::path::{Component, Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};

/// Leading path segments that are refused for mutation unless the caller
/// explicitly passes `allow_protected = true`.
const PROTECTED_SEGMENTS: &[&str] = &[".git", ".env", ".nts"];
const PROTECTED_FILENAMES: &[&str] = &["Cargo.toml", "package.json", "go.mod", "pyproject.toml"];

/// A sandbox handle constructed once at startup, bound to one project root.
///
/// The root is configuration: it must not change after the first operation
/// has committed, because journal and snapshot paths are computed against
/// it.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    config: Config,
}

impl Sandbox {
    pub fn new(root: PathBuf, config: Config) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|e| Error::InvalidPath(format!("cannot resolve project root: {e}")))?;
        Ok(Self { root, config })
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    pub fn session_root(&self, session_id: &str) -> PathBuf {
        self.root.join(".nts").join("sessions").join(session_id)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Canonicalize an untrusted, possibly-relative path against the
    /// project root, refusing escapes and (unless `allow_protected`)
    /// protected paths. Does not require the path to exist: parent
    /// components up to the first non-existent segment are resolved, the
    /// remainder is joined literally.
    pub fn sanitize(&self, path: impl AsRef<Path>, allow_protected: bool) -> Result<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let normalized = normalize(&joined)?;

        if !normalized.starts_with(&self.root) {
            return Err(Error::SandboxEscape(path.to_path_buf()));
        }

        // Resolve symlinks on the longest existing prefix, then re-check
        // containment: a symlink inside the tree could point outside it.
        let canonical = canonicalize_existing_prefix(&normalized)?;
        if !canonical.starts_with(&self.root) {
            return Err(Error::SandboxEscape(path.to_path_buf()));
        }

        if !allow_protected && self.is_protected(&normalized) {
            return Err(Error::Protected(normalized));
        }

        Ok(normalized)
    }

    /// Classify whether a (already-sanitized) path is protected.
    pub fn is_protected(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);

        if let Some(first) = relative.components().next()
            && let Component::Normal(segment) = first
            && PROTECTED_SEGMENTS.contains(&segment.to_string_lossy().as_ref())
        {
            return true;
        }

        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && PROTECTED_FILENAMES.contains(&name)
        {
            return true;
        }

        false
    }

    /// Enforce the configured size cap for read paths.
    pub fn check_file_size(&self, path: &Path) -> Result<()> {
        let metadata = std::fs::metadata(path)?;
        let size = metadata.len();
        if size > self.config.max_read_bytes {
            return Err(Error::TooLarge {
                path: path.to_path_buf(),
                size,
                max: self.config.max_read_bytes,
            });
        }
        Ok(())
    }
}

/// Normalize `.`/`..` components lexically without touching the filesystem,
/// refusing any `..` that would climb above the root.
fn normalize(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(Error::SandboxEscape(path.to_path_buf()));
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Canonicalize the longest existing ancestor of `path`, then re-append the
/// non-existent tail, so symlink resolution applies even to paths that
/// don't exist yet (e.g. a file about to be created).
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = existing.canonicalize().unwrap_or(existing);
    for segment in tail.into_iter().rev() {
        resolved.push(segment);
    }
    Ok(resolved)
}
