// src/lineage.rs
//! File lineage tracker: a content-hash keyed history of move/rename/edit
//! events per session, used by smart undo to relocate moved files. (spec
//! component F)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageAction {
    Register,
    Move,
    Edit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEvent {
    pub action: LineageAction,
    pub from: Option<PathBuf>,
    pub to: PathBuf,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageNode {
    pub current_path: PathBuf,
    pub content_hash_at_register: String,
    pub history: Vec<LineageEvent>,
}

/// The move graph can in principle form a cycle (A -> B -> A); lookups
/// always want the most recent location for a content hash, so the tracker
/// keeps an ordered edge list and queries its tail rather than a transitive
/// closure.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LineageTracker {
    nodes: HashMap<PathBuf, LineageNode>,
}

pub fn hash_content(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl LineageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path on creation or first touch, hashing its current
    /// content. A no-op if already registered at this exact path.
    pub fn register_file(&mut self, path: &Path, content: &[u8], timestamp: i64) {
        if self.nodes.contains_key(path) {
            return;
        }
        let hash = hash_content(content);
        self.nodes.insert(
            path.to_path_buf(),
            LineageNode {
                current_path: path.to_path_buf(),
                content_hash_at_register: hash,
                history: vec![LineageEvent {
                    action: LineageAction::Register,
                    from: None,
                    to: path.to_path_buf(),
                    timestamp,
                }],
            },
        );
    }

    /// Append a move edge, relocating the node from `old` to `new`.
    pub fn record_move(&mut self, old: &Path, new: &Path, timestamp: i64) {
        let mut node = self.nodes.remove(old).unwrap_or_else(|| LineageNode {
            current_path: old.to_path_buf(),
            content_hash_at_register: String::new(),
            history: Vec::new(),
        });
        node.history.push(LineageEvent {
            action: LineageAction::Move,
            from: Some(old.to_path_buf()),
            to: new.to_path_buf(),
            timestamp,
        });
        node.current_path = new.to_path_buf();
        self.nodes.insert(new.to_path_buf(), node);
    }

    /// Refresh a node's registered hash after an edit, without changing its
    /// location.
    pub fn update_crc(&mut self, path: &Path, content: &[u8], timestamp: i64) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.content_hash_at_register = hash_content(content);
            node.history.push(LineageEvent {
                action: LineageAction::Edit,
                from: None,
                to: path.to_path_buf(),
                timestamp,
            });
        }
    }

    /// Find the current path(s) whose registered content hash matches
    /// `hash`, for smart-undo's relocation search.
    pub fn find_by_content_hash(&self, hash: &str) -> Vec<PathBuf> {
        self.nodes
            .values()
            .filter(|node| node.content_hash_at_register == hash)
            .map(|node| node.current_path.clone())
            .collect()
    }

    /// The current location of the node originally registered at
    /// `original_path`, following any recorded move edges.
    pub fn current_location_of(&self, original_path: &Path) -> Option<PathBuf> {
        self.nodes
            .values()
            .find(|node| {
                node.history
                    .first()
                    .map(|e| e.to == original_path)
                    .unwrap_or(false)
            })
            .map(|node| node.current_path.clone())
    }

    pub fn node(&self, path: &Path) -> Option<&LineageNode> {
        self.nodes.get(path)
    }
}
