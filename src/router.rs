// src/router.rs
//! Router: maps `(tool_name, params)` to a core operation, wraps the
//! response with the HUD, and converts errors into `isError` content
//! blocks instead of transport-level failures. (spec component N)

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::{self, BatchRequest};
use crate::edit::{EditRequest, Hunk};
use crate::error::{Error, Result};
use crate::hud;
use crate::session::{Session, SessionManager};
use crate::{collab, ops};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    params: Value,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_error: Option<bool>,
}

/// Dispatch one tool call against an already-locked session, returning its
/// raw text result. Used directly by the batch orchestrator, which needs
/// the text (for interpolation) without the HUD wrapper or JSON envelope.
pub fn dispatch_tool(session: &mut Session, tool: &str, params: Value) -> Result<String> {
    match tool {
        "nts_file_read" => {
            let path = require_str(&params, "path")?;
            let start_line = params.get("startLine").and_then(Value::as_u64).map(|n| n as usize);
            let end_line = params.get("endLine").and_then(Value::as_u64).map(|n| n as usize);
            let result = ops::read_file(session, &path, start_line, end_line)?;
            Ok(serde_json::to_string(&result)?)
        }
        "nts_file_manage" => dispatch_file_manage(session, &params),
        "nts_list_directory" => {
            let path = require_str(&params, "path")?;
            let resolved = session.sandbox.sanitize(&path, true)?;
            let entries = collab::list_directory(&resolved)?;
            Ok(serde_json::to_string(&entries)?)
        }
        "nts_find_file" => {
            let pattern = require_str(&params, "pattern")?;
            let root = session.sandbox.project_root().to_path_buf();
            let matches = collab::find_file(&root, &pattern)?;
            Ok(serde_json::to_string(&matches)?)
        }
        "nts_file_info" => {
            let path = require_str(&params, "path")?;
            let resolved = session.sandbox.sanitize(&path, true)?;
            let metadata = std::fs::metadata(&resolved)?;
            Ok(serde_json::json!({
                "size": metadata.len(),
                "isDir": metadata.is_dir(),
                "readOnly": metadata.permissions().readonly(),
            })
            .to_string())
        }
        "nts_edit_file" => dispatch_edit_file(session, &params),
        "nts_project_replace" => {
            let pattern = require_str(&params, "pattern")?;
            let replacement = params.get("replacement").and_then(Value::as_str).unwrap_or("");
            let dry_run = params.get("dryRun").and_then(Value::as_bool).unwrap_or(false);
            let result = ops::project_replace(session, &pattern, replacement, dry_run)?;
            Ok(serde_json::to_string(&result)?)
        }
        "nts_batch_tools" => {
            let request: BatchRequest = serde_json::from_value(params)?;
            let result = batch::run_batch(session, request)?;
            Ok(serde_json::to_string(&result)?)
        }
        "nts_session" => dispatch_session(session, &params),
        "nts_todo_create" => dispatch_todo_create(session, &params),
        "nts_todo_update" => dispatch_todo_update(session, &params),
        "nts_git_commit_session" => {
            let message = params.get("message").and_then(Value::as_str).unwrap_or("session commit");
            let output = collab::git_commit_session(session.sandbox.project_root(), session.sandbox.config(), message)?;
            Ok(output)
        }
        "nts_project_structure" => {
            let depth = params.get("maxDepth").and_then(Value::as_u64).unwrap_or(6) as usize;
            let tree = collab::project_structure(session.sandbox.project_root(), depth);
            Ok(serde_json::to_string(&tree)?)
        }
        "nts_search_files" => {
            let pattern = require_str(&params, "pattern")?;
            let hits = collab::search_files(session.sandbox.project_root(), &pattern)?;
            Ok(serde_json::to_string(&hits)?)
        }
        other => Err(Error::InvalidPath(format!("unknown tool: {other}"))),
    }
}

fn dispatch_file_manage(session: &mut Session, params: &Value) -> Result<String> {
    let action = require_str(params, "action")?;
    let allow_protected = params.get("allowProtected").and_then(Value::as_bool).unwrap_or(false);
    match action.as_str() {
        "create" => {
            let path = require_str(params, "path")?;
            let content = params.get("content").and_then(Value::as_str).unwrap_or("");
            let token = ops::create_file(session, &path, content, allow_protected)?;
            Ok(serde_json::json!({"path": path, "token": token}).to_string())
        }
        "delete" => {
            let path = require_str(params, "path")?;
            let recursive = params.get("recursive").and_then(Value::as_bool).unwrap_or(false);
            ops::delete_file(session, &path, recursive, allow_protected)?;
            Ok(serde_json::json!({"path": path, "deleted": true}).to_string())
        }
        "move" => {
            let from = require_str(params, "path")?;
            let to = require_str(params, "newPath")?;
            ops::move_file(session, &from, &to, allow_protected)?;
            Ok(serde_json::json!({"path": to}).to_string())
        }
        "rename" => {
            let path = require_str(params, "path")?;
            let new_name = require_str(params, "newName")?;
            ops::rename_file(session, &path, &new_name, allow_protected)?;
            Ok(serde_json::json!({"path": new_name}).to_string())
        }
        other => Err(Error::InvalidPath(format!("unknown nts_file_manage action: {other}"))),
    }
}

fn dispatch_edit_file(session: &mut Session, params: &Value) -> Result<String> {
    let path = require_str(params, "path")?;
    let access_token = params.get("accessToken").and_then(Value::as_str);
    let expected_checksum = params
        .get("expectedChecksum")
        .and_then(Value::as_u64)
        .map(|n| n as u32);

    let request = if let Some(operations) = params.get("operations") {
        let hunks: Vec<Hunk> = serde_json::from_value(operations.clone())?;
        EditRequest::Hunks(hunks)
    } else if let Some(old_text) = params.get("oldText").and_then(Value::as_str) {
        let new_text = params.get("newText").and_then(Value::as_str).unwrap_or("");
        EditRequest::FuzzyReplace {
            old_text: old_text.to_string(),
            new_text: new_text.to_string(),
        }
    } else {
        let operation = params.get("operation").and_then(Value::as_str).unwrap_or("replace");
        let start_line = params.get("startLine").and_then(Value::as_u64).unwrap_or(1) as usize;
        let end_line = params.get("endLine").and_then(Value::as_u64).map(|n| n as usize);
        let content = params.get("content").and_then(Value::as_str).map(|s| s.to_string());
        let expected_content = params.get("expectedContent").and_then(Value::as_str).map(|s| s.to_string());
        let context_start_pattern = params
            .get("contextStartPattern")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        let op = match operation {
            "insert_before" => crate::edit::HunkOp::InsertBefore,
            "insert_after" => crate::edit::HunkOp::InsertAfter,
            "delete" => crate::edit::HunkOp::Delete,
            _ => crate::edit::HunkOp::Replace,
        };
        EditRequest::Hunks(vec![Hunk {
            operation: op,
            start_line,
            end_line,
            content,
            expected_content,
            context_start_pattern,
        }])
    };

    let result = ops::edit_file(session, &path, request, access_token, expected_checksum)?;
    Ok(serde_json::to_string(&result)?)
}

fn dispatch_session(session: &mut Session, params: &Value) -> Result<String> {
    let action = require_str(params, "action")?;
    let now = chrono::Utc::now().timestamp();
    match action.as_str() {
        "checkpoint" => {
            let name = require_str(params, "name")?;
            session.tx.create_checkpoint(name.clone(), now);
            session.save_journal();
            Ok(serde_json::json!({"checkpoint": name}).to_string())
        }
        "rollback" => {
            let name = require_str(params, "name")?;
            let undone = session.tx.rollback_to_checkpoint(
                &name,
                &session.lineage,
                &session.external_changes,
                now,
            )?;
            session.save_journal();
            Ok(serde_json::json!({"undone": undone}).to_string())
        }
        "undo" => {
            let entry = session.tx.undo(&session.lineage, &session.external_changes, now)?;
            session.save_journal();
            Ok(serde_json::to_string(&entry)?)
        }
        "redo" => {
            let entry = session.tx.redo(&session.lineage, &session.external_changes)?;
            session.save_journal();
            Ok(serde_json::to_string(&entry)?)
        }
        "journal" => Ok(serde_json::json!({
            "undoStack": session.tx.undo_stack(),
            "redoStack": session.tx.redo_stack(),
        })
        .to_string()),
        "git_checkpoint" => {
            let message = params.get("message").and_then(Value::as_str).unwrap_or("checkpoint");
            let output = collab::git_checkpoint(session.sandbox.project_root(), session.sandbox.config(), message)?;
            Ok(output)
        }
        "git_restore" => {
            let revision = require_str(params, "revision")?;
            let output = collab::git_restore(session.sandbox.project_root(), session.sandbox.config(), &revision)?;
            Ok(output)
        }
        other => Err(Error::InvalidPath(format!("unknown nts_session action: {other}"))),
    }
}

fn dispatch_todo_create(session: &mut Session, params: &Value) -> Result<String> {
    let tasks: Vec<String> = params
        .get("tasks")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let nts_dir = session.sandbox.project_root().join(".nts");
    let tag = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let path = collab::create_todo(&nts_dir, &tag, &tasks)?;
    session.active_todo = Some(path.to_string_lossy().into_owned());
    session.save_journal();
    Ok(serde_json::json!({"path": path}).to_string())
}

fn dispatch_todo_update(session: &mut Session, params: &Value) -> Result<String> {
    let index = params.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
    let done = params.get("done").and_then(Value::as_bool).unwrap_or(true);
    let path = session
        .active_todo
        .clone()
        .ok_or_else(|| Error::InvalidPath("no active todo list for this session".into()))?;
    collab::update_todo(std::path::Path::new(&path), index, done)?;
    Ok(serde_json::json!({"updated": index}).to_string())
}

fn require_str(params: &Value, field: &str) -> Result<String> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::InvalidPath(format!("missing required field '{field}'")))
}

/// Handle one request end to end: resolve the session, dispatch, wrap with
/// HUD and the `isError` response envelope.
fn handle_request(manager: &SessionManager, request: RpcRequest) -> RpcResponse {
    let session_handle = match manager.get_or_create(request.session_id) {
        Ok(handle) => handle,
        Err(e) => return error_response(&e.to_string()),
    };

    let mut session = match session_handle.lock() {
        Ok(guard) => guard,
        Err(_) => return error_response("session lock poisoned"),
    };

    match dispatch_tool(&mut session, &request.method, request.params) {
        Ok(text) => {
            let hud_line = hud::render(&session);
            RpcResponse {
                content: vec![ContentBlock {
                    kind: "text",
                    text: format!("{hud_line}\n{text}"),
                }],
                is_error: None,
            }
        }
        Err(e) => error_response(&e.to_string()),
    }
}

fn error_response(message: &str) -> RpcResponse {
    RpcResponse {
        content: vec![ContentBlock {
            kind: "text",
            text: message.to_string(),
        }],
        is_error: Some(true),
    }
}

/// Run the newline-delimited JSON request/response loop over stdin/stdout.
pub fn serve(manager: Arc<SessionManager>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => handle_request(&manager, request),
            Err(e) => error_response(&format!("malformed request: {e}")),
        };

        let serialized = serde_json::to_string(&response)?;
        writeln!(stdout, "{serialized}")?;
        stdout.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sandbox::Sandbox;
    use tempfile::TempDir;

    fn session(temp: &TempDir) -> Session {
        let sandbox = Sandbox::new(temp.path().to_path_buf(), Config::default()).unwrap();
        Session::open(sandbox, "router-test".to_string()).unwrap()
    }

    #[test]
    fn dispatch_unknown_tool_fails() {
        let temp = TempDir::new().unwrap();
        let mut session = session(&temp);
        let result = dispatch_tool(&mut session, "nts_does_not_exist", serde_json::json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn dispatch_file_manage_create_then_read() {
        let temp = TempDir::new().unwrap();
        let mut session = session(&temp);
        let params = serde_json::json!({"action": "create", "path": "f.txt", "content": "hi"});
        let result = dispatch_tool(&mut session, "nts_file_manage", params).unwrap();
        assert!(result.contains("token"));

        let read_params = serde_json::json!({"path": "f.txt"});
        let read_result = dispatch_tool(&mut session, "nts_file_read", read_params).unwrap();
        assert!(read_result.contains("hi"));
    }
}
