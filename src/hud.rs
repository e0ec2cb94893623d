// src/hud.rs
//! HUD: the one-line status header prepended to every tool response.

use crate::collab;
use crate::session::Session;

/// `[HUD sid:<8-char-id>] Plan: <title> [✓<done> ○<pending>] → #<n>: <next-task> | Session: <edits> edits | Unlocked: <n> files`
pub fn render(session: &Session) -> String {
    let sid = short_id(&session.id);
    let plan_section = plan_section(session);
    let edits = session.tx.total_edits();
    let unlocked = session.unlocked_file_count();

    format!("[HUD sid:{sid}] {plan_section} | Session: {edits} edits | Unlocked: {unlocked} files")
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn plan_section(session: &Session) -> String {
    let Some(todo_path) = &session.active_todo else {
        return "Plan: none".to_string();
    };

    match collab::todo_progress(std::path::Path::new(todo_path)) {
        Ok(progress) => {
            let next = progress.next_task.as_deref().unwrap_or("(complete)");
            format!(
                "Plan: {} [✓{} ○{}] → #{}: {next}",
                file_title(todo_path),
                progress.done,
                progress.pending,
                progress.done + 1,
            )
        }
        Err(_) => "Plan: (unavailable)".to_string(),
    }
}

fn file_title(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
