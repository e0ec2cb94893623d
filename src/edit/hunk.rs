// src/edit/hunk.rs
//! Typed, anchored line hunks: the operation-list request shape of the edit
//! engine. (spec component J)

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ioutil::split_keep_newlines;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HunkOp {
    Replace,
    InsertBefore,
    InsertAfter,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hunk {
    pub operation: HunkOp,
    pub start_line: usize,
    pub end_line: Option<usize>,
    pub content: Option<String>,
    pub expected_content: Option<String>,
    pub context_start_pattern: Option<String>,
}

/// A hunk with anchor resolved to absolute 1-based line numbers, ready to
/// apply.
struct ResolvedHunk {
    effective_start: usize,
    effective_end: Option<usize>,
    content: Option<String>,
    expected_content: Option<String>,
    /// 1-based line whose leading whitespace is copied onto `content`; 0
    /// means "no reference line, no indent."
    reference_line: usize,
    /// Absolute start used purely for descending-order application; kept
    /// separate from `effective_start` because insert ops shift it.
    sort_key: usize,
}

/// Apply an ordered set of hunks to `text`, returning the new content.
/// `infinity_range` waives the bounds check for files created in the
/// current transaction.
pub fn apply_hunks(text: &str, hunks: &[Hunk], infinity_range: bool) -> Result<String> {
    let lines = split_keep_newlines(text);
    let line_count = lines.len();

    let mut resolved: Vec<ResolvedHunk> = Vec::with_capacity(hunks.len());
    for hunk in hunks {
        resolved.push(resolve(hunk, &lines, line_count, infinity_range)?);
    }

    // Descending absolute start line: later edits happen first so earlier
    // hunks' line numbers are still valid when they are applied.
    resolved.sort_by(|a, b| b.sort_key.cmp(&a.sort_key));

    let mut lines: Vec<String> = lines.into_iter().map(|s| s.to_string()).collect();
    for hunk in resolved {
        let start_idx = hunk.effective_start.saturating_sub(1);
        let end_idx = hunk.effective_end.unwrap_or(hunk.effective_start.saturating_sub(1));
        let end_idx = end_idx.min(lines.len());

        let replacement: Vec<String> = match hunk.content {
            Some(content) if !content.is_empty() => {
                let indent = reference_indent(&lines, hunk.reference_line);
                split_and_indent(&content, &indent)
            }
            _ => Vec::new(),
        };

        if start_idx > lines.len() {
            return Err(Error::TransactionError(format!(
                "hunk start index {start_idx} exceeds line count {}",
                lines.len()
            )));
        }
        let drain_end = end_idx.max(start_idx);
        lines.splice(start_idx..drain_end, replacement);
        let _ = hunk.expected_content;
    }

    Ok(lines.concat())
}

fn reference_indent(lines: &[String], reference_line: usize) -> String {
    if reference_line == 0 {
        return String::new();
    }
    lines
        .get(reference_line - 1)
        .map(|line| leading_whitespace(line))
        .unwrap_or_default()
}

fn leading_whitespace(line: &str) -> String {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').collect()
}

fn split_and_indent(content: &str, indent: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = content;
    loop {
        match remaining.find('\n') {
            Some(pos) => {
                let (line, rest) = remaining.split_at(pos + 1);
                out.push(indent_line(line, indent));
                remaining = rest;
            }
            None => {
                if !remaining.is_empty() {
                    out.push(indent_line(remaining, indent));
                }
                break;
            }
        }
    }
    out
}

fn indent_line(line: &str, indent: &str) -> String {
    let trimmed = line.trim_end_matches('\n');
    if trimmed.is_empty() {
        return line.to_string();
    }
    let newline = if line.ends_with('\n') { "\n" } else { "" };
    format!("{indent}{trimmed}{newline}")
}

fn resolve(
    hunk: &Hunk,
    lines: &[&str],
    line_count: usize,
    infinity_range: bool,
) -> Result<ResolvedHunk> {
    let anchor = match &hunk.context_start_pattern {
        Some(pattern) => {
            let re = Regex::new(pattern)
                .map_err(|e| Error::InvalidPath(format!("invalid context_start_pattern: {e}")))?;
            lines.iter().position(|line| re.is_match(line)).unwrap_or(0)
        }
        None => 0,
    };

    let abs_start = anchor + hunk.start_line;
    let abs_end = hunk.end_line.map(|e| anchor + e);

    let (effective_start, effective_end, sort_key, reference_line) = match hunk.operation {
        HunkOp::Replace => (
            abs_start,
            Some(abs_end.unwrap_or(abs_start)),
            abs_start,
            abs_start.saturating_sub(1),
        ),
        HunkOp::Delete => (
            abs_start,
            Some(abs_end.unwrap_or(abs_start)),
            abs_start,
            0,
        ),
        HunkOp::InsertBefore => (
            abs_start,
            Some(abs_start.saturating_sub(1)),
            abs_start,
            abs_start,
        ),
        HunkOp::InsertAfter => (
            abs_start + 1,
            Some(abs_start),
            abs_start + 1,
            abs_start,
        ),
    };

    if !infinity_range {
        let end_for_check = effective_end.unwrap_or(effective_start.saturating_sub(1));
        if effective_start == 0
            || effective_start > line_count + 1
            || end_for_check + 1 < effective_start
            || end_for_check > line_count
        {
            return Err(Error::AddressingError {
                path: Default::default(),
                start: effective_start,
                end: effective_end,
                line_count,
            });
        }
    }

    let content = match hunk.operation {
        HunkOp::Delete => None,
        _ => hunk.content.clone(),
    };

    if let Some(expected) = &hunk.expected_content {
        let end = effective_end.unwrap_or(effective_start.saturating_sub(1));
        let actual = current_range_text(lines, effective_start, end);
        if strip_cr(&actual) != strip_cr(expected) {
            return Err(Error::ContentMismatch {
                path: Default::default(),
                start: effective_start,
                end,
                expected: expected.clone(),
                actual,
            });
        }
    }

    Ok(ResolvedHunk {
        effective_start,
        effective_end,
        content,
        expected_content: hunk.expected_content.clone(),
        reference_line,
        sort_key,
    })
}

fn current_range_text(lines: &[&str], start: usize, end: usize) -> String {
    if start == 0 || start > lines.len() {
        return String::new();
    }
    let end = end.min(lines.len());
    if end < start {
        return String::new();
    }
    lines[start - 1..end].concat()
}

fn strip_cr(s: &str) -> String {
    s.replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_swaps_a_single_line() {
        let text = "a\nb\nc\n";
        let hunks = vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 2,
            end_line: Some(2),
            content: Some("B\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "a\nB\nc\n");
    }

    #[test]
    fn insert_after_appends_following_line() {
        let text = "a\nb\n";
        let hunks = vec![Hunk {
            operation: HunkOp::InsertAfter,
            start_line: 1,
            end_line: None,
            content: Some("x\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "a\nx\nb\n");
    }

    #[test]
    fn insert_before_precedes_target_line() {
        let text = "a\nb\n";
        let hunks = vec![Hunk {
            operation: HunkOp::InsertBefore,
            start_line: 2,
            end_line: None,
            content: Some("x\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "a\nx\nb\n");
    }

    #[test]
    fn delete_removes_range() {
        let text = "a\nb\nc\n";
        let hunks = vec![Hunk {
            operation: HunkOp::Delete,
            start_line: 2,
            end_line: Some(2),
            content: None,
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "a\nc\n");
    }

    #[test]
    fn out_of_order_hunks_apply_in_descending_order() {
        let text = "1\n2\n3\n4\n";
        let hunks = vec![
            Hunk {
                operation: HunkOp::Replace,
                start_line: 1,
                end_line: Some(1),
                content: Some("ONE\n".to_string()),
                expected_content: None,
                context_start_pattern: None,
            },
            Hunk {
                operation: HunkOp::Replace,
                start_line: 3,
                end_line: Some(3),
                content: Some("THREE\n".to_string()),
                expected_content: None,
                context_start_pattern: None,
            },
        ];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "ONE\n2\nTHREE\n4\n");
    }

    #[test]
    fn out_of_bounds_start_fails_with_addressing_error() {
        let text = "a\nb\n";
        let hunks = vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 10,
            end_line: Some(10),
            content: Some("x\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false);
        assert!(matches!(result, Err(Error::AddressingError { .. })));
    }

    #[test]
    fn append_at_line_count_plus_one_succeeds() {
        let text = "a\nb\n";
        let hunks = vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 3,
            end_line: Some(2),
            content: Some("c\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "a\nb\nc\n");
    }

    #[test]
    fn content_mismatch_reports_expected_and_actual() {
        let text = "a\nb\n";
        let hunks = vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 1,
            end_line: Some(1),
            content: Some("x\n".to_string()),
            expected_content: Some("not-a\n".to_string()),
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false);
        assert!(matches!(result, Err(Error::ContentMismatch { .. })));
    }

    #[test]
    fn anchor_pattern_shifts_relative_line_numbers() {
        let text = "header\nfn foo() {\n    old();\n}\n";
        let hunks = vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 2,
            end_line: Some(2),
            content: Some("    new();\n".to_string()),
            expected_content: None,
            context_start_pattern: Some(r"^fn foo".to_string()),
        }];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "header\nfn foo() {\n    new();\n}\n");
    }

    #[test]
    fn auto_indent_matches_line_above_on_replace() {
        let text = "    a\n    b\n";
        let hunks = vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 2,
            end_line: Some(2),
            content: Some("c\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, false).unwrap();
        assert_eq!(result, "    a\n    c\n");
    }

    #[test]
    fn infinity_range_waives_bounds_check() {
        let text = "";
        let hunks = vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 1,
            end_line: Some(50),
            content: Some("new content\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }];
        let result = apply_hunks(text, &hunks, true).unwrap();
        assert_eq!(result, "new content\n");
    }
}
