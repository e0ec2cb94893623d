// src/edit/mod.rs
//! Line-oriented edit engine: the two request shapes accepted per file, and
//! their pure text transforms. I/O, access tracking, and LAT issuance
//! happen one layer up, in the file-operations orchestration. (spec
//! component J)

pub mod fuzzy;
pub mod hunk;

pub use hunk::{Hunk, HunkOp};

use crate::error::Result;

#[derive(Debug, Clone)]
pub enum EditRequest {
    Hunks(Vec<Hunk>),
    FuzzyReplace { old_text: String, new_text: String },
}

/// Apply one edit request to `text`, returning the new content.
/// `infinity_range` waives hunk bounds checks for files created in the
/// current transaction (fuzzy replace has no bounds to waive).
pub fn apply_edit(text: &str, request: &EditRequest, infinity_range: bool) -> Result<String> {
    match request {
        EditRequest::Hunks(hunks) => hunk::apply_hunks(text, hunks, infinity_range),
        EditRequest::FuzzyReplace { old_text, new_text } => {
            fuzzy::fuzzy_replace(text, old_text, new_text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hunks_request_delegates_to_hunk_engine() {
        let request = EditRequest::Hunks(vec![Hunk {
            operation: HunkOp::Replace,
            start_line: 1,
            end_line: Some(1),
            content: Some("B\n".to_string()),
            expected_content: None,
            context_start_pattern: None,
        }]);
        let result = apply_edit("A\n", &request, false).unwrap();
        assert_eq!(result, "B\n");
    }

    #[test]
    fn fuzzy_request_delegates_to_fuzzy_engine() {
        let request = EditRequest::FuzzyReplace {
            old_text: "A".to_string(),
            new_text: "B".to_string(),
        };
        let result = apply_edit("A\n", &request, false).unwrap();
        assert_eq!(result, "B\n");
    }
}
