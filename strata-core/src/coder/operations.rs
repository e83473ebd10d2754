//! Structured line operations, translated into a unified diff.

use super::PatchFailure;
use serde::{Deserialize, Serialize};
use similar::TextDiff;

/// A typed edit against 1-indexed line numbers of the current file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOperation {
    /// Insert `text` after line `after` (0 inserts at the top)
    Insert { after: usize, text: String },
    Remove { start: usize, end: usize },
    Replace { start: usize, end: usize, text: String },
}

impl PatchOperation {
    /// Old lines consumed, as a half-open 0-indexed range
    fn span(&self) -> (usize, usize) {
        match self {
            Self::Insert { after, .. } => (*after, *after),
            Self::Remove { start, end } | Self::Replace { start, end, .. } => (start - 1, *end),
        }
    }

    fn validate(&self, line_count: usize) -> Result<(), PatchFailure> {
        let invalid = |message: String| Err(PatchFailure::InvalidOperation { message });
        match self {
            Self::Insert { after, .. } if *after > line_count => {
                invalid(format!("insert after line {after}, file has {line_count} lines"))
            }
            Self::Remove { start, end } | Self::Replace { start, end, .. } => {
                if *start == 0 || start > end || *end > line_count {
                    invalid(format!(
                        "line range {start}-{end} is outside 1-{line_count}"
                    ))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// Render `ops` against `text` as a unified diff with 3 lines of context.
///
/// Operations are validated for bounds and must not overlap.
pub fn to_diff(path: &str, text: &str, ops: &[PatchOperation]) -> Result<String, PatchFailure> {
    if ops.is_empty() {
        return Err(PatchFailure::InvalidOperation {
            message: "no operations given".to_string(),
        });
    }
    let lines: Vec<&str> = text.lines().collect();
    for op in ops {
        op.validate(lines.len())?;
    }

    let mut ordered: Vec<&PatchOperation> = ops.iter().collect();
    // Stable: inserts at one anchor keep their given order
    ordered.sort_by_key(|op| op.span());
    for pair in ordered.windows(2) {
        let (a_start, a_end) = pair[0].span();
        let (b_start, _) = pair[1].span();
        let a_is_insert = a_start == a_end;
        if b_start < a_end || (!a_is_insert && b_start == a_start) {
            return Err(PatchFailure::InvalidOperation {
                message: format!("operations {:?} and {:?} overlap", pair[0], pair[1]),
            });
        }
    }

    let mut updated: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor = 0;
    for op in ordered {
        let (start, end) = op.span();
        updated.extend(lines[cursor..start].iter().map(|l| l.to_string()));
        match op {
            PatchOperation::Insert { text, .. } | PatchOperation::Replace { text, .. } => {
                updated.extend(text.lines().map(str::to_string));
            }
            PatchOperation::Remove { .. } => {}
        }
        cursor = end;
    }
    updated.extend(lines[cursor..].iter().map(|l| l.to_string()));

    let mut new_text = updated.join("\n");
    if !updated.is_empty() && (text.ends_with('\n') || text.is_empty()) {
        new_text.push('\n');
    }

    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    Ok(TextDiff::from_lines(text, new_text.as_str())
        .unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::diff;

    const TEXT: &str = "a\nb\nc\nd\n";

    fn run(ops: &[PatchOperation]) -> String {
        let d = to_diff("f.txt", TEXT, ops).unwrap();
        diff::apply(TEXT, &diff::parse(&d).unwrap()).unwrap()
    }

    #[test]
    fn test_insert_remove_replace() {
        let out = run(&[
            PatchOperation::Insert { after: 0, text: "top".into() },
            PatchOperation::Remove { start: 2, end: 2 },
            PatchOperation::Replace { start: 4, end: 4, text: "D1\nD2\n".into() },
        ]);
        assert_eq!(out, "top\na\nc\nD1\nD2\n");
    }

    #[test]
    fn test_bounds_and_overlap_rejected() {
        assert!(matches!(
            to_diff("f", TEXT, &[PatchOperation::Remove { start: 3, end: 9 }]),
            Err(PatchFailure::InvalidOperation { .. })
        ));
        assert!(matches!(
            to_diff(
                "f",
                TEXT,
                &[
                    PatchOperation::Remove { start: 1, end: 3 },
                    PatchOperation::Replace { start: 2, end: 2, text: "x".into() },
                ]
            ),
            Err(PatchFailure::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_json_shape() {
        let op: PatchOperation =
            serde_json::from_str(r#"{"op": "replace", "start": 1, "end": 2, "text": "x"}"#).unwrap();
        assert_eq!(op, PatchOperation::Replace { start: 1, end: 2, text: "x".into() });
    }
}
