//! Unified diff parsing and all-or-nothing application.

use super::PatchFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-indexed first old line (0 for an insertion at the top)
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
    /// `\ No newline at end of file` followed the new side's last line
    pub new_missing_newline: bool,
}

impl Hunk {
    fn old_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn new_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

/// A parsed single-file diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub path: Option<String>,
    pub hunks: Vec<Hunk>,
}

/// Parse a unified diff. More than one file header is rejected.
pub fn parse(diff: &str) -> Result<FilePatch, PatchFailure> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut path: Option<String> = None;
    let mut hunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(old) = line.strip_prefix("--- ") {
            let new = lines
                .get(i + 1)
                .and_then(|l| l.strip_prefix("+++ "))
                .ok_or_else(|| PatchFailure::MalformedDiff {
                    message: format!("line {}: '---' header without '+++'", i + 1),
                })?;
            let target = header_path(new)
                .or_else(|| header_path(old))
                .unwrap_or_default();
            match &path {
                Some(existing) if *existing != target => {
                    return Err(PatchFailure::MultiFile {
                        paths: vec![existing.clone(), target],
                    });
                }
                _ => path = Some(target),
            }
            i += 2;
            continue;
        }

        if line.starts_with("@@") {
            let (hunk, next) = parse_hunk(&lines, i)?;
            hunks.push(hunk);
            i = next;
            continue;
        }

        // `diff --git`, `index`, mode lines and free text between files
        if line.starts_with("diff --git ") && !hunks.is_empty() {
            let mut parts = line.split_whitespace().skip(2);
            let next = parts.next().map(|p| strip_prefix_dir(p).to_string());
            if let (Some(existing), Some(next)) = (&path, next) {
                if *existing != next {
                    return Err(PatchFailure::MultiFile {
                        paths: vec![existing.clone(), next],
                    });
                }
            }
        }
        i += 1;
    }

    if hunks.is_empty() {
        return Err(PatchFailure::MalformedDiff {
            message: "no hunks found".to_string(),
        });
    }
    Ok(FilePatch { path, hunks })
}

fn parse_hunk(lines: &[&str], at: usize) -> Result<(Hunk, usize), PatchFailure> {
    let header = lines[at];
    let malformed = |message: String| PatchFailure::MalformedDiff { message };
    let ranges = header
        .strip_prefix("@@ ")
        .and_then(|h| h.split(" @@").next())
        .ok_or_else(|| malformed(format!("line {}: bad hunk header '{header}'", at + 1)))?;
    let mut parts = ranges.split_whitespace();
    let (old_start, old_len) = parts
        .next()
        .and_then(|p| p.strip_prefix('-'))
        .and_then(parse_range)
        .ok_or_else(|| malformed(format!("line {}: bad old range in '{header}'", at + 1)))?;
    let (new_start, new_len) = parts
        .next()
        .and_then(|p| p.strip_prefix('+'))
        .and_then(parse_range)
        .ok_or_else(|| malformed(format!("line {}: bad new range in '{header}'", at + 1)))?;

    let mut hunk = Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        lines: Vec::new(),
        new_missing_newline: false,
    };
    let (mut old_seen, mut new_seen) = (0, 0);
    let mut i = at + 1;
    while i < lines.len() && (old_seen < old_len || new_seen < new_len) {
        let line = lines[i];
        match line.chars().next() {
            Some(' ') => {
                hunk.lines.push(HunkLine::Context(line[1..].to_string()));
                old_seen += 1;
                new_seen += 1;
            }
            // Blank context lines sometimes lose their leading space
            None => {
                hunk.lines.push(HunkLine::Context(String::new()));
                old_seen += 1;
                new_seen += 1;
            }
            Some('-') => {
                hunk.lines.push(HunkLine::Remove(line[1..].to_string()));
                old_seen += 1;
            }
            Some('+') => {
                hunk.lines.push(HunkLine::Add(line[1..].to_string()));
                new_seen += 1;
            }
            Some('\\') => {}
            _ => {
                return Err(malformed(format!(
                    "line {}: unexpected line in hunk: '{line}'",
                    i + 1
                )))
            }
        }
        i += 1;
    }
    if old_seen != old_len || new_seen != new_len {
        return Err(malformed(format!(
            "hunk at line {} expects -{old_len} +{new_len} lines, found -{old_seen} +{new_seen}",
            at + 1
        )));
    }

    // Markers after the hunk body apply to its last line
    while i < lines.len() && lines[i].starts_with('\\') {
        if matches!(hunk.lines.last(), Some(HunkLine::Add(_) | HunkLine::Context(_))) {
            hunk.new_missing_newline = true;
        }
        i += 1;
    }
    Ok((hunk, i))
}

fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

fn header_path(header: &str) -> Option<String> {
    let path = header.split('\t').next()?.trim();
    if path == "/dev/null" || path.is_empty() {
        return None;
    }
    Some(strip_prefix_dir(path).to_string())
}

fn strip_prefix_dir(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Apply every hunk to `text` (LF-normalized) or none of them.
///
/// Each hunk is tried at its stated line first, then at the nearest
/// position where its old side matches uniquely.
pub fn apply(text: &str, patch: &FilePatch) -> Result<String, PatchFailure> {
    let lines: Vec<&str> = text.lines().collect();
    let mut ends_with_newline = text.is_empty() || text.ends_with('\n');
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize;
    let mut offset: isize = 0;

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let old = hunk.old_side();
        let stated = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let expected = (stated as isize + offset).max(0) as usize;

        let position = locate(&lines, &old, expected, cursor).ok_or(PatchFailure::HunkMismatch {
            hunk: index + 1,
        })?;
        if position != expected {
            tracing::debug!(hunk = index + 1, expected, position, "hunk relocated");
        }

        out.extend_from_slice(&lines[cursor..position]);
        out.extend(hunk.new_side());
        cursor = position + old.len();
        offset = position as isize - stated as isize;

        if cursor == lines.len() && hunk.new_missing_newline {
            ends_with_newline = false;
        } else if cursor == lines.len() && !hunk.new_side().is_empty() {
            ends_with_newline = true;
        }
    }
    out.extend_from_slice(&lines[cursor..]);

    let mut result = out.join("\n");
    if ends_with_newline && !out.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

/// Position where `old` matches, preferring `expected`, then the nearest
/// unique candidate at or after `cursor`
fn locate(lines: &[&str], old: &[&str], expected: usize, cursor: usize) -> Option<usize> {
    let matches_at = |p: usize| p + old.len() <= lines.len() && lines[p..p + old.len()] == *old;

    if expected >= cursor && matches_at(expected) {
        return Some(expected);
    }
    if old.is_empty() {
        return None;
    }

    let candidates: Vec<usize> = (cursor..=lines.len().saturating_sub(old.len()))
        .filter(|&p| matches_at(p))
        .collect();
    let best = candidates.iter().map(|&p| p.abs_diff(expected)).min()?;
    let mut nearest = candidates.into_iter().filter(|p| p.abs_diff(expected) == best);
    let first = nearest.next()?;
    // Equally near on both sides: refuse to guess
    if nearest.next().is_some() {
        return None;
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "one\ntwo\nthree\nfour\nfive\n";

    #[test]
    fn test_parse_and_apply() {
        let diff = "--- a/f.txt\n+++ b/f.txt\n@@ -2,2 +2,2 @@\n two\n-three\n+THREE\n";
        let patch = parse(diff).unwrap();
        assert_eq!(patch.path.as_deref(), Some("f.txt"));
        assert_eq!(apply(TEXT, &patch).unwrap(), "one\ntwo\nTHREE\nfour\nfive\n");
    }

    #[test]
    fn test_hunk_relocates_to_nearest_unique_match() {
        let diff = "@@ -1,2 +1,2 @@\n four\n-five\n+5\n";
        let patch = parse(diff).unwrap();
        assert_eq!(apply(TEXT, &patch).unwrap(), "one\ntwo\nthree\nfour\n5\n");
    }

    #[test]
    fn test_mismatch_applies_nothing() {
        let diff = "@@ -1,1 +1,1 @@\n-one\n+ONE\n@@ -4,1 +4,1 @@\n-missing\n+x\n";
        let patch = parse(diff).unwrap();
        assert_eq!(apply(TEXT, &patch), Err(PatchFailure::HunkMismatch { hunk: 2 }));
    }

    #[test]
    fn test_multi_file_rejected() {
        let diff = "--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n-a\n+b\n--- a/y.py\n+++ b/y.py\n@@ -1 +1 @@\n-a\n+b\n";
        assert!(matches!(parse(diff), Err(PatchFailure::MultiFile { .. })));
    }

    #[test]
    fn test_bad_counts_are_malformed() {
        let diff = "@@ -1,3 +1,3 @@\n one\n";
        assert!(matches!(parse(diff), Err(PatchFailure::MalformedDiff { .. })));
        assert!(matches!(parse("no hunks here"), Err(PatchFailure::MalformedDiff { .. })));
    }

    #[test]
    fn test_insert_at_top_and_missing_newline() {
        let patch = parse("@@ -0,0 +1 @@\n+zero\n").unwrap();
        assert!(apply(TEXT, &patch).unwrap().starts_with("zero\none\n"));

        let patch = parse("@@ -5 +5 @@\n-five\n+end\n\\ No newline at end of file\n").unwrap();
        assert_eq!(apply(TEXT, &patch).unwrap(), "one\ntwo\nthree\nfour\nend");
    }
}
