//! L2 skeletons: signature-only renderings of a file with bodies elided.

use crate::parse::SymbolParser;
use crate::symbol::{LineRange, ParsedSymbol, SymbolKind};
use serde::Serialize;

/// One rendered skeleton line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkeletonLine {
    pub text: String,
    /// Original source line (the first elided line for markers)
    pub source_line: usize,
    /// Source lines this marker stands in for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elided: Option<LineRange>,
}

/// Where a declaration sits in the skeleton and the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureEntry {
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub signature: String,
    pub source_lines: LineRange,
    pub skeleton_line: usize,
}

/// Signature-only view of one file version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skeleton {
    pub path: String,
    pub content_hash: String,
    pub language: String,
    pub lines: Vec<SkeletonLine>,
    pub signatures: Vec<SignatureEntry>,
}

impl Skeleton {
    /// Project `source` through the bodies of its function symbols.
    ///
    /// Everything outside a function body is kept verbatim; each maximal
    /// run of body lines becomes one marker line. `symbols` must come from
    /// the same content version as `source`.
    pub fn build(
        path: &str,
        content_hash: &str,
        language: &str,
        source: &str,
        symbols: &[ParsedSymbol],
        parser: &dyn SymbolParser,
    ) -> Self {
        let source_lines: Vec<&str> = source.lines().collect();
        let total = source_lines.len();

        let mut lines = Vec::new();
        if language == "opaque" {
            if total > 0 {
                lines.push(SkeletonLine {
                    text: parser.elision_marker("", 1, total),
                    source_line: 1,
                    elided: Some(LineRange::new(1, total)),
                });
            }
            return Self {
                path: path.to_string(),
                content_hash: content_hash.to_string(),
                language: language.to_string(),
                lines,
                signatures: Vec::new(),
            };
        }

        let elided = elided_ranges(symbols, total);
        let mut next_range = elided.iter().peekable();
        let mut line = 1;
        while line <= total {
            if let Some(range) = next_range.peek().filter(|r| r.start == line) {
                let indent = source_lines[range.start - 1..range.end]
                    .iter()
                    .find(|l| !l.trim().is_empty())
                    .map(|l| leading_whitespace(l))
                    .unwrap_or("");
                lines.push(SkeletonLine {
                    text: parser.elision_marker(indent, range.start, range.end),
                    source_line: range.start,
                    elided: Some(**range),
                });
                line = range.end + 1;
                next_range.next();
                continue;
            }
            lines.push(SkeletonLine {
                text: source_lines[line - 1].to_string(),
                source_line: line,
                elided: None,
            });
            line += 1;
        }

        let mut skeleton = Self {
            path: path.to_string(),
            content_hash: content_hash.to_string(),
            language: language.to_string(),
            lines,
            signatures: Vec::new(),
        };

        skeleton.signatures = symbols
            .iter()
            .filter(|s| !matches!(s.kind, SymbolKind::Module | SymbolKind::Import))
            .filter_map(|s| {
                let at = skeleton.kept_line_of(s.lines.start)?;
                Some(SignatureEntry {
                    qualified_name: s.qualified_name.clone(),
                    kind: s.kind,
                    signature: s.signature.clone(),
                    source_lines: s.lines,
                    skeleton_line: at,
                })
            })
            .collect();
        skeleton
    }

    /// Skeleton line number (1-indexed) to source line number
    pub fn line_map(&self) -> Vec<usize> {
        self.lines.iter().map(|l| l.source_line).collect()
    }

    pub fn source_line(&self, skeleton_line: usize) -> Option<usize> {
        self.lines
            .get(skeleton_line.checked_sub(1)?)
            .map(|l| l.source_line)
    }

    /// Skeleton line showing `source_line`, or the marker that elides it
    pub fn skeleton_line_of(&self, source_line: usize) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| match l.elided {
                Some(range) => range.contains(source_line),
                None => l.source_line == source_line,
            })
            .map(|i| i + 1)
    }

    /// Like `skeleton_line_of`, but only for lines shown verbatim
    fn kept_line_of(&self, source_line: usize) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.elided.is_none() && l.source_line == source_line)
            .map(|i| i + 1)
    }

    pub fn elided_lines(&self) -> usize {
        self.lines
            .iter()
            .filter_map(|l| l.elided.map(|r| r.len()))
            .sum()
    }

    /// Text with each line prefixed by its original line number
    pub fn render(&self) -> String {
        let width = self
            .lines
            .last()
            .map(|l| l.source_line.to_string().len())
            .unwrap_or(1);
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&format!("{:>width$} | {}\n", line.source_line, line.text));
        }
        out
    }
}

/// Sorted, non-overlapping union of function body ranges
fn elided_ranges(symbols: &[ParsedSymbol], total: usize) -> Vec<LineRange> {
    let mut bodies: Vec<LineRange> = symbols
        .iter()
        .filter(|s| s.kind == SymbolKind::Function)
        .filter_map(|s| s.body)
        .filter(|b| b.start >= 1 && b.start <= b.end && b.end <= total)
        .collect();
    bodies.sort_by_key(|b| (b.start, std::cmp::Reverse(b.end)));

    let mut merged: Vec<LineRange> = Vec::new();
    for body in bodies {
        match merged.last_mut() {
            Some(last) if body.start <= last.end => last.end = last.end.max(body.end),
            _ => merged.push(body),
        }
    }
    merged
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}
