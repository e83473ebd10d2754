//! Block-matching strategies for search/replace patches.
//!
//! Each strategy is a pure function over LF-normalized text. They are tried
//! in order and the first one that finds a block wins.

use crate::symbol::LineRange;
use serde::Serialize;
use similar::TextDiff;
use std::collections::HashMap;

/// Which path produced a successful patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    WhitespaceTolerant,
    Similarity,
    UnifiedDiff,
    Operations,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::WhitespaceTolerant => "whitespace_tolerant",
            Self::Similarity => "similarity",
            Self::UnifiedDiff => "unified_diff",
            Self::Operations => "operations",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchParams {
    /// Minimum similarity score (0.0..=1.0) for the fuzzy strategy
    pub threshold: f64,
}

/// A located block and the text that replaces it
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMatch {
    /// Byte range in the normalized text
    pub start: usize,
    pub end: usize,
    pub replacement: String,
    pub lines: LineRange,
    /// 1.0 for exact and whitespace matches
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchError {
    /// The block occurs more than once
    Ambiguous { matches: usize },
    /// The closest window scored below the threshold
    BelowThreshold { best: f64, lines: LineRange },
}

pub type MatchFn = fn(&str, &str, &str, &MatchParams) -> Result<Option<BlockMatch>, MatchError>;

/// Strategies in the order they are attempted
pub const STRATEGIES: [(Strategy, MatchFn); 3] = [
    (Strategy::Exact, exact),
    (Strategy::WhitespaceTolerant, whitespace_tolerant),
    (Strategy::Similarity, similarity),
];

/// `search` must occur verbatim exactly once
pub fn exact(
    text: &str,
    search: &str,
    replace: &str,
    _params: &MatchParams,
) -> Result<Option<BlockMatch>, MatchError> {
    let Some(start) = text.find(search) else {
        return Ok(None);
    };
    // Overlapping occurrences count too: resume one char past each start
    let mut matches = 1;
    let mut from = start;
    while let Some(c) = text[from..].chars().next() {
        from += c.len_utf8();
        match text[from..].find(search) {
            Some(offset) => {
                matches += 1;
                from += offset;
            }
            None => break,
        }
    }
    if matches > 1 {
        return Err(MatchError::Ambiguous { matches });
    }
    let end = start + search.len();
    Ok(Some(BlockMatch {
        start,
        end,
        replacement: replace.to_string(),
        lines: LineRange::new(
            line_at(text, start),
            line_at(text, end.saturating_sub(1).max(start)),
        ),
        score: 1.0,
    }))
}

/// Lines match once leading indentation is ignored; the replacement is
/// re-indented to the matched block
pub fn whitespace_tolerant(
    text: &str,
    search: &str,
    replace: &str,
    _params: &MatchParams,
) -> Result<Option<BlockMatch>, MatchError> {
    let search_lines = block_lines(search);
    if search_lines.iter().all(|l| l.trim().is_empty()) {
        return Ok(None);
    }
    let spans = line_spans(text);
    let n = search_lines.len();
    if n > spans.len() {
        return Ok(None);
    }

    let mut starts = (0..=spans.len() - n).filter(|&i| {
        search_lines
            .iter()
            .zip(&spans[i..i + n])
            .all(|(s, &(a, b))| text[a..b].trim_start() == s.trim_start())
    });
    let Some(first) = starts.next() else {
        return Ok(None);
    };
    let others = starts.count();
    if others > 0 {
        return Err(MatchError::Ambiguous {
            matches: others + 1,
        });
    }

    Ok(Some(line_block(text, &spans, first, n, search, replace, 1.0)))
}

/// Best window of comparable length by character similarity
pub fn similarity(
    text: &str,
    search: &str,
    replace: &str,
    params: &MatchParams,
) -> Result<Option<BlockMatch>, MatchError> {
    let search_lines = block_lines(search);
    let n = search_lines.len();
    let spans = line_spans(text);
    if n == 0 || spans.is_empty() || search.trim().is_empty() {
        return Ok(None);
    }

    let needle = search_lines.join("\n");
    let needle_len = needle.chars().count();
    let needle_hist = histogram(&needle);

    let d = ((n as f64 / 10.0).round() as usize).max(1);
    let mut widths: Vec<usize> = (n.saturating_sub(d).max(1)..=n + d)
        .filter(|&w| w <= spans.len())
        .collect();
    // Windows closest to the search length win ties
    widths.sort_by_key(|&w| (w.abs_diff(n), w));

    // (score, first line index, width)
    let mut best: Option<(f64, usize, usize)> = None;
    let mut rivals: Vec<(usize, usize)> = Vec::new();

    for &w in &widths {
        for i in 0..=spans.len() - w {
            let window = &text[spans[i].0..spans[i + w - 1].1];
            let window_len = window.chars().count();
            let bound = overlap_bound(&needle_hist, needle_len, window, window_len);
            let best_score = best.map(|b| b.0).unwrap_or(0.0);
            if bound < params.threshold && bound <= best_score {
                continue;
            }

            let score = TextDiff::from_chars(needle.as_str(), window).ratio() as f64;
            match best {
                Some((b, bi, bw)) if (score - b).abs() < 1e-9 => {
                    if !overlaps((i, w), (bi, bw)) {
                        rivals.push((i, w));
                    }
                }
                Some((b, _, _)) if score < b => {}
                _ => {
                    best = Some((score, i, w));
                    rivals.clear();
                }
            }
        }
    }

    let Some((score, i, w)) = best else {
        return Ok(None);
    };
    if score < params.threshold {
        return Err(MatchError::BelowThreshold {
            best: score,
            lines: LineRange::new(i + 1, i + w),
        });
    }
    if !rivals.is_empty() {
        return Err(MatchError::Ambiguous {
            matches: rivals.len() + 1,
        });
    }

    Ok(Some(line_block(text, &spans, i, w, search, replace, score)))
}

/// Build the match for lines `first..first + count`, re-indenting the
/// replacement to the matched block
fn line_block(
    text: &str,
    spans: &[(usize, usize)],
    first: usize,
    count: usize,
    search: &str,
    replace: &str,
    score: f64,
) -> BlockMatch {
    let start = spans[first].0;
    let mut end = spans[first + count - 1].1;
    if search.ends_with('\n') && end < text.len() {
        end += 1;
    }

    let matched: Vec<&str> = spans[first..first + count]
        .iter()
        .map(|&(a, b)| &text[a..b])
        .collect();
    let mut replacement = reindent(&block_lines(search), &matched, &block_lines(replace)).join("\n");
    if replace.ends_with('\n') {
        replacement.push('\n');
    }

    BlockMatch {
        start,
        end,
        replacement,
        lines: LineRange::new(first + 1, first + count),
        score,
    }
}

/// Re-indent `replace` for a block that matched `search` at `matched`.
///
/// A replacement line indented like its corresponding search line takes
/// that matched line's indentation; one indented like any other search
/// line takes that line's mapped indentation; the rest are shifted by the
/// difference between the two blocks' base indentation.
pub fn reindent(search: &[&str], matched: &[&str], replace: &[&str]) -> Vec<String> {
    let search_base = common_indent(search);
    let matched_base = common_indent(matched);

    let mut mapped: HashMap<&str, &str> = HashMap::new();
    for (s, m) in search.iter().zip(matched) {
        if !s.trim().is_empty() {
            mapped.entry(indent_of(s)).or_insert(indent_of(m));
        }
    }

    replace
        .iter()
        .enumerate()
        .map(|(j, line)| {
            if line.trim().is_empty() {
                return line.to_string();
            }
            let indent = indent_of(line);
            let body = line.trim_start();
            let corresponding = search
                .get(j)
                .zip(matched.get(j))
                .filter(|(s, _)| !s.trim().is_empty() && indent_of(s) == indent);
            if let Some((_, m)) = corresponding {
                return format!("{}{body}", indent_of(m));
            }
            if let Some(m) = mapped.get(indent) {
                return format!("{m}{body}");
            }
            match indent.strip_prefix(search_base) {
                Some(extra) => format!("{matched_base}{extra}{body}"),
                None => format!("{matched_base}{body}"),
            }
        })
        .collect()
}

/// Lines of a search/replace block, ignoring one trailing newline
fn block_lines(block: &str) -> Vec<&str> {
    let core = block.strip_suffix('\n').unwrap_or(block);
    if core.is_empty() {
        return Vec::new();
    }
    core.split('\n').collect()
}

/// Byte spans of each line, without the newline
pub(crate) fn line_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            spans.push((start, i));
            start = i + 1;
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

fn line_at(text: &str, offset: usize) -> usize {
    crate::symbol::line_of_offset(text, offset)
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Shortest indentation among non-blank lines
fn common_indent<'a>(lines: &[&'a str]) -> &'a str {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min_by_key(|i| i.len())
        .unwrap_or("")
}

fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.0 + b.1 && b.0 < a.0 + a.1
}

fn histogram(text: &str) -> [u32; 256] {
    let mut hist = [0u32; 256];
    for c in text.chars() {
        hist[(c as u32 & 0xff) as usize] += 1;
    }
    hist
}

/// Upper bound of the similarity ratio from shared character counts
fn overlap_bound(needle: &[u32; 256], needle_len: usize, window: &str, window_len: usize) -> f64 {
    let total = needle_len + window_len;
    if total == 0 {
        return 1.0;
    }
    let hist = histogram(window);
    let shared: u32 = needle.iter().zip(&hist).map(|(a, b)| (*a).min(*b)).sum();
    2.0 * shared as f64 / total as f64
}
