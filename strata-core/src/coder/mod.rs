//! Patch engine.
//!
//! A search/replace patch runs through [`strategies::STRATEGIES`] on an
//! in-memory copy of one file and stops at the first strategy that finds
//! the block. The file on disk is replaced atomically only on success;
//! any failure leaves it byte-identical.

pub mod diff;
pub mod operations;
pub mod snapshot;
pub mod strategies;

pub use operations::PatchOperation;
pub use strategies::Strategy;

use crate::config::CoderConfig;
use crate::search::resolve_in_root;
use crate::symbol::LineRange;
use serde::Serialize;
use similar::TextDiff;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use strategies::{MatchError, MatchParams};
use tempfile::NamedTempFile;

/// Why a patch was not applied
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchFailure {
    #[error("search text not found")]
    NotFound,

    #[error("search text matched {matches} times")]
    Ambiguous { matches: usize },

    #[error("best similarity {best:.3} is below the threshold")]
    BelowThreshold { best: f64 },

    #[error("threshold {value} is outside 0.0..=1.0")]
    InvalidThreshold { value: f64 },

    #[error("payload spans several files: {}", .paths.join(", "))]
    MultiFile { paths: Vec<String> },

    #[error("hunk {hunk} does not match the current content")]
    HunkMismatch { hunk: usize },

    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("malformed diff: {message}")]
    MalformedDiff { message: String },
}

/// Outcome of one patch call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoderResult {
    pub success: bool,
    pub file: String,
    pub strategy: Option<Strategy>,
    /// Lines of the matched block in the original file
    pub lines: Option<LineRange>,
    pub score: Option<f64>,
    pub failure: Option<PatchFailure>,
    pub suggestions: Vec<String>,
    /// Diff generated from structured operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl CoderResult {
    fn applied(file: &str, strategy: Strategy) -> Self {
        Self {
            success: true,
            file: file.to_string(),
            strategy: Some(strategy),
            lines: None,
            score: None,
            failure: None,
            suggestions: Vec::new(),
            diff: None,
        }
    }

    fn failed(file: &str, failure: PatchFailure, suggestions: Vec<String>) -> Self {
        tracing::debug!(file = %file, failure = %failure, "patch rejected");
        Self {
            success: false,
            file: file.to_string(),
            strategy: None,
            lines: None,
            score: None,
            failure: Some(failure),
            suggestions,
            diff: None,
        }
    }
}

/// Per-call overrides of the configured matching behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchOptions {
    pub fuzzy: Option<bool>,
    pub threshold: Option<f64>,
}

/// File content normalized to LF, with each line's original terminator
struct Target {
    path: PathBuf,
    text: String,
    /// One entry per `\n`-terminated line: whether it ended in `\r\n`
    crlf_lines: Vec<bool>,
}

impl Target {
    fn load(path: PathBuf) -> crate::Result<Self> {
        let bytes = fs::read(&path)?;
        let raw = String::from_utf8(bytes).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8", path.display()),
            )
        })?;
        let mut text = String::with_capacity(raw.len());
        let mut crlf_lines = Vec::new();
        for line in raw.split_inclusive('\n') {
            if let Some(body) = line.strip_suffix("\r\n") {
                text.push_str(body);
                text.push('\n');
                crlf_lines.push(true);
            } else {
                text.push_str(line);
                if line.ends_with('\n') {
                    crlf_lines.push(false);
                }
            }
        }
        Ok(Self { path, text, crlf_lines })
    }

    /// Write `text` back, keeping the terminator of every line the edit
    /// left in place. New lines take the ending of the line they replace,
    /// else the file's majority ending.
    fn store(&self, text: &str) -> crate::Result<()> {
        if !self.crlf_lines.contains(&true) {
            return atomic_write(&self.path, text.as_bytes());
        }
        let crlf_count = self.crlf_lines.iter().filter(|c| **c).count();
        let majority = crlf_count * 2 >= self.crlf_lines.len();

        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let mut endings = vec![majority; lines.len()];
        let diff = TextDiff::from_lines(self.text.as_str(), text);
        for op in diff.ops() {
            let (_, old, new) = op.as_tag_tuple();
            for (offset, k) in new.enumerate() {
                let source = old.start + offset;
                if source < old.end {
                    if let Some(crlf) = self.crlf_lines.get(source) {
                        endings[k] = *crlf;
                    }
                }
            }
        }

        let mut out = String::with_capacity(text.len() + crlf_count);
        for (line, crlf) in lines.iter().zip(endings) {
            match line.strip_suffix('\n') {
                Some(body) if crlf => {
                    out.push_str(body);
                    out.push_str("\r\n");
                }
                _ => out.push_str(line),
            }
        }
        atomic_write(&self.path, out.as_bytes())
    }
}

/// Applies patches to files under one root
pub struct Coder {
    root: PathBuf,
    config: CoderConfig,
}

impl Coder {
    pub fn new(root: &Path, config: CoderConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
        }
    }

    /// Replace the one block of `file` matching `search` with `replace`.
    pub fn apply_patch(
        &self,
        file: &str,
        search: &str,
        replace: &str,
        options: &PatchOptions,
    ) -> crate::Result<CoderResult> {
        let threshold = options.threshold.unwrap_or(self.config.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Ok(CoderResult::failed(
                file,
                PatchFailure::InvalidThreshold { value: threshold },
                vec!["use a similarity threshold between 0.0 and 1.0".to_string()],
            ));
        }
        if let Some(paths) = spanned_files(search).or_else(|| spanned_files(replace)) {
            return Ok(CoderResult::failed(
                file,
                PatchFailure::MultiFile { paths },
                vec!["split the change into one patch per file".to_string()],
            ));
        }
        if search.trim().is_empty() {
            return Ok(CoderResult::failed(
                file,
                PatchFailure::InvalidOperation {
                    message: "search text is empty".to_string(),
                },
                vec!["use apply_operations to insert text at a line".to_string()],
            ));
        }

        let target = Target::load(resolve_in_root(&self.root, file)?)?;
        let search = search.replace("\r\n", "\n");
        let replace = replace.replace("\r\n", "\n");
        let fuzzy = options.fuzzy.unwrap_or(self.config.fuzzy);
        let params = MatchParams { threshold };
        let line_count = target.text.lines().count();

        let mut suggestions = Vec::new();
        for (strategy, attempt) in strategies::STRATEGIES {
            if strategy == Strategy::Similarity {
                if !fuzzy {
                    suggestions.push("enable fuzzy matching to try a similarity search".to_string());
                    break;
                }
                if line_count > self.config.max_fuzzy_lines {
                    suggestions.push(format!(
                        "file has {line_count} lines, above the {} line limit for similarity search",
                        self.config.max_fuzzy_lines
                    ));
                    break;
                }
            }

            match attempt(&target.text, &search, &replace, &params) {
                Ok(Some(found)) => {
                    let mut updated = String::with_capacity(target.text.len() + found.replacement.len());
                    updated.push_str(&target.text[..found.start]);
                    updated.push_str(&found.replacement);
                    updated.push_str(&target.text[found.end..]);
                    target.store(&updated)?;

                    tracing::info!(
                        file = %file,
                        strategy = strategy.as_str(),
                        lines = %found.lines,
                        score = found.score,
                        "patch applied"
                    );
                    let mut result = CoderResult::applied(file, strategy);
                    result.lines = Some(found.lines);
                    result.score = Some(found.score);
                    return Ok(result);
                }
                Ok(None) => continue,
                Err(MatchError::Ambiguous { matches }) => {
                    return Ok(CoderResult::failed(
                        file,
                        PatchFailure::Ambiguous { matches },
                        vec![format!(
                            "the {} search matched {matches} blocks; include more surrounding lines",
                            strategy.as_str()
                        )],
                    ));
                }
                Err(MatchError::BelowThreshold { best, lines }) => {
                    suggestions.push(format!(
                        "closest block is lines {lines} with similarity {best:.3}; retry with threshold <= {:.2}",
                        (best * 100.0).floor() / 100.0
                    ));
                    return Ok(CoderResult::failed(
                        file,
                        PatchFailure::BelowThreshold { best },
                        suggestions,
                    ));
                }
            }
        }

        suggestions.push(format!(
            "read the current content of {file} and copy the block verbatim"
        ));
        Ok(CoderResult::failed(file, PatchFailure::NotFound, suggestions))
    }

    /// Apply a unified diff touching only `file`
    pub fn apply_diff(&self, file: &str, diff_text: &str) -> crate::Result<CoderResult> {
        let target = Target::load(resolve_in_root(&self.root, file)?)?;
        let diff_text = diff_text.replace("\r\n", "\n");
        let patch = match diff::parse(&diff_text) {
            Ok(p) => p,
            Err(failure) => {
                return Ok(CoderResult::failed(
                    file,
                    failure,
                    vec!["send a unified diff for a single file".to_string()],
                ))
            }
        };
        if let Some(named) = patch.path.as_deref().filter(|p| !same_file(p, file)) {
            return Ok(CoderResult::failed(
                file,
                PatchFailure::MultiFile {
                    paths: vec![file.to_string(), named.to_string()],
                },
                vec![format!("the diff targets {named}, not {file}")],
            ));
        }
        self.finish_diff(file, &target, &patch, Strategy::UnifiedDiff)
    }

    /// Apply structured line operations to `file`
    pub fn apply_operations(&self, file: &str, ops: &[PatchOperation]) -> crate::Result<CoderResult> {
        let target = Target::load(resolve_in_root(&self.root, file)?)?;
        let diff_text = match operations::to_diff(file, &target.text, ops) {
            Ok(d) => d,
            Err(failure) => return Ok(CoderResult::failed(file, failure, Vec::new())),
        };
        if diff_text.is_empty() {
            // Operations that change nothing
            let mut result = CoderResult::applied(file, Strategy::Operations);
            result.diff = Some(diff_text);
            return Ok(result);
        }
        let patch = match diff::parse(&diff_text) {
            Ok(p) => p,
            Err(failure) => return Ok(CoderResult::failed(file, failure, Vec::new())),
        };
        let mut result = self.finish_diff(file, &target, &patch, Strategy::Operations)?;
        result.diff = Some(diff_text);
        Ok(result)
    }

    fn finish_diff(
        &self,
        file: &str,
        target: &Target,
        patch: &diff::FilePatch,
        strategy: Strategy,
    ) -> crate::Result<CoderResult> {
        match diff::apply(&target.text, patch) {
            Ok(updated) => {
                target.store(&updated)?;
                tracing::info!(file = %file, hunks = patch.hunks.len(), strategy = strategy.as_str(), "diff applied");
                Ok(CoderResult::applied(file, strategy))
            }
            Err(failure) => {
                let suggestion = match &failure {
                    PatchFailure::HunkMismatch { hunk } => {
                        format!("hunk {hunk} context differs from the file; regenerate the diff from current content")
                    }
                    _ => "regenerate the diff from current content".to_string(),
                };
                Ok(CoderResult::failed(file, failure, vec![suggestion]))
            }
        }
    }

    /// Archive `target_dir` (relative to the root, or absolute) before a
    /// batch of patches
    pub fn generate_snapshot(&self, target_dir: &Path) -> crate::Result<PathBuf> {
        let dir = if target_dir.is_absolute() {
            target_dir.to_path_buf()
        } else {
            self.root.join(target_dir)
        };
        snapshot::generate_snapshot(&dir, &self.config.snapshot_dir)
    }

    pub fn restore_snapshot(&self, archive: &Path, target_dir: &Path) -> crate::Result<usize> {
        let dir = if target_dir.is_absolute() {
            target_dir.to_path_buf()
        } else {
            self.root.join(target_dir)
        };
        snapshot::restore_snapshot(archive, &dir)
    }
}

/// File names when a search/replace payload carries diff headers or
/// apply-patch markers for more than one distinct file
fn spanned_files(payload: &str) -> Option<Vec<String>> {
    let mut paths: Vec<String> = Vec::new();
    let lines: Vec<&str> = payload.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let named = if let Some(rest) = line.strip_prefix("diff --git ") {
            rest.split_whitespace().next().map(str::to_string)
        } else if let Some(rest) = line.strip_prefix("*** Update File: ") {
            Some(rest.trim().to_string())
        } else if let (Some(_), Some(new)) = (
            line.strip_prefix("--- "),
            lines.get(i + 1).and_then(|l| l.strip_prefix("+++ ")),
        ) {
            Some(new.trim().to_string())
        } else {
            None
        };
        if let Some(path) = named {
            let path = match path.strip_prefix("a/").or_else(|| path.strip_prefix("b/")) {
                Some(rest) => rest.to_string(),
                None => path,
            };
            if path != "/dev/null" && !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    (paths.len() > 1).then_some(paths)
}

/// Diff header path and requested path refer to the same file
fn same_file(header: &str, requested: &str) -> bool {
    let requested = requested.trim_start_matches("./");
    header == requested || header.ends_with(&format!("/{requested}")) || requested.ends_with(&format!("/{header}"))
}

/// Write via a temp file in the same directory, then rename over `path`
fn atomic_write(path: &Path, contents: &[u8]) -> crate::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        fs::set_permissions(tmp.path(), permissions)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
