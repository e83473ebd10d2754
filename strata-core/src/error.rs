//! Error types for strata operations

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Which bound of a line-range request was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeBound {
    /// `start_line` is 0 or past the end of the file
    Start,
    /// `end_line` is past the end of the file
    End,
    /// `start_line > end_line`
    Inverted,
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Inverted => "inverted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Path escapes the analyzed root: {}", .0.display())]
    PathOutsideRoot(PathBuf),

    #[error(
        "Line range {start}-{end} out of bounds for {} ({line_count} lines, {bound} bound violated)",
        .path.display()
    )]
    OutOfRange {
        path: PathBuf,
        start: usize,
        end: usize,
        line_count: usize,
        bound: RangeBound,
    },

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Config already exists at {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Glob pattern error: {0}")]
    GlobPattern(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),

    #[error("Unknown search backend: {0}")]
    UnknownBackend(String),

    #[error("Search backend {backend} failed: {message}")]
    SearchBackend { backend: String, message: String },

    #[error("Analysis cancelled after {processed} files")]
    Cancelled { processed: usize },

    #[error("Repository has not been analyzed yet (run analyze_repository first)")]
    NotAnalyzed,

    #[error("File is not part of the current analysis: {0}")]
    UnknownFile(String),

    #[error("No symbol {0} in the current analysis")]
    UnknownSymbol(String),

    #[error("Cache schema version mismatch: database is v{found}, expected v{expected}. Delete .strata/cache.db to rebuild.")]
    SchemaVersionMismatch { found: i32, expected: i32 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl StrataError {
    /// Stable machine-readable code, used by the CLI's JSON error output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::FileNotFound(_) => "file_not_found",
            Self::PathOutsideRoot(_) => "path_outside_root",
            Self::OutOfRange { .. } => "out_of_range",
            Self::ConfigParse(_) => "config_parse",
            Self::ConfigExists(_) => "config_exists",
            Self::GlobPattern(_) => "glob_pattern",
            Self::InvalidRegex(_) => "invalid_regex",
            Self::UnknownBackend(_) => "unknown_backend",
            Self::SearchBackend { .. } => "search_backend",
            Self::Cancelled { .. } => "cancelled",
            Self::NotAnalyzed => "not_analyzed",
            Self::UnknownFile(_) => "unknown_file",
            Self::UnknownSymbol(_) => "unknown_symbol",
            Self::SchemaVersionMismatch { .. } => "schema_version_mismatch",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Archive(_) => "archive",
        }
    }
}

/// Non-fatal problems found while analyzing a repository.
///
/// These are recorded on the analysis and logged; they never abort a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisIssue {
    /// A file could not be read or produced syntax errors
    Parse { path: String, message: String },
    /// No usable cache entry for a file (first sight or content changed)
    CacheMiss { path: String },
    /// A cache entry existed but could not be decoded; it was rebuilt
    CacheCorruption { path: String, message: String },
    /// A reference pointed at a symbol id that is not in the table
    GraphInconsistency { message: String },
    /// A search backend was unavailable and a slower path was used
    BackendUnavailable { backend: String, message: String },
}

impl AnalysisIssue {
    /// Emit this issue through `tracing` at the level it deserves.
    pub fn log(&self) {
        match self {
            Self::CacheMiss { path } => tracing::debug!(path = %path, "cache miss"),
            Self::Parse { path, message } => {
                tracing::warn!(path = %path, "parse issue: {}", message)
            }
            Self::CacheCorruption { path, message } => {
                tracing::warn!(path = %path, "corrupt cache entry rebuilt: {}", message)
            }
            Self::GraphInconsistency { message } => {
                tracing::warn!("graph inconsistency pruned: {}", message)
            }
            Self::BackendUnavailable { backend, message } => {
                tracing::warn!(backend = %backend, "search backend unavailable: {}", message)
            }
        }
    }
}
