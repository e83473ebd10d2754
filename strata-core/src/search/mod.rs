//! Search engine: content search, glob search and file reads behind one
//! dispatch, with pluggable named content-search backends.

pub mod discovery;
pub mod ripgrep;
pub mod scan;

use crate::config::{BackendPreference, Config, SearchConfig};
use crate::error::{AnalysisIssue, StrataError};
use discovery::FileWalker;
use regex::{Regex, RegexBuilder};
use ripgrep::{RipgrepBackend, RipgrepManager};
use scan::ScanBackend;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// A content search request
#[derive(Debug, Clone)]
pub struct ContentQuery {
    pub pattern: String,
    /// Treat `pattern` as a plain substring
    pub literal: bool,
    pub case_insensitive: bool,
    /// Glob restricting which files are searched
    pub scope: Option<String>,
    /// Overrides the configured result limit
    pub max_results: Option<usize>,
}

impl ContentQuery {
    pub fn literal(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            literal: true,
            case_insensitive: false,
            scope: None,
            max_results: None,
        }
    }

    pub fn regex(pattern: &str) -> Self {
        Self {
            literal: false,
            ..Self::literal(pattern)
        }
    }

    /// Compile the query into a line regex
    pub fn compile(&self) -> crate::Result<Regex> {
        let pattern = if self.literal {
            regex::escape(&self.pattern)
        } else {
            self.pattern.clone()
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(self.case_insensitive)
            .build()
            .map_err(|e| StrataError::InvalidRegex(e.to_string()))
    }
}

/// One matching line
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ContentMatch {
    pub path: String,
    /// 1-indexed
    pub line: usize,
    /// 1-indexed byte column of the first match on the line
    pub column: usize,
    pub text: String,
}

/// Result of a content search
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub matches: Vec<ContentMatch>,
    /// Backend that actually served the request
    pub backend: String,
    pub truncated: bool,
    /// Set when the preferred backend was unavailable
    pub degraded: Option<AnalysisIssue>,
}

/// A named content-search implementation
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    /// Search under `root`. Paths in the result are repo-relative.
    fn search(&self, root: &Path, query: &ContentQuery) -> crate::Result<Vec<ContentMatch>>;
}

/// Dispatches search requests for one repository root
pub struct SearchEngine {
    root: PathBuf,
    config: SearchConfig,
    walker: FileWalker,
    backends: BTreeMap<String, Arc<dyn SearchBackend>>,
    preferred: String,
    ripgrep: Arc<RipgrepManager>,
}

impl SearchEngine {
    pub fn new(root: &Path, config: &Config) -> Self {
        let ignore = config.ignore.patterns.clone();
        let ripgrep = Arc::new(RipgrepManager::new(
            config.search.ripgrep_path.clone(),
            config.search.max_processes,
        ));

        let mut engine = Self {
            root: root.to_path_buf(),
            config: config.search.clone(),
            walker: FileWalker::new(root, &ignore),
            backends: BTreeMap::new(),
            preferred: match config.search.backend {
                BackendPreference::Scan => "scan".to_string(),
                BackendPreference::Auto | BackendPreference::Ripgrep => "ripgrep".to_string(),
            },
            ripgrep: Arc::clone(&ripgrep),
        };
        engine.register_backend(Arc::new(ScanBackend::new(ignore.clone())));
        engine.register_backend(Arc::new(RipgrepBackend::new(ripgrep, ignore)));
        engine
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn walker(&self) -> &FileWalker {
        &self.walker
    }

    pub fn ripgrep(&self) -> &RipgrepManager {
        &self.ripgrep
    }

    /// Add or replace a named backend
    pub fn register_backend(&mut self, backend: Arc<dyn SearchBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Make `name` the default content-search backend
    pub fn set_preferred(&mut self, name: &str) -> crate::Result<()> {
        if !self.backends.contains_key(name) {
            return Err(StrataError::UnknownBackend(name.to_string()));
        }
        self.preferred = name.to_string();
        Ok(())
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Content search through the preferred backend, degrading to the
    /// in-process scan when it is unavailable or fails.
    pub fn search_content(&self, query: &ContentQuery) -> crate::Result<SearchOutcome> {
        let preferred = self.preferred.clone();
        self.search_content_with(&preferred, query)
    }

    /// Content search through a named backend
    pub fn search_content_with(
        &self,
        backend: &str,
        query: &ContentQuery,
    ) -> crate::Result<SearchOutcome> {
        // Reject bad patterns up front so every backend reports them alike
        query.compile()?;

        let chosen = self
            .backends
            .get(backend)
            .ok_or_else(|| StrataError::UnknownBackend(backend.to_string()))?;

        let mut degraded = None;
        let result = if chosen.is_available() {
            chosen.search(&self.root, query)
        } else {
            Err(StrataError::SearchBackend {
                backend: backend.to_string(),
                message: "backend unavailable".to_string(),
            })
        };

        let (mut matches, served_by) = match result {
            Ok(matches) => (matches, backend.to_string()),
            Err(err) if backend != "scan" => {
                let issue = AnalysisIssue::BackendUnavailable {
                    backend: backend.to_string(),
                    message: err.to_string(),
                };
                issue.log();
                degraded = Some(issue);
                let scan = self
                    .backends
                    .get("scan")
                    .ok_or_else(|| StrataError::UnknownBackend("scan".to_string()))?;
                (scan.search(&self.root, query)?, "scan".to_string())
            }
            Err(err) => return Err(err),
        };

        matches.sort();
        let limit = query.max_results.unwrap_or(self.config.max_results);
        let truncated = matches.len() > limit;
        matches.truncate(limit);

        tracing::debug!(
            backend = %served_by,
            matches = matches.len(),
            truncated,
            "content search"
        );
        Ok(SearchOutcome {
            matches,
            backend: served_by,
            truncated,
            degraded,
        })
    }

    /// Repo-relative paths matching a glob pattern
    pub fn search_glob(&self, pattern: &str) -> crate::Result<Vec<String>> {
        self.walker.walk(pattern)
    }

    /// Read a file under the root
    pub fn read_file(&self, path: &str) -> crate::Result<String> {
        let full = resolve_in_root(&self.root, path)?;
        Ok(std::fs::read_to_string(full)?)
    }
}

/// Resolve a caller-supplied path against `root`, refusing anything that
/// escapes it. The file must exist.
pub fn resolve_in_root(root: &Path, path: &str) -> crate::Result<PathBuf> {
    let requested = Path::new(path);
    let relative = if requested.is_absolute() {
        requested
            .strip_prefix(root)
            .map_err(|_| StrataError::PathOutsideRoot(requested.to_path_buf()))?
    } else {
        requested
    };

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(StrataError::PathOutsideRoot(requested.to_path_buf()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StrataError::PathOutsideRoot(requested.to_path_buf()));
            }
        }
    }

    let full = root.join(&normalized);
    if !full.is_file() {
        return Err(StrataError::FileNotFound(full));
    }

    // Symlinks must not lead outside the root either
    let canonical_root = root.canonicalize()?;
    let canonical = full.canonicalize()?;
    if !canonical.starts_with(&canonical_root) {
        return Err(StrataError::PathOutsideRoot(requested.to_path_buf()));
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct FailingBackend;

    impl SearchBackend for FailingBackend {
        fn name(&self) -> &str {
            "ripgrep"
        }

        fn is_available(&self) -> bool {
            false
        }

        fn search(&self, _root: &Path, _query: &ContentQuery) -> crate::Result<Vec<ContentMatch>> {
            unreachable!("unavailable backend must not be called")
        }
    }

    struct FixedBackend;

    impl SearchBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        fn search(&self, _root: &Path, _query: &ContentQuery) -> crate::Result<Vec<ContentMatch>> {
            Ok(vec![ContentMatch {
                path: "virtual.txt".to_string(),
                line: 1,
                column: 1,
                text: "hit".to_string(),
            }])
        }
    }

    fn engine() -> (TempDir, SearchEngine) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        fs::write(dir.path().join("b.py"), "foo()\n").unwrap();
        let engine = SearchEngine::new(dir.path(), &Config::default());
        (dir, engine)
    }

    #[test]
    fn test_unavailable_backend_degrades_to_scan() {
        let (_dir, mut engine) = engine();
        engine.register_backend(Arc::new(FailingBackend));
        let outcome = engine.search_content(&ContentQuery::literal("foo")).unwrap();
        assert_eq!(outcome.backend, "scan");
        assert!(matches!(
            outcome.degraded,
            Some(AnalysisIssue::BackendUnavailable { .. })
        ));
        assert_eq!(outcome.matches.len(), 2);
    }

    #[test]
    fn test_registered_backend_is_dispatched_by_name() {
        let (_dir, mut engine) = engine();
        engine.register_backend(Arc::new(FixedBackend));
        let outcome = engine
            .search_content_with("fixed", &ContentQuery::literal("x"))
            .unwrap();
        assert_eq!(outcome.backend, "fixed");
        assert_eq!(outcome.matches[0].path, "virtual.txt");
        assert!(matches!(
            engine.search_content_with("nope", &ContentQuery::literal("x")),
            Err(StrataError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_results_are_limited() {
        let (_dir, engine) = engine();
        let mut query = ContentQuery::literal("foo");
        query.max_results = Some(1);
        let outcome = engine.search_content_with("scan", &query).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert!(outcome.truncated);
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.search_content(&ContentQuery::regex("(unclosed")),
            Err(StrataError::InvalidRegex(_))
        ));
    }

    #[test]
    fn test_read_file_refuses_escape() {
        let (_dir, engine) = engine();
        assert!(engine.read_file("a.py").unwrap().contains("def foo"));
        assert!(matches!(
            engine.read_file("../etc/passwd"),
            Err(StrataError::PathOutsideRoot(_))
        ));
        assert!(matches!(
            engine.read_file("missing.py"),
            Err(StrataError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_glob_search() {
        let (_dir, engine) = engine();
        assert_eq!(engine.search_glob("*.py").unwrap(), vec!["a.py", "b.py"]);
    }
}
