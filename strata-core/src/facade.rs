//! `Strata`: one analyzed root with all three index tiers, search and the
//! patch engine behind a single handle.

use crate::analyze::cache::{AnalysisCache, MemoryCache, SqliteCache};
use crate::analyze::relevance::{RelevanceScore, RelevanceScorer};
use crate::analyze::{Analysis, Analyzer, CancellationToken};
use crate::coder::{Coder, CoderResult, PatchOperation, PatchOptions};
use crate::config::{Config, STRATA_DIR};
use crate::error::{AnalysisIssue, StrataError};
use crate::index::{IndexBuilder, RepositoryMap, Skeleton};
use crate::parse::ParserRegistry;
use crate::search::{ContentQuery, SearchEngine, SearchOutcome};
use crate::symbol::{CodeNode, LineRange, Location, SymbolId, SymbolKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A symbol hit from [`Strata::search_symbols`]
#[derive(Debug, Clone, Serialize)]
pub struct SymbolMatch {
    pub id: SymbolId,
    pub path: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub lines: LineRange,
    pub signature: String,
    pub importance: f64,
    pub relevance: RelevanceScore,
}

/// Where a symbol is referenced
#[derive(Debug, Clone, Serialize)]
pub struct SymbolReferences {
    pub id: SymbolId,
    pub name: String,
    pub locations: Vec<Location>,
}

pub struct Strata {
    root: PathBuf,
    config: Config,
    analyzer: Analyzer,
    index: IndexBuilder,
    search: SearchEngine,
    coder: Coder,
    analysis: Option<Analysis>,
    /// Bumped on every successful patch
    generation: u64,
}

impl Strata {
    /// Open `root` with its `.strata/config.toml` (or defaults) and the
    /// persistent cache.
    pub fn open(root: &Path) -> crate::Result<Self> {
        Self::open_with_cache(root, true)
    }

    /// Like [`Strata::open`], but analysis results live only in memory
    pub fn open_uncached(root: &Path) -> crate::Result<Self> {
        Self::open_with_cache(root, false)
    }

    fn open_with_cache(root: &Path, persistent: bool) -> crate::Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|_| StrataError::FileNotFound(root.to_path_buf()))?;
        let config = Config::load_or_default(&root)?;
        let cache: Box<dyn AnalysisCache> = if persistent {
            let db = root.join(STRATA_DIR).join("cache.db");
            match SqliteCache::open_or_rebuild(&db) {
                Ok(cache) => Box::new(cache),
                Err(e) => {
                    AnalysisIssue::CacheCorruption {
                        path: db.display().to_string(),
                        message: format!("{e}; analyzing in memory"),
                    }
                    .log();
                    Box::new(MemoryCache::new())
                }
            }
        } else {
            Box::new(MemoryCache::new())
        };
        let registry = Arc::new(ParserRegistry::with_defaults());
        let analyzer = Analyzer::new(&root, config.clone(), Arc::clone(&registry), cache);
        Ok(Self::with_analyzer(&root, config, analyzer, registry))
    }

    /// Assemble from an analyzer built by the caller (custom parsers or cache)
    pub fn with_analyzer(
        root: &Path,
        config: Config,
        analyzer: Analyzer,
        registry: Arc<ParserRegistry>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            index: IndexBuilder::new(root, config.clone(), registry),
            search: SearchEngine::new(root, &config),
            coder: Coder::new(root, config.coder.clone()),
            analyzer,
            config,
            analysis: None,
            generation: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The analysis behind the last map, if any
    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn search_engine(&mut self) -> &mut SearchEngine {
        &mut self.search
    }

    /// Analyze the root and build the L1 map.
    ///
    /// `trajectory` is the text of an execution log; `focus` re-ranks key
    /// symbols against a free-text query.
    pub fn analyze_repository(
        &mut self,
        trajectory: Option<&str>,
        focus: Option<&str>,
    ) -> crate::Result<Arc<RepositoryMap>> {
        self.analyze_repository_with_cancel(trajectory, focus, &CancellationToken::new())
    }

    pub fn analyze_repository_with_cancel(
        &mut self,
        trajectory: Option<&str>,
        focus: Option<&str>,
        token: &CancellationToken,
    ) -> crate::Result<Arc<RepositoryMap>> {
        let analysis = self.analyzer.analyze_with_cancel(token)?;
        let map = self.index.repository_map(&analysis, trajectory, focus);
        self.analysis = Some(analysis);
        Ok(map)
    }

    /// L2 skeleton of one file, or of every analyzed file when `file` is
    /// `None`
    pub fn get_skeleton(&mut self, file: Option<&str>) -> crate::Result<Vec<Arc<Skeleton>>> {
        match file {
            Some(path) => Ok(vec![self.index.skeleton(self.analysis.as_ref(), path)?]),
            None => {
                let analysis = self.analysis.as_ref().ok_or(StrataError::NotAnalyzed)?;
                self.index.skeletons(analysis)
            }
        }
    }

    /// L3 read of `start_line..=end_line` from the live file
    pub fn read_implementation(
        &self,
        file: &str,
        start_line: usize,
        end_line: usize,
    ) -> crate::Result<CodeNode> {
        self.index.read(file, start_line, end_line)
    }

    /// Live source of a symbol named `name` (short or qualified), most
    /// important first
    pub fn symbol_implementation(&self, name: &str) -> crate::Result<Vec<CodeNode>> {
        let analysis = self.analysis.as_ref().ok_or(StrataError::NotAnalyzed)?;
        let mut found = analysis.find(name);
        if found.is_empty() {
            return Err(StrataError::UnknownSymbol(name.to_string()));
        }
        found.sort_by(|a, b| {
            analysis
                .importance_of(b.id)
                .total_cmp(&analysis.importance_of(a.id))
                .then_with(|| a.id.cmp(&b.id))
        });
        found
            .into_iter()
            .map(|s| self.index.code_node(analysis, s.id))
            .collect()
    }

    /// Every location referencing a symbol named `name`
    pub fn references(&self, name: &str) -> crate::Result<Vec<SymbolReferences>> {
        let analysis = self.analysis.as_ref().ok_or(StrataError::NotAnalyzed)?;
        let found = analysis.find(name);
        if found.is_empty() {
            return Err(StrataError::UnknownSymbol(name.to_string()));
        }
        found
            .into_iter()
            .map(|s| -> crate::Result<SymbolReferences> {
                Ok(SymbolReferences {
                    id: s.id,
                    name: s.display_name(),
                    locations: self.index.references(Some(analysis), s.id)?,
                })
            })
            .collect()
    }

    /// Functions and classes scored against `query`, best first
    pub fn search_symbols(&self, query: &str, limit: usize) -> crate::Result<Vec<SymbolMatch>> {
        let analysis = self.analysis.as_ref().ok_or(StrataError::NotAnalyzed)?;
        let scorer = RelevanceScorer::new(query, &self.config.relevance);
        Ok(analysis
            .relevance(&scorer)
            .into_iter()
            .take(limit)
            .filter_map(|(id, relevance)| {
                let s = analysis.symbols.get(id)?;
                Some(SymbolMatch {
                    id,
                    path: s.path.clone(),
                    qualified_name: s.qualified_name.clone(),
                    kind: s.kind,
                    lines: s.lines,
                    signature: s.signature.clone(),
                    importance: analysis.importance_of(id),
                    relevance,
                })
            })
            .collect())
    }

    pub fn search_content(&self, query: &ContentQuery) -> crate::Result<SearchOutcome> {
        self.search.search_content(query)
    }

    pub fn search_glob(&self, pattern: &str) -> crate::Result<Vec<String>> {
        self.search.search_glob(pattern)
    }

    pub fn read_file(&self, path: &str) -> crate::Result<String> {
        self.search.read_file(path)
    }

    /// Zip `target_dir` (relative to the root, or absolute) and return the
    /// archive path
    pub fn generate_snapshot(&self, target_dir: &Path) -> crate::Result<PathBuf> {
        self.coder.generate_snapshot(target_dir)
    }

    /// Re-extract a snapshot over `target_dir`; cached index layers are
    /// dropped since any file may have changed
    pub fn restore_snapshot(&mut self, archive: &Path, target_dir: &Path) -> crate::Result<usize> {
        let restored = self.coder.restore_snapshot(archive, target_dir)?;
        self.index.clear();
        self.generation += 1;
        Ok(restored)
    }

    pub fn apply_patch(
        &mut self,
        file: &str,
        search: &str,
        replace: &str,
        options: &PatchOptions,
    ) -> crate::Result<CoderResult> {
        let result = self.coder.apply_patch(file, search, replace, options)?;
        Ok(self.after_patch(result))
    }

    pub fn apply_diff(&mut self, file: &str, diff_text: &str) -> crate::Result<CoderResult> {
        let result = self.coder.apply_diff(file, diff_text)?;
        Ok(self.after_patch(result))
    }

    pub fn apply_operations(
        &mut self,
        file: &str,
        ops: &[PatchOperation],
    ) -> crate::Result<CoderResult> {
        let result = self.coder.apply_operations(file, ops)?;
        Ok(self.after_patch(result))
    }

    fn after_patch(&mut self, result: CoderResult) -> CoderResult {
        if result.success {
            let path = result.file.trim_start_matches("./");
            self.index.invalidate(path);
            self.generation += 1;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A.py"), "def foo():\n    return 1\n").unwrap();
        fs::write(
            dir.path().join("B.py"),
            "from A import foo\n\n\ndef bar():\n    return foo()\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_queries_need_analysis() {
        let dir = repo();
        let mut strata = Strata::open(dir.path()).unwrap();
        assert!(matches!(strata.references("foo"), Err(StrataError::NotAnalyzed)));
        assert!(matches!(strata.get_skeleton(None), Err(StrataError::NotAnalyzed)));
        // Single-file tiers work on live content
        assert_eq!(strata.get_skeleton(Some("A.py")).unwrap().len(), 1);
        assert_eq!(strata.read_implementation("A.py", 1, 1).unwrap().text, "def foo():\n");
    }

    #[test]
    fn test_analyze_and_look_up() {
        let dir = repo();
        let mut strata = Strata::open(dir.path()).unwrap();
        let map = strata.analyze_repository(None, None).unwrap();
        assert!(map.call_edges.iter().any(|e| e.caller_name.ends_with("bar") && e.callee_name.ends_with("foo")));

        let refs = strata.references("foo").unwrap();
        assert_eq!(refs.len(), 1);
        assert!(refs[0].locations.iter().any(|l| l.path == "B.py" && l.line == 5));

        let code = strata.symbol_implementation("bar").unwrap();
        assert_eq!(code[0].text, "def bar():\n    return foo()\n");

        let hits = strata.search_symbols("foo", 5).unwrap();
        assert_eq!(hits[0].qualified_name, "foo");

        assert!(matches!(strata.references("nothing"), Err(StrataError::UnknownSymbol(_))));
    }

    #[test]
    fn test_uncached_leaves_no_database() {
        let dir = repo();
        let mut strata = Strata::open_uncached(dir.path()).unwrap();
        strata.analyze_repository(None, None).unwrap();
        assert!(!dir.path().join(STRATA_DIR).join("cache.db").exists());
    }

    #[test]
    fn test_corrupt_cache_database_is_rebuilt() {
        let dir = repo();
        let db = dir.path().join(STRATA_DIR).join("cache.db");
        fs::create_dir_all(db.parent().unwrap()).unwrap();
        fs::write(&db, vec![b'x'; 4096]).unwrap();

        let mut strata = Strata::open(dir.path()).unwrap();
        let map = strata.analyze_repository(None, None).unwrap();
        assert!(!map.call_edges.is_empty());
        assert!(SqliteCache::open(&db).is_ok());
    }

    #[test]
    fn test_foreign_schema_version_is_rebuilt() {
        let dir = repo();
        let db = dir.path().join(STRATA_DIR).join("cache.db");
        fs::create_dir_all(db.parent().unwrap()).unwrap();
        {
            let conn = rusqlite::Connection::open(&db).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        let mut strata = Strata::open(dir.path()).unwrap();
        strata.analyze_repository(None, None).unwrap();
        assert_eq!(strata.read_implementation("A.py", 1, 1).unwrap().text, "def foo():\n");
    }

    #[test]
    fn test_patch_bumps_generation() {
        let dir = repo();
        let mut strata = Strata::open(dir.path()).unwrap();
        let before = strata.get_skeleton(Some("A.py")).unwrap()[0].content_hash.clone();

        let result = strata
            .apply_patch("A.py", "return 1", "return 2", &PatchOptions::default())
            .unwrap();
        assert!(result.success);
        assert_eq!(strata.generation(), 1);
        let after = strata.get_skeleton(Some("A.py")).unwrap()[0].content_hash.clone();
        assert_ne!(before, after);

        let failed = strata
            .apply_patch("A.py", "return 7", "return 8", &PatchOptions { fuzzy: Some(false), threshold: None })
            .unwrap();
        assert!(!failed.success);
        assert_eq!(strata.generation(), 1);
    }
}
