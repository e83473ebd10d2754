//! Graph & importance analyzer.
//!
//! Files are parsed in parallel on a bounded worker pool; results flow
//! through a channel to the calling thread, which alone touches the cache
//! and assembles the graphs.

pub mod cache;
pub mod graph;
pub mod rank;
pub mod relevance;

use crate::config::{Config, STRATA_DIR};
use crate::error::{AnalysisIssue, StrataError};
use crate::parse::ParserRegistry;
use crate::search::discovery::FileWalker;
use crate::symbol::{content_hash, FileRecord, Symbol, SymbolId};
use cache::{AnalysisCache, Manifest, SqliteCache};
use graph::{CallGraph, DependencyGraph, ReferenceIndex, ResolutionStats, SymbolTable};
use rayon::prelude::*;
use relevance::{RelevanceScore, RelevanceScorer};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Cooperative cancellation flag, checked between files
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters describing one analysis run
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisStats {
    pub files: usize,
    /// Files parsed in this run
    pub parsed_files: usize,
    /// Files whose record came from the cache
    pub cached_files: usize,
    /// Files handled by the null parser
    pub opaque_files: usize,
    pub symbols: usize,
    pub call_edges: usize,
    pub dependency_edges: usize,
    #[serde(flatten)]
    pub resolution: ResolutionStats,
    pub false_negative_rate: f64,
    pub parse_issues: usize,
    pub rank_iterations: usize,
    pub rank_converged: bool,
}

/// Result of analyzing a repository
#[derive(Debug, Clone)]
pub struct Analysis {
    pub root: PathBuf,
    /// Per-file records, keyed by repo-relative path
    pub files: BTreeMap<String, FileRecord>,
    pub symbols: SymbolTable,
    pub calls: CallGraph,
    pub dependencies: DependencyGraph,
    pub references: ReferenceIndex,
    /// Importance per symbol, indexed by `SymbolId`
    pub importance: Vec<f64>,
    pub stats: AnalysisStats,
    pub issues: Vec<AnalysisIssue>,
}

impl Analysis {
    pub fn importance_of(&self, id: SymbolId) -> f64 {
        self.importance.get(id.index()).copied().unwrap_or(0.0)
    }

    /// Functions and classes by descending importance (ties by id)
    pub fn ranked(&self) -> Vec<SymbolId> {
        let mut ids: Vec<SymbolId> = self
            .symbols
            .iter()
            .filter(|s| s.kind.is_callable())
            .map(|s| s.id)
            .collect();
        ids.sort_by(|a, b| {
            self.importance_of(*b)
                .total_cmp(&self.importance_of(*a))
                .then_with(|| a.cmp(b))
        });
        ids
    }

    /// Score every function and class against `query`, best first.
    ///
    /// Symbol content is read from the files on disk; unreadable files
    /// score on signature, docstring and name only.
    pub fn relevance(&self, scorer: &RelevanceScorer) -> Vec<(SymbolId, RelevanceScore)> {
        let mut scored = Vec::new();
        for path in self.symbols.files() {
            let source = fs::read_to_string(self.root.join(path)).unwrap_or_default();
            for symbol in self.symbols.in_file(path) {
                if !symbol.kind.is_callable() {
                    continue;
                }
                let content = source.get(symbol.span.clone()).unwrap_or_default();
                let score = scorer.score(symbol, content);
                if score.total > 0.0 {
                    scored.push((symbol.id, score));
                }
            }
        }
        scored.sort_by(|a, b| b.1.total.total_cmp(&a.1.total).then_with(|| a.0.cmp(&b.0)));
        scored
    }

    /// Symbols with this short or qualified name
    pub fn find(&self, name: &str) -> Vec<&Symbol> {
        let mut found: Vec<&Symbol> = self
            .symbols
            .named(name)
            .iter()
            .filter_map(|&id| self.symbols.get(id))
            .collect();
        if found.is_empty() {
            found = self
                .symbols
                .iter()
                .filter(|s| s.qualified_name == name || s.display_name() == name)
                .collect();
        }
        found
    }
}

/// What a worker learned about one file
enum FileOutcome {
    Parsed(FileRecord),
    /// Hash and grammar match the cache; the record is loaded in the merge
    Unchanged { path: String, hash: String },
    Unreadable { path: String, message: String },
}

/// Analyzes one repository root
pub struct Analyzer {
    root: PathBuf,
    config: Config,
    registry: Arc<ParserRegistry>,
    cache: Box<dyn AnalysisCache>,
    walker: FileWalker,
}

impl Analyzer {
    pub fn new(
        root: &Path,
        config: Config,
        registry: Arc<ParserRegistry>,
        cache: Box<dyn AnalysisCache>,
    ) -> Self {
        let walker = FileWalker::new(root, &config.ignore.patterns);
        Self {
            root: root.to_path_buf(),
            config,
            registry,
            cache,
            walker,
        }
    }

    /// Analyzer with built-in parsers and the SQLite cache under `.strata/`
    pub fn open(root: &Path, config: Config) -> crate::Result<Self> {
        let cache = SqliteCache::open(&root.join(STRATA_DIR).join("cache.db"))?;
        Ok(Self::new(
            root,
            config,
            Arc::new(ParserRegistry::with_defaults()),
            Box::new(cache),
        ))
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn analyze(&mut self) -> crate::Result<Analysis> {
        self.analyze_with_cancel(&CancellationToken::new())
    }

    /// Analyze every file matching the configured glob.
    ///
    /// On cancellation, files already parsed are still written to the
    /// cache before `Cancelled` is returned.
    pub fn analyze_with_cancel(&mut self, token: &CancellationToken) -> crate::Result<Analysis> {
        let files = self.walker.walk(self.config.default_glob())?;
        let mut issues = Vec::new();

        let manifest = match self.cache.manifest() {
            Ok(m) => m,
            Err(e) => {
                let issue = AnalysisIssue::CacheCorruption {
                    path: STRATA_DIR.to_string(),
                    message: e.to_string(),
                };
                issue.log();
                issues.push(issue);
                Manifest::new()
            }
        };

        let outcomes = if files.len() <= self.config.indexing.sequential_threshold {
            self.scan_sequential(&files, &manifest, token)
        } else {
            self.scan_parallel(&files, &manifest, token)?
        };

        let processed = outcomes.len();
        let cancelled = token.is_cancelled() && processed < files.len();

        let mut stats = AnalysisStats::default();
        let records = self.merge(outcomes, &mut stats, &mut issues);

        if cancelled {
            tracing::info!(processed, total = files.len(), "analysis cancelled");
            return Err(StrataError::Cancelled { processed });
        }

        self.evict_vanished(&records, &mut issues);

        let build = graph::build(&records);
        for issue in &build.issues {
            issue.log();
        }
        issues.extend(build.issues);

        let edges: Vec<(usize, usize, f64)> = build
            .calls
            .edges()
            .map(|(from, to, info)| (from.index(), to.index(), info.count as f64))
            .collect();
        let ranking = rank::importance(build.symbols.len(), &edges, &self.config.ranking);

        stats.files = records.len();
        stats.symbols = build.symbols.len();
        stats.call_edges = build.calls.edge_count();
        stats.dependency_edges = build.dependencies.edge_count();
        stats.resolution = build.resolution;
        stats.false_negative_rate = build.resolution.false_negative_rate();
        stats.rank_iterations = ranking.iterations;
        stats.rank_converged = ranking.converged;

        tracing::info!(
            files = stats.files,
            parsed = stats.parsed_files,
            cached = stats.cached_files,
            symbols = stats.symbols,
            call_edges = stats.call_edges,
            unresolved = stats.resolution.unresolved_calls,
            "analysis complete"
        );

        Ok(Analysis {
            root: self.root.clone(),
            files: records,
            symbols: build.symbols,
            calls: build.calls,
            dependencies: build.dependencies,
            references: build.references,
            importance: ranking.scores,
            stats,
            issues,
        })
    }

    /// Small batches run on the calling thread
    fn scan_sequential(
        &self,
        files: &[String],
        manifest: &Manifest,
        token: &CancellationToken,
    ) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());
        for rel in files {
            if token.is_cancelled() {
                break;
            }
            outcomes.push(scan_file(&self.root, rel, manifest, &self.registry));
        }
        outcomes
    }

    fn scan_parallel(
        &self,
        files: &[String],
        manifest: &Manifest,
        token: &CancellationToken,
    ) -> crate::Result<Vec<FileOutcome>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.indexing.workers)
            .build()
            .map_err(|e| StrataError::Io(std::io::Error::other(e.to_string())))?;

        let (tx, rx) = crossbeam_channel::bounded::<FileOutcome>(64);
        let root = self.root.as_path();
        let registry = self.registry.as_ref();

        let outcomes = std::thread::scope(|s| {
            let producer = tx.clone();
            s.spawn(move || {
                pool.install(|| {
                    files.par_iter().for_each_with(producer, |sender, rel| {
                        if token.is_cancelled() {
                            return;
                        }
                        let outcome = scan_file(root, rel, manifest, registry);
                        if sender.send(outcome).is_err() {
                            token.cancel();
                        }
                    });
                });
            });
            // Only the producer's sender keeps the channel open
            drop(tx);
            rx.iter().collect::<Vec<_>>()
        });
        Ok(outcomes)
    }

    /// Single-threaded merge: cache reads and writes happen only here
    fn merge(
        &mut self,
        outcomes: Vec<FileOutcome>,
        stats: &mut AnalysisStats,
        issues: &mut Vec<AnalysisIssue>,
    ) -> BTreeMap<String, FileRecord> {
        let mut records = BTreeMap::new();

        for outcome in outcomes {
            let record = match outcome {
                FileOutcome::Parsed(record) => {
                    AnalysisIssue::CacheMiss {
                        path: record.path.clone(),
                    }
                    .log();
                    self.store(&record, issues);
                    stats.parsed_files += 1;
                    record
                }
                FileOutcome::Unchanged { path, hash } => match self.cache.get(&path, &hash) {
                    Ok(Some(record)) => {
                        tracing::debug!(path = %path, "cache hit");
                        stats.cached_files += 1;
                        record
                    }
                    Ok(None) => {
                        let issue = AnalysisIssue::CacheMiss { path: path.clone() };
                        issue.log();
                        issues.push(issue);
                        match self.reparse(&path, stats, issues) {
                            Some(r) => r,
                            None => continue,
                        }
                    }
                    Err(e) => {
                        let issue = AnalysisIssue::CacheCorruption {
                            path: path.clone(),
                            message: e.to_string(),
                        };
                        issue.log();
                        issues.push(issue);
                        if let Err(e) = self.cache.invalidate(&path) {
                            tracing::warn!(path = %path, "failed to invalidate cache entry: {}", e);
                        }
                        match self.reparse(&path, stats, issues) {
                            Some(r) => r,
                            None => continue,
                        }
                    }
                },
                FileOutcome::Unreadable { path, message } => {
                    let issue = AnalysisIssue::Parse { path, message };
                    issue.log();
                    issues.push(issue);
                    stats.parse_issues += 1;
                    continue;
                }
            };

            if !record.diagnostics.is_empty() {
                let first = &record.diagnostics[0];
                let issue = AnalysisIssue::Parse {
                    path: record.path.clone(),
                    message: format!(
                        "{} syntax error(s), first at {}:{}: {}",
                        record.diagnostics.len(),
                        first.line,
                        first.column,
                        first.message
                    ),
                };
                issue.log();
                issues.push(issue);
                stats.parse_issues += 1;
            }
            if record.language == "opaque" {
                stats.opaque_files += 1;
            }
            records.insert(record.path.clone(), record);
        }
        records
    }

    fn reparse(
        &mut self,
        path: &str,
        stats: &mut AnalysisStats,
        issues: &mut Vec<AnalysisIssue>,
    ) -> Option<FileRecord> {
        match scan_file(&self.root, path, &Manifest::new(), &self.registry) {
            FileOutcome::Parsed(record) => {
                self.store(&record, issues);
                stats.parsed_files += 1;
                Some(record)
            }
            FileOutcome::Unreadable { path, message } => {
                let issue = AnalysisIssue::Parse { path, message };
                issue.log();
                issues.push(issue);
                stats.parse_issues += 1;
                None
            }
            FileOutcome::Unchanged { .. } => None,
        }
    }

    fn store(&mut self, record: &FileRecord, issues: &mut Vec<AnalysisIssue>) {
        if let Err(e) = self.cache.put(record) {
            let issue = AnalysisIssue::CacheCorruption {
                path: record.path.clone(),
                message: format!("write failed: {e}"),
            };
            issue.log();
            issues.push(issue);
        }
    }

    /// Drop cache entries for files no longer in the tree
    fn evict_vanished(&mut self, records: &BTreeMap<String, FileRecord>, issues: &mut Vec<AnalysisIssue>) {
        let cached = match self.cache.paths() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("failed to list cache entries: {}", e);
                return;
            }
        };
        let live: BTreeSet<&str> = records.keys().map(String::as_str).collect();
        for path in cached.iter().filter(|p| !live.contains(p.as_str())) {
            tracing::debug!(path = %path, "evicting vanished file from cache");
            if let Err(e) = self.cache.invalidate(path) {
                issues.push(AnalysisIssue::CacheCorruption {
                    path: path.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Read, hash and (unless unchanged) parse one file. Runs on workers.
fn scan_file(root: &Path, rel: &str, manifest: &Manifest, registry: &ParserRegistry) -> FileOutcome {
    let full = root.join(rel);

    // Capture mtime before read to avoid TOCTOU race
    let meta = match fs::metadata(&full) {
        Ok(m) => m,
        Err(e) => {
            return FileOutcome::Unreadable {
                path: rel.to_string(),
                message: e.to_string(),
            }
        }
    };
    let mtime = file_mtime(&meta);

    let bytes = match fs::read(&full) {
        Ok(b) => b,
        Err(e) => {
            return FileOutcome::Unreadable {
                path: rel.to_string(),
                message: e.to_string(),
            }
        }
    };
    let source = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            return FileOutcome::Unreadable {
                path: rel.to_string(),
                message: "file is not valid UTF-8".to_string(),
            }
        }
    };

    let hash = content_hash(&source);
    let parser = registry.for_path(rel);
    if let Some((cached_hash, version)) = manifest.get(rel) {
        if *cached_hash == hash && *version == parser.grammar_version() {
            return FileOutcome::Unchanged {
                path: rel.to_string(),
                hash,
            };
        }
    }

    FileOutcome::Parsed(registry.parse_record(rel, &source, mtime, meta.len()))
}

/// Seconds since the epoch, 0 if unavailable
pub(crate) fn file_mtime(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{ParseOutput, SymbolParser};
    use cache::MemoryCache;
    use tempfile::TempDir;

    fn write(dir: &TempDir, path: &str, content: &str) {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    fn analyzer(dir: &TempDir, registry: Arc<ParserRegistry>) -> Analyzer {
        Analyzer::new(
            dir.path(),
            Config::default(),
            registry,
            Box::new(MemoryCache::new()),
        )
    }

    #[test]
    fn test_foo_bar_scenario() {
        let dir = TempDir::new().unwrap();
        write(&dir, "A.py", "def foo():\n    return 1\n");
        write(&dir, "B.py", "from A import foo\n\ndef bar():\n    return foo()\n");

        let mut analyzer = analyzer(&dir, Arc::new(ParserRegistry::with_defaults()));
        let analysis = analyzer.analyze().unwrap();
        let foo = analysis.find("foo")[0].id;
        let bar = analysis.find("bar")[0].id;
        assert!(analysis.calls.contains(bar, foo));
        assert!(analysis.importance_of(foo) >= analysis.importance_of(bar));
        assert_eq!(analysis.stats.files, 2);
        assert_eq!(analysis.stats.parsed_files, 2);
    }

    #[test]
    fn test_unchanged_files_are_not_reparsed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "def a():\n    b()\n");
        write(&dir, "b.py", "def b():\n    pass\n");

        let registry = Arc::new(ParserRegistry::with_defaults());
        let mut analyzer = analyzer(&dir, Arc::clone(&registry));
        let first = analyzer.analyze().unwrap();
        assert_eq!(registry.parse_count(), 2);

        let second = analyzer.analyze().unwrap();
        assert_eq!(registry.parse_count(), 2);
        assert_eq!(second.stats.cached_files, 2);
        assert_eq!(first.files, second.files);

        write(&dir, "b.py", "def b():\n    return 2\n");
        let third = analyzer.analyze().unwrap();
        assert_eq!(registry.parse_count(), 3);
        assert_eq!(third.stats.parsed_files, 1);
    }

    #[test]
    fn test_parse_errors_do_not_abort() {
        let dir = TempDir::new().unwrap();
        write(&dir, "bad.py", "def broken(:\n");
        write(&dir, "good.py", "def fine():\n    pass\n");
        let mut analyzer = analyzer(&dir, Arc::new(ParserRegistry::with_defaults()));
        let analysis = analyzer.analyze().unwrap();
        assert_eq!(analysis.stats.files, 2);
        assert!(analysis
            .issues
            .iter()
            .any(|i| matches!(i, AnalysisIssue::Parse { path, .. } if path == "bad.py")));
        assert!(!analysis.find("fine").is_empty());
    }

    #[test]
    fn test_vanished_files_are_evicted() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "x = 1\n");
        write(&dir, "b.py", "y = 2\n");
        let mut analyzer = analyzer(&dir, Arc::new(ParserRegistry::with_defaults()));
        analyzer.analyze().unwrap();
        fs::remove_file(dir.path().join("b.py")).unwrap();
        let analysis = analyzer.analyze().unwrap();
        assert_eq!(analysis.stats.files, 1);
        assert_eq!(analyzer.cache.paths().unwrap(), vec!["a.py"]);
    }

    #[test]
    fn test_parallel_path_matches_sequential() {
        let dir = TempDir::new().unwrap();
        for i in 0..20 {
            write(
                &dir,
                &format!("m{i:02}.py"),
                &format!("def f{i}():\n    f{}()\n", (i + 1) % 20),
            );
        }
        let registry = Arc::new(ParserRegistry::with_defaults());

        let mut sequential = analyzer(&dir, Arc::clone(&registry));
        let a = sequential.analyze().unwrap();

        let mut config = Config::default();
        config.indexing.sequential_threshold = 0;
        config.indexing.workers = 4;
        let mut parallel = Analyzer::new(dir.path(), config, registry, Box::new(MemoryCache::new()));
        let b = parallel.analyze().unwrap();

        assert_eq!(a.files, b.files);
        assert_eq!(a.importance, b.importance);
        assert_eq!(b.stats.call_edges, 20);
    }

    struct CancellingParser {
        token: CancellationToken,
    }

    impl SymbolParser for CancellingParser {
        fn name(&self) -> &str {
            "cancel"
        }
        fn extensions(&self) -> &[&str] {
            &["stop"]
        }
        fn grammar_version(&self) -> u32 {
            1
        }
        fn parse(&self, _path: &str, _source: &str) -> ParseOutput {
            self.token.cancel();
            ParseOutput::default()
        }
    }

    #[test]
    fn test_cancellation_keeps_completed_files_cached() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "x = 1\n");
        write(&dir, "b.stop", "halt\n");
        write(&dir, "c.py", "y = 2\n");

        let token = CancellationToken::new();
        let mut registry = ParserRegistry::with_defaults();
        registry.register(Arc::new(CancellingParser { token: token.clone() }));

        let mut config = Config::default();
        config.indexing.default_glob = "**/*".to_string();
        let mut analyzer = Analyzer::new(
            dir.path(),
            config,
            Arc::new(registry),
            Box::new(MemoryCache::new()),
        );

        let err = analyzer.analyze_with_cancel(&token).unwrap_err();
        assert!(matches!(err, StrataError::Cancelled { processed: 2 }));
        assert_eq!(analyzer.cache.paths().unwrap(), vec!["a.py", "b.stop"]);
    }

    struct BrokenCache(MemoryCache);

    impl AnalysisCache for BrokenCache {
        fn get(&self, path: &str, _hash: &str) -> crate::Result<Option<cache::CacheEntry>> {
            Err(StrataError::UnknownFile(path.to_string()))
        }
        fn put(&mut self, entry: &cache::CacheEntry) -> crate::Result<()> {
            self.0.put(entry)
        }
        fn invalidate(&mut self, path: &str) -> crate::Result<()> {
            self.0.invalidate(path)
        }
        fn paths(&self) -> crate::Result<Vec<String>> {
            self.0.paths()
        }
        fn manifest(&self) -> crate::Result<Manifest> {
            self.0.manifest()
        }
    }

    #[test]
    fn test_corrupt_cache_entries_are_rebuilt() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "def a():\n    pass\n");
        let registry = Arc::new(ParserRegistry::with_defaults());
        let mut analyzer = Analyzer::new(
            dir.path(),
            Config::default(),
            Arc::clone(&registry),
            Box::new(BrokenCache(MemoryCache::new())),
        );
        analyzer.analyze().unwrap();
        let analysis = analyzer.analyze().unwrap();
        assert!(analysis
            .issues
            .iter()
            .any(|i| matches!(i, AnalysisIssue::CacheCorruption { .. })));
        assert_eq!(analysis.stats.parsed_files, 1);
        assert!(!analysis.find("a").is_empty());
    }
}
