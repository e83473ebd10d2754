//! Three-tier index over an analysis.
//!
//! - L1 [`RepositoryMap`]: graphs, ranking and execution heat
//! - L2 [`Skeleton`]: per-file signatures with bodies elided
//! - L3 live reads of exact line ranges

pub mod logic;
pub mod skeleton;
pub mod trajectory;

pub use logic::{RenderOptions, RenderedMap, RepositoryMap};
pub use skeleton::Skeleton;
pub use trajectory::{Trajectory, TrajectoryEvent};

use crate::analyze::Analysis;
use crate::config::Config;
use crate::error::{RangeBound, StrataError};
use crate::parse::ParserRegistry;
use crate::search::resolve_in_root;
use crate::symbol::{content_hash, count_lines, CodeNode, LineRange, Location, SymbolId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds and caches index layers for one root
pub struct IndexBuilder {
    root: PathBuf,
    config: Config,
    registry: Arc<ParserRegistry>,
    /// path -> skeleton of the content version last seen
    skeletons: HashMap<String, Arc<Skeleton>>,
    map: Option<Arc<RepositoryMap>>,
}

impl IndexBuilder {
    pub fn new(root: &Path, config: Config, registry: Arc<ParserRegistry>) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            registry,
            skeletons: HashMap::new(),
            map: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// L1 map for `analysis`, reusing the previous one when the tree
    /// listing, trajectory and focus are unchanged.
    pub fn repository_map(
        &mut self,
        analysis: &Analysis,
        trajectory: Option<&str>,
        focus: Option<&str>,
    ) -> Arc<RepositoryMap> {
        let fingerprint = map_fingerprint(analysis, trajectory, focus);
        if let Some(map) = self.map.as_ref().filter(|m| m.fingerprint == fingerprint) {
            tracing::debug!("repository map cache hit");
            return Arc::clone(map);
        }

        let heat = trajectory.map(|text| {
            let parsed = Trajectory::parse(text);
            trajectory::map_trajectory(analysis, &parsed)
        });
        if let Some(heat) = &heat {
            let unmapped = heat.mappings.iter().filter(|m| m.symbol.is_none()).count();
            tracing::info!(
                events = heat.mappings.len(),
                unmapped,
                "trajectory mapped"
            );
        }

        let map = Arc::new(RepositoryMap::build(
            analysis,
            heat.as_ref(),
            focus,
            &self.config,
            fingerprint,
        ));
        self.map = Some(Arc::clone(&map));
        map
    }

    /// L2 skeleton of one file, built from its current content.
    ///
    /// Symbols come from the analysis when its record matches the live
    /// content hash; otherwise the file is parsed again.
    pub fn skeleton(&mut self, analysis: Option<&Analysis>, path: &str) -> crate::Result<Arc<Skeleton>> {
        let full = resolve_in_root(&self.root, path)?;
        let rel = relative(&self.root, &full, path);
        let source = fs::read_to_string(&full)?;
        let hash = content_hash(&source);

        if let Some(cached) = self.skeletons.get(&rel).filter(|s| s.content_hash == hash) {
            return Ok(Arc::clone(cached));
        }

        let record = analysis
            .and_then(|a| a.files.get(&rel))
            .filter(|r| r.content_hash == hash)
            .cloned()
            .unwrap_or_else(|| {
                tracing::debug!(path = %rel, "analysis record stale, reparsing for skeleton");
                self.registry
                    .parse_record(&rel, &source, 0, source.len() as u64)
            });

        let skeleton = Arc::new(Skeleton::build(
            &rel,
            &hash,
            &record.language,
            &source,
            &record.symbols,
            self.registry.for_path(&rel),
        ));
        self.skeletons.insert(rel, Arc::clone(&skeleton));
        Ok(skeleton)
    }

    /// Skeletons of every analyzed file still on disk, in path order
    pub fn skeletons(&mut self, analysis: &Analysis) -> crate::Result<Vec<Arc<Skeleton>>> {
        let mut out = Vec::with_capacity(analysis.files.len());
        for path in analysis.files.keys() {
            match self.skeleton(Some(analysis), path) {
                Ok(s) => out.push(s),
                Err(StrataError::FileNotFound(_)) => {
                    tracing::warn!(path = %path, "file vanished since analysis");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// L3 read of lines `start..=end` (1-indexed) from the live file.
    ///
    /// Ranges outside the file are an error; nothing is clamped.
    pub fn read(&self, path: &str, start: usize, end: usize) -> crate::Result<CodeNode> {
        let full = resolve_in_root(&self.root, path)?;
        let source = fs::read_to_string(&full)?;
        let line_count = count_lines(&source);

        let bound = if start == 0 || start > line_count {
            Some(RangeBound::Start)
        } else if start > end {
            Some(RangeBound::Inverted)
        } else if end > line_count {
            Some(RangeBound::End)
        } else {
            None
        };
        if let Some(bound) = bound {
            return Err(StrataError::OutOfRange {
                path: PathBuf::from(path),
                start,
                end,
                line_count,
                bound,
            });
        }

        let text: String = source
            .split_inclusive('\n')
            .skip(start - 1)
            .take(end - start + 1)
            .collect();
        Ok(CodeNode {
            path: relative(&self.root, &full, path),
            lines: LineRange::new(start, end),
            text,
        })
    }

    /// Live source of one symbol
    pub fn code_node(&self, analysis: &Analysis, id: SymbolId) -> crate::Result<CodeNode> {
        let symbol = analysis
            .symbols
            .get(id)
            .ok_or_else(|| StrataError::UnknownSymbol(id.to_string()))?;
        self.read(&symbol.path, symbol.lines.start, symbol.lines.end)
    }

    /// Every location referencing `id`
    pub fn references(&self, analysis: Option<&Analysis>, id: SymbolId) -> crate::Result<Vec<Location>> {
        let analysis = analysis.ok_or(StrataError::NotAnalyzed)?;
        if !analysis.symbols.contains(id) {
            return Err(StrataError::UnknownSymbol(id.to_string()));
        }
        Ok(analysis.references.locations(id))
    }

    /// References to every symbol defined in `path`
    pub fn file_references(
        &self,
        analysis: Option<&Analysis>,
        path: &str,
    ) -> crate::Result<Vec<(SymbolId, Vec<Location>)>> {
        let analysis = analysis.ok_or(StrataError::NotAnalyzed)?;
        if !analysis.files.contains_key(path) {
            return Err(StrataError::UnknownFile(path.to_string()));
        }
        Ok(analysis
            .symbols
            .in_file(path)
            .iter()
            .map(|s| (s.id, analysis.references.locations(s.id)))
            .filter(|(_, locations)| !locations.is_empty())
            .collect())
    }

    /// Drop every cached layer
    pub fn clear(&mut self) {
        self.skeletons.clear();
        self.map = None;
    }

    /// Drop cached layers for `path` after it was modified
    pub fn invalidate(&mut self, path: &str) {
        self.skeletons.remove(path);
        self.map = None;
    }
}

/// Repo-relative form of a resolved path, falling back to the request
fn relative(root: &Path, full: &Path, requested: &str) -> String {
    full.strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| requested.to_string())
}

/// Hash of (path, size, mtime) for every file plus trajectory and focus
fn map_fingerprint(analysis: &Analysis, trajectory: Option<&str>, focus: Option<&str>) -> String {
    let mut listing = String::new();
    for record in analysis.files.values() {
        listing.push_str(&format!(
            "{}\0{}\0{}\0{}\n",
            record.path, record.size, record.mtime, record.content_hash
        ));
    }
    listing.push_str("\u{1}trajectory\0");
    listing.push_str(trajectory.unwrap_or(""));
    listing.push_str("\u{1}focus\0");
    listing.push_str(focus.unwrap_or(""));
    content_hash(&listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::cache::MemoryCache;
    use crate::analyze::Analyzer;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Analysis, IndexBuilder) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("A.py"),
            "\"\"\"Arithmetic helpers.\"\"\"\n\ndef foo():\n    return 1\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("B.py"),
            "from A import foo\n\ndef bar():\n    return foo()\n\ndef unused():\n    pass\n\n\n",
        )
        .unwrap();
        let registry = Arc::new(ParserRegistry::with_defaults());
        let mut analyzer = Analyzer::new(
            dir.path(),
            Config::default(),
            Arc::clone(&registry),
            Box::new(MemoryCache::new()),
        );
        let analysis = analyzer.analyze().unwrap();
        let builder = IndexBuilder::new(dir.path(), Config::default(), registry);
        (dir, analysis, builder)
    }

    #[test]
    fn test_map_contains_graph_and_descriptions() {
        let (_dir, analysis, mut builder) = setup();
        let map = builder.repository_map(&analysis, None, None);
        assert_eq!(map.tree.len(), 2);
        assert!(map
            .call_edges
            .iter()
            .any(|e| e.caller_name == "B.py::bar" && e.callee_name == "A.py::foo"));
        assert!(map.dependencies.contains(&logic::DependencyEdge {
            from: "B.py".to_string(),
            to: "A.py".to_string()
        }));
        assert_eq!(map.modules["A.py"], "Arithmetic helpers.");
        assert_eq!(map.modules["B.py"], "2 functions, 0 classes");
        assert!(map.unexecuted_files.is_empty());

        let rendered = map.render(&RenderOptions::default());
        assert!(rendered.text.contains("B.py::bar -> A.py::foo"));
        assert!(rendered.text.contains("false-negative rate"));
        assert_eq!(rendered.tokens, logic::estimate_tokens(&rendered.text));
        let sections: Vec<&str> = rendered.text.lines().filter(|l| l.starts_with("## ")).collect();
        assert_eq!(sections, ["## Files (2)", "## Key symbols", "## Call graph (1 edges)", "## Dependencies"]);
    }

    #[test]
    fn test_map_is_cached_by_fingerprint() {
        let (_dir, analysis, mut builder) = setup();
        let a = builder.repository_map(&analysis, None, None);
        let b = builder.repository_map(&analysis, None, None);
        assert!(Arc::ptr_eq(&a, &b));
        let c = builder.repository_map(&analysis, Some("foo 1\n"), None);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_trajectory_prunes_unexecuted() {
        let (_dir, analysis, mut builder) = setup();
        let log = "{\"function\": \"bar\", \"calls\": 2, \"file\": \"B.py\", \"line\": 4}\nfoo 2\n";
        let map = builder.repository_map(&analysis, Some(log), None);
        assert!(map.unexecuted_files.is_empty());
        assert_eq!(map.heatmap["B.py::bar"], 2);
        assert_eq!(map.heatmap["A.py::foo"], 2);

        let rendered = map.render(&RenderOptions::default()).text;
        assert!(rendered.contains("B.py::bar -> A.py::foo [2 calls]"));
        assert!(rendered.contains("B.py::unused (not executed)"));

        // Pruning is a rendering decision only
        assert!(map.key_symbols.iter().any(|s| s.qualified_name == "unused"));
        let full = map.render(&RenderOptions {
            prune_unexecuted: false,
            ..RenderOptions::default()
        });
        assert!(!full.text.contains("(not executed)"));
    }

    #[test]
    fn test_focus_reranks_key_symbols() {
        let (_dir, analysis, mut builder) = setup();
        let map = builder.repository_map(&analysis, None, Some("unused"));
        assert_eq!(map.key_symbols[0].qualified_name, "unused");
        assert!(map.key_symbols[0].relevance.unwrap() > 0.0);
    }

    #[test]
    fn test_read_is_exact_and_unclamped() {
        let (_dir, _analysis, builder) = setup();
        let node = builder.read("B.py", 3, 4).unwrap();
        assert_eq!(node.text, "def bar():\n    return foo()\n");

        let err = builder.read("B.py", 5, 12).unwrap_err();
        assert!(matches!(
            err,
            StrataError::OutOfRange { bound: RangeBound::End, line_count: 9, .. }
        ));
        let err = builder.read("B.py", 0, 2).unwrap_err();
        assert!(matches!(err, StrataError::OutOfRange { bound: RangeBound::Start, .. }));
        let err = builder.read("B.py", 4, 3).unwrap_err();
        assert!(matches!(err, StrataError::OutOfRange { bound: RangeBound::Inverted, .. }));
        assert!(matches!(
            builder.read("../outside.py", 1, 1),
            Err(StrataError::PathOutsideRoot(_)) | Err(StrataError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_read_sees_live_content() {
        let (dir, analysis, builder) = setup();
        fs::write(
            dir.path().join("A.py"),
            "\"\"\"Arithmetic helpers.\"\"\"\n\ndef foo():\n    return 2\n",
        )
        .unwrap();
        let foo = analysis.find("foo")[0].id;
        let node = builder.code_node(&analysis, foo).unwrap();
        assert!(node.text.contains("return 2"));
    }

    #[test]
    fn test_skeleton_cache_follows_content() {
        let (dir, analysis, mut builder) = setup();
        let before = builder.skeleton(Some(&analysis), "A.py").unwrap();
        let again = builder.skeleton(Some(&analysis), "A.py").unwrap();
        assert!(Arc::ptr_eq(&before, &again));

        fs::write(dir.path().join("A.py"), "def foo():\n    x = 1\n    return x\n").unwrap();
        let after = builder.skeleton(Some(&analysis), "A.py").unwrap();
        assert_ne!(before.content_hash, after.content_hash);
        assert_eq!(after.lines.len(), 2);
    }

    #[test]
    fn test_references_require_analysis() {
        let (_dir, analysis, builder) = setup();
        let foo = analysis.find("foo")[0].id;
        assert!(matches!(builder.references(None, foo), Err(StrataError::NotAnalyzed)));
        let refs = builder.references(Some(&analysis), foo).unwrap();
        assert!(refs.contains(&Location {
            path: "B.py".to_string(),
            line: 4
        }));
        assert!(matches!(
            builder.file_references(Some(&analysis), "C.py"),
            Err(StrataError::UnknownFile(_))
        ));
    }
}
