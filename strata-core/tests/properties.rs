use std::fs;
use std::path::Path;
use std::sync::Arc;
use strata_core::analyze::cache::{MemoryCache, SqliteCache};
use strata_core::analyze::rank;
use strata_core::config::RankingConfig;
use strata_core::parse::ParserRegistry;
use strata_core::{
    Analyzer, Coder, Config, IndexBuilder, PatchFailure, PatchOptions, RangeBound, Strata,
    StrataError, Strategy,
};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// A.py defines foo(), B.py's bar() calls it
fn foo_bar_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "A.py", "def foo():\n    \"\"\"Return one.\"\"\"\n    return 1\n");
    write(
        dir.path(),
        "B.py",
        "from A import foo\n\n\ndef bar():\n    pass\n\n\ndef baz():\n    return foo()\n",
    );
    dir
}

/// A.py defines foo(), B.py's bar() calls it directly
fn bar_calls_foo_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "A.py", "def foo():\n    return 1\n");
    write(dir.path(), "B.py", "from A import foo\n\n\ndef bar():\n    return foo()\n");
    dir
}

fn sample_service() -> &'static str {
    r#"import os
from typing import List


class Service:
    """Handles requests."""

    def __init__(self, name: str):
        self.name = name
        self.count = 0

    def handle(self, items: List[int]) -> int:
        total = 0
        for item in items:
            total += item
        self.count += 1
        return total


def main():
    svc = Service(os.getcwd())
    return svc.handle([1, 2, 3])
"#
}

#[test]
fn parse_is_deterministic() {
    let registry = ParserRegistry::with_defaults();
    let first = registry.parse_record("svc.py", sample_service(), 0, 0);
    for _ in 0..5 {
        let again = ParserRegistry::with_defaults().parse_record("svc.py", sample_service(), 0, 0);
        assert_eq!(first.symbols, again.symbols);
        assert_eq!(first.references, again.references);
    }
}

#[test]
fn unchanged_files_hit_the_persistent_cache() {
    let dir = foo_bar_repo();
    let db = dir.path().join(".strata/cache.db");

    let registry = Arc::new(ParserRegistry::with_defaults());
    let mut analyzer = Analyzer::new(
        dir.path(),
        Config::default(),
        Arc::clone(&registry),
        Box::new(SqliteCache::open(&db).unwrap()),
    );
    let first = analyzer.analyze().unwrap();
    assert_eq!(registry.parse_count(), 2);

    // A fresh process: new registry, same database
    let registry = Arc::new(ParserRegistry::with_defaults());
    let mut analyzer = Analyzer::new(
        dir.path(),
        Config::default(),
        Arc::clone(&registry),
        Box::new(SqliteCache::open(&db).unwrap()),
    );
    let second = analyzer.analyze().unwrap();
    assert_eq!(registry.parse_count(), 0);
    assert_eq!(first.files, second.files);
    assert_eq!(second.stats.cached_files, 2);
}

#[test]
fn skeleton_line_map_points_back_into_symbols() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "svc.py", sample_service());
    let registry = Arc::new(ParserRegistry::with_defaults());
    let mut analyzer = Analyzer::new(
        dir.path(),
        Config::default(),
        Arc::clone(&registry),
        Box::new(MemoryCache::new()),
    );
    let analysis = analyzer.analyze().unwrap();
    let mut index = IndexBuilder::new(dir.path(), Config::default(), registry);
    let skeleton = index.skeleton(Some(&analysis), "svc.py").unwrap();

    let source: Vec<&str> = sample_service().lines().collect();
    for line in &skeleton.lines {
        if line.elided.is_none() {
            assert_eq!(line.text, source[line.source_line - 1]);
        }
    }

    assert!(!skeleton.signatures.is_empty());
    for entry in &skeleton.signatures {
        let source_line = skeleton.source_line(entry.skeleton_line).unwrap();
        assert!(
            entry.source_lines.contains(source_line),
            "{} maps to line {source_line}, outside {}",
            entry.qualified_name,
            entry.source_lines
        );
        let symbol = analysis
            .symbols
            .in_file("svc.py")
            .iter()
            .find(|s| s.qualified_name == entry.qualified_name)
            .unwrap();
        assert!(symbol.lines.contains(source_line));
    }
    assert!(skeleton.elided_lines() > 0);
}

#[test]
fn ranking_is_stable_for_a_fixed_graph() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "svc.py", sample_service());
    write(dir.path(), "A.py", "def foo():\n    return 1\n");
    write(dir.path(), "B.py", "from A import foo\n\ndef bar():\n    return foo()\n");
    let mut analyzer = Analyzer::new(
        dir.path(),
        Config::default(),
        Arc::new(ParserRegistry::with_defaults()),
        Box::new(MemoryCache::new()),
    );
    let analysis = analyzer.analyze().unwrap();
    let edges: Vec<(usize, usize, f64)> = analysis
        .calls
        .edges()
        .map(|(from, to, info)| (from.index(), to.index(), info.count as f64))
        .collect();

    let config = RankingConfig::default();
    let n = analysis.symbols.len();
    let a = rank::importance(n, &edges, &config);
    let b = rank::importance(n, &edges, &config);
    for (x, y) in a.scores.iter().zip(&b.scores) {
        assert!((x - y).abs() <= config.epsilon);
    }
}

#[test]
fn scenario_call_edge_and_importance() {
    let dir = foo_bar_repo();
    let mut strata = Strata::open(dir.path()).unwrap();
    let map = strata.analyze_repository(None, None).unwrap();

    assert!(map
        .call_edges
        .iter()
        .any(|e| e.caller_name == "B.py::baz" && e.callee_name == "A.py::foo"));
    let analysis = strata.analysis().unwrap();
    let foo = analysis.find("foo")[0].id;
    let baz = analysis.find("baz")[0].id;
    assert!(analysis.importance_of(foo) >= analysis.importance_of(baz));
}

#[test]
fn scenario_bar_calls_foo() {
    let dir = bar_calls_foo_repo();
    let mut strata = Strata::open(dir.path()).unwrap();
    let map = strata.analyze_repository(None, None).unwrap();

    let edges: Vec<(&str, &str)> = map
        .call_edges
        .iter()
        .map(|e| (e.caller_name.as_str(), e.callee_name.as_str()))
        .collect();
    assert_eq!(edges, [("B.py::bar", "A.py::foo")]);

    let analysis = strata.analysis().unwrap();
    let foo = analysis.find("foo")[0].id;
    let bar = analysis.find("bar")[0].id;
    assert!(analysis.importance_of(foo) >= analysis.importance_of(bar));
}

#[test]
fn scenario_whitespace_tolerant_keeps_file_indentation() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "B.py",
        "class Worker:\n    def bar():\n        pass\n\n    def other():\n        return 2\n",
    );
    let coder = Coder::new(dir.path(), Config::default().coder);
    let result = coder
        .apply_patch(
            "B.py",
            "def bar():\n    pass",
            "def bar():\n    return 1",
            &PatchOptions::default(),
        )
        .unwrap();
    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.strategy, Some(Strategy::WhitespaceTolerant));
    assert_eq!(
        fs::read_to_string(dir.path().join("B.py")).unwrap(),
        "class Worker:\n    def bar():\n        return 1\n\n    def other():\n        return 2\n"
    );
}

#[test]
fn scenario_similarity_threshold_gate() {
    let original = "def compute(values):\n    total = 0\n    # accumulate every value\n    for v in values:\n        total += v\n    return total\n";
    let search = "def compute(values):\n    total = 0\n    for v in values:\n        total += v\n    return total";
    let replace = "def compute(values):\n    return sum(values)";

    let dir = TempDir::new().unwrap();
    write(dir.path(), "calc.py", original);
    let coder = Coder::new(dir.path(), Config::default().coder);

    let strict = coder
        .apply_patch("calc.py", search, replace, &PatchOptions { fuzzy: None, threshold: Some(0.95) })
        .unwrap();
    assert!(!strict.success);
    assert!(matches!(strict.failure, Some(PatchFailure::BelowThreshold { .. })));
    assert!(!strict.suggestions.is_empty());
    assert_eq!(fs::read(dir.path().join("calc.py")).unwrap(), original.as_bytes());

    let relaxed = coder
        .apply_patch("calc.py", search, replace, &PatchOptions { fuzzy: None, threshold: Some(0.8) })
        .unwrap();
    assert!(relaxed.success);
    assert_eq!(relaxed.strategy, Some(Strategy::Similarity));
    assert_eq!(
        fs::read_to_string(dir.path().join("calc.py")).unwrap(),
        "def compute(values):\n    return sum(values)\n"
    );
}

#[test]
fn failed_patches_leave_bytes_identical() {
    let dir = TempDir::new().unwrap();
    let original = "a = 1\r\nb = 2\r\na = 1\r\n";
    write(dir.path(), "x.py", original);
    let coder = Coder::new(dir.path(), Config::default().coder);

    let attempts = [
        ("a = 1", "a = 3", PatchOptions::default()),
        ("zzz", "y", PatchOptions::default()),
        ("b = 2", "b = 3", PatchOptions { fuzzy: None, threshold: Some(-0.1) }),
        ("", "b = 3", PatchOptions::default()),
    ];
    for (search, replace, options) in attempts {
        let result = coder.apply_patch("x.py", search, replace, &options).unwrap();
        assert!(!result.success);
        assert_eq!(fs::read(dir.path().join("x.py")).unwrap(), original.as_bytes());
    }

    let diff = coder
        .apply_diff("x.py", "@@ -2 +2 @@\n-b = 9\n+b = 3\n")
        .unwrap();
    assert_eq!(diff.failure, Some(PatchFailure::HunkMismatch { hunk: 1 }));
    assert_eq!(fs::read(dir.path().join("x.py")).unwrap(), original.as_bytes());
}

#[test]
fn swapped_patch_restores_original() {
    let dir = TempDir::new().unwrap();
    let original = sample_service();
    write(dir.path(), "svc.py", original);
    let coder = Coder::new(dir.path(), Config::default().coder);

    let search = "        self.count += 1\n        return total";
    let replace = "        self.count += 1\n        self.last = total\n        return total";
    assert!(coder.apply_patch("svc.py", search, replace, &PatchOptions::default()).unwrap().success);
    assert_ne!(fs::read_to_string(dir.path().join("svc.py")).unwrap(), original);

    let back = coder.apply_patch("svc.py", replace, search, &PatchOptions::default()).unwrap();
    assert_eq!(back.strategy, Some(Strategy::Exact));
    assert_eq!(fs::read_to_string(dir.path().join("svc.py")).unwrap(), original);
}

#[test]
fn scenario_read_past_end_is_out_of_range() {
    let dir = TempDir::new().unwrap();
    let ten: String = (1..=10).map(|i| format!("line_{i} = {i}\n")).collect();
    write(dir.path(), "B.py", &ten);
    let strata = Strata::open(dir.path()).unwrap();

    match strata.read_implementation("B.py", 1, 9999) {
        Err(StrataError::OutOfRange { line_count, bound, .. }) => {
            assert_eq!(line_count, 10);
            assert_eq!(bound, RangeBound::End);
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    assert_eq!(strata.read_implementation("B.py", 10, 10).unwrap().text, "line_10 = 10\n");
}

#[test]
fn snapshot_then_restore_reverses_a_patch() {
    let dir = foo_bar_repo();
    let mut strata = Strata::open(dir.path()).unwrap();
    let archive = strata.generate_snapshot(Path::new(".")).unwrap();

    let result = strata
        .apply_patch("A.py", "return 1", "return 2", &PatchOptions::default())
        .unwrap();
    assert!(result.success);

    strata.restore_snapshot(&archive, Path::new(".")).unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("A.py")).unwrap(),
        "def foo():\n    \"\"\"Return one.\"\"\"\n    return 1\n"
    );
}
