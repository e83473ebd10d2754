//! Parser component: source text to symbols, references and imports.
//!
//! Languages plug in through the [`SymbolParser`] trait. Built-in languages
//! share one table-driven tree-sitter implementation; files with no
//! registered parser fall through to [`NullParser`] and are indexed as
//! opaque blobs.

mod extract;
pub mod language;
mod pool;

use crate::symbol::{count_lines, content_hash, FileRecord, ImportRef, ParseDiagnostic, ParsedSymbol, Reference};
use language::LanguageSpec;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of parsing one file
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub symbols: Vec<ParsedSymbol>,
    pub references: Vec<Reference>,
    pub imports: Vec<ImportRef>,
    pub tree: Option<tree_sitter::Tree>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// A per-language parser.
///
/// Implementations must be deterministic: the same source and grammar
/// version always produce the same output.
pub trait SymbolParser: Send + Sync {
    /// Language name recorded on every [`FileRecord`] this parser produces
    fn name(&self) -> &str;

    /// File extensions (without the dot) this parser claims
    fn extensions(&self) -> &[&str];

    fn grammar_version(&self) -> u32;

    fn parse(&self, path: &str, source: &str) -> ParseOutput;

    /// Line that stands in for an elided body in a skeleton
    fn elision_marker(&self, indent: &str, start: usize, end: usize) -> String {
        format!("{indent}... lines {start}-{end} elided")
    }
}

/// Tree-sitter backed parser driven by a [`LanguageSpec`] table
pub struct TreeSitterParser {
    spec: &'static LanguageSpec,
}

impl TreeSitterParser {
    pub fn new(spec: &'static LanguageSpec) -> Self {
        Self { spec }
    }
}

impl SymbolParser for TreeSitterParser {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn extensions(&self) -> &[&str] {
        self.spec.extensions
    }

    fn grammar_version(&self) -> u32 {
        self.spec.grammar_version
    }

    fn parse(&self, path: &str, source: &str) -> ParseOutput {
        let tree = pool::with_parser(self.spec, |parser| parser.parse(source, None)).flatten();
        let Some(tree) = tree else {
            return ParseOutput {
                diagnostics: vec![ParseDiagnostic {
                    line: 1,
                    column: 1,
                    message: format!("{} parser produced no tree", self.spec.name),
                }],
                ..Default::default()
            };
        };

        let extraction = extract::extract(self.spec, &module_name(path), source, &tree);
        ParseOutput {
            symbols: extraction.symbols,
            references: extraction.references,
            imports: extraction.imports,
            tree: Some(tree),
            diagnostics: extraction.diagnostics,
        }
    }

    fn elision_marker(&self, indent: &str, start: usize, end: usize) -> String {
        self.spec.elision_marker(indent, start, end)
    }
}

/// Fallback for unsupported file types: no symbols, no diagnostics
pub struct NullParser;

impl SymbolParser for NullParser {
    fn name(&self) -> &str {
        "opaque"
    }

    fn extensions(&self) -> &[&str] {
        &[]
    }

    fn grammar_version(&self) -> u32 {
        0
    }

    fn parse(&self, _path: &str, _source: &str) -> ParseOutput {
        ParseOutput::default()
    }
}

/// Extension-keyed parser dispatch
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn SymbolParser>>,
    by_extension: HashMap<String, usize>,
    fallback: Arc<dyn SymbolParser>,
    parse_calls: AtomicUsize,
}

impl ParserRegistry {
    /// Registry with no languages; every file is opaque
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
            by_extension: HashMap::new(),
            fallback: Arc::new(NullParser),
            parse_calls: AtomicUsize::new(0),
        }
    }

    /// Registry with every built-in tree-sitter language
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for spec in language::BUILTIN {
            registry.register(Arc::new(TreeSitterParser::new(spec)));
        }
        registry
    }

    /// Add a parser. Later registrations take over extensions claimed
    /// by earlier ones.
    pub fn register(&mut self, parser: Arc<dyn SymbolParser>) {
        let idx = self.parsers.len();
        for ext in parser.extensions() {
            self.by_extension.insert(ext.to_ascii_lowercase(), idx);
        }
        self.parsers.push(parser);
    }

    /// Parser responsible for `path`, or the null parser
    pub fn for_path(&self, path: &str) -> &dyn SymbolParser {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()))
            .map(|&idx| self.parsers[idx].as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    /// Whether a real (non-null) parser claims `path`
    pub fn supports(&self, path: &str) -> bool {
        self.for_path(path).name() != self.fallback.name()
    }

    /// Parse `source` and package it as a cacheable [`FileRecord`]
    pub fn parse_record(&self, path: &str, source: &str, mtime: i64, size: u64) -> FileRecord {
        self.parse_calls.fetch_add(1, Ordering::Relaxed);
        let parser = self.for_path(path);
        let output = parser.parse(path, source);
        tracing::debug!(
            path = %path,
            language = parser.name(),
            symbols = output.symbols.len(),
            "parsed file"
        );
        FileRecord {
            path: path.to_string(),
            content_hash: content_hash(source),
            mtime,
            size,
            line_count: count_lines(source),
            language: parser.name().to_string(),
            grammar_version: parser.grammar_version(),
            symbols: output.symbols,
            references: output.references,
            imports: output.imports,
            diagnostics: output.diagnostics,
        }
    }

    /// Number of `parse_record` calls made through this registry
    pub fn parse_count(&self) -> usize {
        self.parse_calls.load(Ordering::Relaxed)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Module name for a repo-relative path: the file stem, or the parent
/// directory for package entry files (`__init__.py`, `mod.rs`, `index.ts`)
pub fn module_name(path: &str) -> String {
    let p = Path::new(path);
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or(path);
    if matches!(stem, "__init__" | "mod" | "index") {
        if let Some(parent) = p.parent().and_then(|d| d.file_name()).and_then(|s| s.to_str()) {
            return parent.to_string();
        }
    }
    stem.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{RefKind, SymbolKind};

    fn parse(path: &str, source: &str) -> ParseOutput {
        ParserRegistry::with_defaults().for_path(path).parse(path, source)
    }

    fn find<'a>(out: &'a ParseOutput, qualified: &str) -> &'a ParsedSymbol {
        out.symbols
            .iter()
            .find(|s| s.qualified_name == qualified)
            .unwrap_or_else(|| panic!("missing symbol {qualified}: {:#?}", out.symbols))
    }

    #[test]
    fn test_python_symbols() {
        let src = r#""""Utility helpers."""
import os
from pkg.util import helper as h, other

LIMIT = 10


class Greeter:
    """Says hello."""

    def greet(self, name: str) -> str:
        """Return a greeting."""
        msg = helper(name)
        return self.format(msg)

    def format(self, msg):
        return msg


def main():
    Greeter().greet("x")
"#;
        let out = parse("pkg/greet.py", src);
        assert!(out.diagnostics.is_empty());

        let module = &out.symbols[0];
        assert_eq!(module.kind, SymbolKind::Module);
        assert_eq!(module.name, "greet");
        assert_eq!(module.docstring.as_deref(), Some("Utility helpers."));

        let class = find(&out, "Greeter");
        assert_eq!(class.kind, SymbolKind::Class);
        assert_eq!(class.docstring.as_deref(), Some("Says hello."));

        let greet = find(&out, "Greeter.greet");
        assert_eq!(greet.kind, SymbolKind::Function);
        assert_eq!(greet.signature, "def greet(self, name: str) -> str:");
        assert_eq!(greet.docstring.as_deref(), Some("Return a greeting."));
        assert_eq!(greet.lines.start, 11);
        // Body after the docstring
        assert_eq!(greet.body.map(|b| (b.start, b.end)), Some((13, 14)));

        let limit = find(&out, "LIMIT");
        assert_eq!(limit.kind, SymbolKind::Variable);

        assert_eq!(out.imports.len(), 2);
        assert_eq!(out.imports[0].module, "os");
        assert_eq!(out.imports[1].module, "pkg.util");
        assert_eq!(out.imports[1].names, vec!["helper", "other"]);

        let calls: Vec<_> = out
            .references
            .iter()
            .filter(|r| r.kind == RefKind::Call)
            .map(|r| (r.name.as_str(), r.qualifier.as_deref()))
            .collect();
        assert!(calls.contains(&("helper", None)));
        assert!(calls.contains(&("format", Some("self"))));
        assert!(calls.contains(&("Greeter", None)));
    }

    #[test]
    fn test_rust_symbols() {
        let src = r#"use std::collections::{HashMap, HashSet};

/// A counter.
pub struct Counter {
    n: u32,
}

impl Counter {
    /// Bump it.
    pub fn bump(&mut self) -> u32 {
        self.n += 1;
        helper(self.n)
    }
}

fn helper(n: u32) -> u32 {
    n
}
"#;
        let out = parse("src/counter.rs", src);
        let counter = find(&out, "Counter");
        assert_eq!(counter.docstring.as_deref(), Some("A counter."));
        let bump = find(&out, "Counter.bump");
        assert_eq!(bump.signature, "pub fn bump(&mut self) -> u32");
        assert_eq!(bump.docstring.as_deref(), Some("Bump it."));
        assert_eq!(bump.body.map(|b| (b.start, b.end)), Some((11, 12)));

        assert_eq!(out.imports[0].module, "std::collections");
        assert_eq!(out.imports[0].names, vec!["HashMap", "HashSet"]);
        assert!(out.references.iter().any(|r| r.name == "helper" && r.kind == RefKind::Call));
    }

    #[test]
    fn test_javascript_arrow_function_is_a_function() {
        let src = "import { load } from './store';\n\nconst run = (x) => {\n  return load(x);\n};\n\nclass App {\n  start() {\n    run(1);\n  }\n}\n";
        let out = parse("web/app.js", src);
        assert_eq!(find(&out, "run").kind, SymbolKind::Function);
        assert_eq!(find(&out, "App.start").kind, SymbolKind::Function);
        assert_eq!(out.imports[0].module, "./store");
        assert_eq!(out.imports[0].names, vec!["load"]);
    }

    #[test]
    fn test_go_methods_are_qualified_by_receiver() {
        let src = "package main\n\nimport \"fmt\"\n\n// Server serves.\ntype Server struct {\n\taddr string\n}\n\nfunc (s *Server) Run() {\n\tfmt.Println(s.addr)\n}\n";
        let out = parse("main.go", src);
        assert_eq!(find(&out, "Server").docstring.as_deref(), Some("Server serves."));
        assert_eq!(find(&out, "Server.Run").kind, SymbolKind::Function);
        assert_eq!(out.imports[0].module, "fmt");
    }

    #[test]
    fn test_syntax_errors_become_diagnostics() {
        let out = parse("bad.py", "def broken(:\n    pass\n\ndef fine():\n    return 1\n");
        assert!(!out.diagnostics.is_empty());
        assert!(out.symbols.iter().any(|s| s.name == "fine"));
    }

    #[test]
    fn test_unknown_extension_uses_null_parser() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(registry.for_path("notes.txt").name(), "opaque");
        assert!(!registry.supports("notes.txt"));
        let record = registry.parse_record("notes.txt", "hello\nworld\n", 0, 12);
        assert!(record.symbols.is_empty());
        assert_eq!(record.line_count, 2);
        assert_eq!(registry.parse_count(), 1);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let registry = ParserRegistry::with_defaults();
        let src = "def a():\n    b()\n\ndef b():\n    pass\n";
        let first = registry.parse_record("m.py", src, 0, 0);
        let second = registry.parse_record("m.py", src, 0, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("a/b/c.py"), "c");
        assert_eq!(module_name("pkg/__init__.py"), "pkg");
        assert_eq!(module_name("src/net/mod.rs"), "net");
    }
}
