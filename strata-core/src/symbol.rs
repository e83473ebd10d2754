//! Data model shared by the parser, analyzer and index builder

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Range;

/// Byte range in source text (always byte offsets, not char indices)
pub type Span = Range<usize>;

/// Kind of a named code entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Variable,
    Import,
    Module,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Variable => "variable",
            Self::Import => "import",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "variable" => Some(Self::Variable),
            "import" => Some(Self::Import),
            "module" => Some(Self::Module),
            _ => None,
        }
    }

    /// Kinds that can contain call sites and own outbound edges
    pub fn is_scope(self) -> bool {
        matches!(self, Self::Function | Self::Class | Self::Module)
    }

    /// Kinds that a call can resolve to
    pub fn is_callable(self) -> bool {
        matches!(self, Self::Function | Self::Class)
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive, 1-indexed line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn encloses(&self, other: &LineRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A symbol as extracted from one file, before it joins the project table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSymbol {
    pub name: String,
    /// Dotted path inside the file, e.g. `Server.handle`
    pub qualified_name: String,
    pub kind: SymbolKind,
    /// Index of the enclosing class/function symbol in the same file
    pub parent: Option<usize>,
    pub lines: LineRange,
    pub span: Span,
    /// Declaration text up to the body, with original formatting
    pub signature: String,
    pub docstring: Option<String>,
    /// Lines of executable body that a skeleton may elide
    pub body: Option<LineRange>,
}

/// How a reference uses its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Call,
    Import,
}

impl RefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Import => "import",
        }
    }
}

/// An unresolved use of a name at a source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    /// Receiver or path prefix, e.g. `self` in `self.run()`
    pub qualifier: Option<String>,
    pub kind: RefKind,
    pub line: usize,
    pub span: Span,
}

/// One import/include statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    /// Module specifier as written (`pkg.mod`, `..util`, `./a`, `crate::x`)
    pub module: String,
    /// Names bound by the import, if any
    pub names: Vec<String>,
    pub line: usize,
}

/// A syntax problem reported by the grammar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Everything the analyzer keeps about one file version.
///
/// This is the payload persisted by the analysis cache, keyed by
/// (path, content hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Repo-relative path with `/` separators
    pub path: String,
    pub content_hash: String,
    pub mtime: i64,
    pub size: u64,
    pub line_count: usize,
    /// Parser that produced the record (`python`, `rust`, ..., `opaque`)
    pub language: String,
    pub grammar_version: u32,
    pub symbols: Vec<ParsedSymbol>,
    pub references: Vec<Reference>,
    pub imports: Vec<ImportRef>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Index of a symbol in the project-wide arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A named, located code entity in the project-wide table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub path: String,
    /// Content hash of the file version this symbol was extracted from
    pub content_hash: String,
    pub lines: LineRange,
    pub span: Span,
    pub signature: String,
    pub docstring: Option<String>,
    pub body: Option<LineRange>,
    pub parent: Option<SymbolId>,
    /// Symbols this one calls or uses
    pub references: Vec<SymbolId>,
}

impl Symbol {
    /// `path::Qualified.name`, unique enough for display
    pub fn display_name(&self) -> String {
        format!("{}::{}", self.path, self.qualified_name)
    }
}

/// Full text backing a file or symbol, materialized on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeNode {
    pub path: String,
    pub lines: LineRange,
    pub text: String,
}

/// A (file, line) location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub line: usize,
}

/// Hex-encoded SHA-256 of file content
pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convert a byte offset to a 1-indexed line number
pub fn line_of_offset(source: &str, offset: usize) -> usize {
    source.as_bytes()[..offset.min(source.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

/// Number of lines as an editor shows them (a trailing newline does not
/// start a new line)
pub fn count_lines(source: &str) -> usize {
    if source.is_empty() {
        0
    } else {
        source.lines().count()
    }
}
