//! Symbol arena, call graph, dependency graph and reference index.
//!
//! Everything here is rebuilt from the per-file records after the parallel
//! parse phase joins. Symbols live in one flat arena; edges are id pairs.

use crate::error::AnalysisIssue;
use crate::symbol::{FileRecord, Location, RefKind, Symbol, SymbolId, SymbolKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::path::Path;

/// Calls whose name matches more definitions than this are dropped
pub const MAX_AMBIGUOUS_TARGETS: usize = 3;

/// Receivers that denote the enclosing class
const SELF_QUALIFIERS: &[&str] = &["self", "this", "Self", "cls"];

/// Project-wide symbol arena
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, Vec<SymbolId>>,
    by_file: BTreeMap<String, Range<usize>>,
}

impl SymbolTable {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.index())
    }

    pub fn contains(&self, id: SymbolId) -> bool {
        id.index() < self.symbols.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Symbols of one file, in source order
    pub fn in_file(&self, path: &str) -> &[Symbol] {
        match self.by_file.get(path) {
            Some(range) => &self.symbols[range.clone()],
            None => &[],
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.by_file.keys().map(String::as_str)
    }

    /// Ids of every symbol with this short name
    pub fn named(&self, name: &str) -> &[SymbolId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn module_of(&self, path: &str) -> Option<SymbolId> {
        self.in_file(path)
            .iter()
            .find(|s| s.kind == SymbolKind::Module && s.parent.is_none())
            .map(|s| s.id)
    }

    /// Innermost symbol of any kind whose range contains `line`
    pub fn innermost_at(&self, path: &str, line: usize) -> Option<SymbolId> {
        innermost(self.in_file(path), line, |_| true)
    }

    /// Innermost function, class or module containing `line`
    pub fn scope_at(&self, path: &str, line: usize) -> Option<SymbolId> {
        innermost(self.in_file(path), line, |s| s.kind.is_scope())
    }

    /// Nearest class ancestor of `id`, including itself
    pub fn enclosing_class(&self, id: SymbolId) -> Option<SymbolId> {
        let mut current = self.get(id);
        while let Some(symbol) = current {
            if symbol.kind == SymbolKind::Class {
                return Some(symbol.id);
            }
            current = symbol.parent.and_then(|p| self.get(p));
        }
        None
    }

    fn push_file(&mut self, record: &FileRecord) {
        let base = self.symbols.len();
        let count = record.symbols.len();
        for (i, parsed) in record.symbols.iter().enumerate() {
            let id = SymbolId((base + i) as u32);
            let parent = parsed
                .parent
                .filter(|&p| p < count && p != i)
                .map(|p| SymbolId((base + p) as u32));
            self.by_name.entry(parsed.name.clone()).or_default().push(id);
            self.symbols.push(Symbol {
                id,
                name: parsed.name.clone(),
                qualified_name: parsed.qualified_name.clone(),
                kind: parsed.kind,
                path: record.path.clone(),
                content_hash: record.content_hash.clone(),
                lines: parsed.lines,
                span: parsed.span.clone(),
                signature: parsed.signature.clone(),
                docstring: parsed.docstring.clone(),
                body: parsed.body,
                parent,
                references: Vec::new(),
            });
        }
        self.by_file.insert(record.path.clone(), base..base + count);
    }
}

fn innermost(symbols: &[Symbol], line: usize, accept: impl Fn(&Symbol) -> bool) -> Option<SymbolId> {
    symbols
        .iter()
        .filter(|s| accept(s) && s.lines.contains(line))
        .min_by_key(|s| (s.lines.len(), std::cmp::Reverse(s.lines.start)))
        .map(|s| s.id)
}

/// Weight and provenance of one caller → callee edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EdgeInfo {
    /// Number of call sites
    pub count: usize,
    /// Resolved to one of several same-named definitions
    pub ambiguous: bool,
}

/// Directed symbol → symbol call edges
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    outgoing: BTreeMap<SymbolId, BTreeMap<SymbolId, EdgeInfo>>,
    incoming: BTreeMap<SymbolId, BTreeSet<SymbolId>>,
}

impl CallGraph {
    pub fn add(&mut self, caller: SymbolId, callee: SymbolId, ambiguous: bool) {
        let info = self
            .outgoing
            .entry(caller)
            .or_default()
            .entry(callee)
            .or_insert(EdgeInfo {
                count: 0,
                ambiguous,
            });
        info.count += 1;
        info.ambiguous &= ambiguous;
        self.incoming.entry(callee).or_default().insert(caller);
    }

    pub fn contains(&self, caller: SymbolId, callee: SymbolId) -> bool {
        self.outgoing
            .get(&caller)
            .is_some_and(|m| m.contains_key(&callee))
    }

    pub fn edge(&self, caller: SymbolId, callee: SymbolId) -> Option<&EdgeInfo> {
        self.outgoing.get(&caller).and_then(|m| m.get(&callee))
    }

    pub fn callees(&self, id: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.outgoing.get(&id).into_iter().flat_map(|m| m.keys().copied())
    }

    pub fn callers(&self, id: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.incoming.get(&id).into_iter().flat_map(|s| s.iter().copied())
    }

    /// All edges in (caller, callee) order
    pub fn edges(&self) -> impl Iterator<Item = (SymbolId, SymbolId, &EdgeInfo)> + '_ {
        self.outgoing
            .iter()
            .flat_map(|(&from, m)| m.iter().map(move |(&to, info)| (from, to, info)))
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeMap::len).sum()
    }

    /// Drop edges whose endpoints are not in `table`
    pub fn prune(&mut self, table: &SymbolTable) -> Vec<AnalysisIssue> {
        let mut issues = Vec::new();
        let mut dangling = Vec::new();
        for (from, to, _) in self.edges() {
            if !table.contains(from) || !table.contains(to) {
                dangling.push((from, to));
            }
        }
        for (from, to) in dangling {
            if let Some(m) = self.outgoing.get_mut(&from) {
                m.remove(&to);
                if m.is_empty() {
                    self.outgoing.remove(&from);
                }
            }
            if let Some(s) = self.incoming.get_mut(&to) {
                s.remove(&from);
                if s.is_empty() {
                    self.incoming.remove(&to);
                }
            }
            issues.push(AnalysisIssue::GraphInconsistency {
                message: format!("edge {from} -> {to} references a missing symbol"),
            });
        }
        issues
    }
}

/// Directed file → file import edges
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn add(&mut self, from: &str, to: &str) {
        if from != to {
            self.edges
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string());
        }
    }

    pub fn contains(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|s| s.contains(to))
    }

    /// Files imported by `path`
    pub fn imports_of(&self, path: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(path)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Files importing `path`
    pub fn importers_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |(_, targets)| targets.contains(path))
            .map(|(from, _)| from.as_str())
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges
            .iter()
            .flat_map(|(from, to)| to.iter().map(move |t| (from.as_str(), t.as_str())))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }
}

/// Symbol id → every location referencing it
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    locations: HashMap<SymbolId, BTreeSet<Location>>,
}

impl ReferenceIndex {
    fn add(&mut self, target: SymbolId, path: &str, line: usize) {
        self.locations.entry(target).or_default().insert(Location {
            path: path.to_string(),
            line,
        });
    }

    /// Locations in (path, line) order
    pub fn locations(&self, id: SymbolId) -> Vec<Location> {
        self.locations
            .get(&id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Outcome counters of call-edge resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    /// Calls that produced at least one edge (includes ambiguous ones)
    pub resolved_calls: usize,
    /// Calls linked to several same-named definitions
    pub ambiguous_calls: usize,
    /// Calls with no resolvable target
    pub unresolved_calls: usize,
}

impl ResolutionStats {
    /// Share of call sites that produced no edge
    pub fn false_negative_rate(&self) -> f64 {
        let total = self.resolved_calls + self.unresolved_calls;
        if total == 0 {
            0.0
        } else {
            self.unresolved_calls as f64 / total as f64
        }
    }
}

/// Graphs assembled from a set of file records
#[derive(Debug, Default)]
pub(crate) struct GraphBuild {
    pub symbols: SymbolTable,
    pub calls: CallGraph,
    pub dependencies: DependencyGraph,
    pub references: ReferenceIndex,
    pub resolution: ResolutionStats,
    pub issues: Vec<AnalysisIssue>,
}

/// Build the arena and graphs. Ids follow path order, then source order.
pub(crate) fn build(records: &BTreeMap<String, FileRecord>) -> GraphBuild {
    let mut out = GraphBuild::default();
    for record in records.values() {
        out.symbols.push_file(record);
    }

    let files = FileSet::new(records.keys().map(String::as_str));

    for record in records.values() {
        link_imports(record, &files, &mut out);
    }
    for record in records.values() {
        link_calls(record, &mut out);
    }

    let issues = out.calls.prune(&out.symbols);
    out.issues.extend(issues);

    // Outbound reference lists mirror the call graph
    let mut outbound: Vec<(SymbolId, Vec<SymbolId>)> = Vec::new();
    for (from, to, _) in out.calls.edges() {
        match outbound.last_mut() {
            Some((last, list)) if *last == from => list.push(to),
            _ => outbound.push((from, vec![to])),
        }
    }
    for (from, list) in outbound {
        out.symbols.symbols[from.index()].references = list;
    }
    out
}

fn link_imports(record: &FileRecord, files: &FileSet, out: &mut GraphBuild) {
    for import in &record.imports {
        let mut targets = resolve_import(&record.path, &import.module, files);

        if targets.is_empty() {
            // Fall back to the unique file defining an imported name
            for name in &import.names {
                let defining: BTreeSet<&str> = out
                    .symbols
                    .named(name)
                    .iter()
                    .filter_map(|&id| out.symbols.get(id))
                    .filter(|s| is_definition(s.kind) && s.path != record.path)
                    .map(|s| s.path.as_str())
                    .collect();
                if defining.len() == 1 {
                    targets.extend(defining.into_iter().map(str::to_string));
                }
            }
        }

        for target in &targets {
            out.dependencies.add(&record.path, target);
            // Imported names point at their definitions in the target file
            for name in &import.names {
                for symbol in out.symbols.in_file(target) {
                    if &symbol.name == name && is_definition(symbol.kind) {
                        out.references.add(symbol.id, &record.path, import.line);
                    }
                }
            }
        }
    }
}

fn is_definition(kind: SymbolKind) -> bool {
    matches!(kind, SymbolKind::Function | SymbolKind::Class | SymbolKind::Variable)
}

fn link_calls(record: &FileRecord, out: &mut GraphBuild) {
    for reference in record.references.iter().filter(|r| r.kind == RefKind::Call) {
        let Some(caller) = out.symbols.scope_at(&record.path, reference.line) else {
            out.resolution.unresolved_calls += 1;
            continue;
        };

        let targets = resolve_call(
            &out.symbols,
            &out.dependencies,
            &record.path,
            caller,
            &reference.name,
            reference.qualifier.as_deref(),
        );

        match targets.len() {
            0 => out.resolution.unresolved_calls += 1,
            1 => {
                out.resolution.resolved_calls += 1;
                out.calls.add(caller, targets[0], false);
                out.references.add(targets[0], &record.path, reference.line);
            }
            n if n <= MAX_AMBIGUOUS_TARGETS => {
                out.resolution.resolved_calls += 1;
                out.resolution.ambiguous_calls += 1;
                for &target in &targets {
                    out.calls.add(caller, target, true);
                    out.references.add(target, &record.path, reference.line);
                }
            }
            _ => out.resolution.unresolved_calls += 1,
        }
    }
}

/// Candidate callees for a call named `name`, by tier; the first
/// non-empty tier wins.
fn resolve_call(
    table: &SymbolTable,
    deps: &DependencyGraph,
    path: &str,
    caller: SymbolId,
    name: &str,
    qualifier: Option<&str>,
) -> Vec<SymbolId> {
    let callable = |id: &&SymbolId| table.get(**id).is_some_and(|s| s.kind.is_callable());
    let named: Vec<SymbolId> = table.named(name).iter().filter(callable).copied().collect();
    if named.is_empty() {
        return Vec::new();
    }

    // 1. Methods of the enclosing class (and other impl blocks of it)
    if qualifier.is_some_and(|q| SELF_QUALIFIERS.contains(&q)) {
        if let Some(class) = table.enclosing_class(caller).and_then(|c| table.get(c)) {
            let owners: Vec<SymbolId> = table
                .in_file(path)
                .iter()
                .filter(|s| s.kind == SymbolKind::Class && s.name == class.name)
                .map(|s| s.id)
                .collect();
            let methods: Vec<SymbolId> = named
                .iter()
                .copied()
                .filter(|&id| {
                    table
                        .get(id)
                        .and_then(|s| s.parent)
                        .is_some_and(|p| owners.contains(&p))
                })
                .collect();
            if !methods.is_empty() {
                return methods;
            }
        }
    }

    // 2. Same file
    let local: Vec<SymbolId> = named
        .iter()
        .copied()
        .filter(|&id| table.get(id).is_some_and(|s| s.path == path))
        .collect();
    if !local.is_empty() {
        return local;
    }

    // 3. Files this one imports
    let imported: BTreeSet<&str> = deps.imports_of(path).collect();
    let via_imports: Vec<SymbolId> = named
        .iter()
        .copied()
        .filter(|&id| table.get(id).is_some_and(|s| imported.contains(s.path.as_str())))
        .collect();
    if !via_imports.is_empty() {
        return via_imports;
    }

    // 4./5. Project-wide; the caller decides unique vs ambiguous
    named
}

/// Known file paths plus their directories, for import probing
struct FileSet<'a> {
    files: BTreeSet<&'a str>,
}

impl<'a> FileSet<'a> {
    fn new(paths: impl Iterator<Item = &'a str>) -> Self {
        Self {
            files: paths.collect(),
        }
    }

    fn has(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    /// First existing candidate
    fn probe(&self, candidates: &[String]) -> Option<String> {
        candidates.iter().find(|c| self.has(c)).cloned()
    }

    /// Files ending with `/suffix` (or equal to it)
    fn with_suffix(&self, suffix: &str) -> Vec<String> {
        let tail = format!("/{suffix}");
        self.files
            .iter()
            .filter(|f| **f == suffix || f.ends_with(&tail))
            .map(|f| f.to_string())
            .collect()
    }

    /// Files directly inside directory `dir`
    fn in_dir(&self, dir: &str) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| parent_dir(f) == dir)
            .map(|f| f.to_string())
            .collect()
    }
}

/// Map an import specifier written in `from` to files in the analysis
fn resolve_import(from: &str, module: &str, files: &FileSet) -> Vec<String> {
    let ext = Path::new(from)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext {
        "py" | "pyi" => resolve_python(from, module, files),
        "rs" => resolve_rust(from, module, files),
        "go" => resolve_go(module, files),
        "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts" => {
            resolve_js(from, module, files)
        }
        _ => Vec::new(),
    }
}

fn resolve_python(from: &str, module: &str, files: &FileSet) -> Vec<String> {
    let dots = module.chars().take_while(|&c| c == '.').count();
    let rest = module[dots..].replace('.', "/");

    if dots > 0 {
        let mut base = parent_dir(from).to_string();
        for _ in 1..dots {
            base = parent_dir(&base).to_string();
        }
        let stem = join(&base, &rest);
        if rest.is_empty() {
            // `from . import x` resolves through the names
            return Vec::new();
        }
        return files
            .probe(&[format!("{stem}.py"), format!("{stem}/__init__.py"), format!("{stem}.pyi")])
            .into_iter()
            .collect();
    }

    if let Some(found) = files.probe(&[format!("{rest}.py"), format!("{rest}/__init__.py")]) {
        return vec![found];
    }
    // Source layouts such as `src/pkg/mod.py`
    let mut found = files.with_suffix(&format!("{rest}.py"));
    if found.is_empty() {
        found = files.with_suffix(&format!("{rest}/__init__.py"));
    }
    if found.len() == 1 {
        found
    } else {
        Vec::new()
    }
}

fn resolve_js(from: &str, module: &str, files: &FileSet) -> Vec<String> {
    if !module.starts_with('.') {
        return Vec::new();
    }
    let Some(base) = normalize(&join(parent_dir(from), module)) else {
        return Vec::new();
    };
    let mut candidates = vec![base.clone()];
    for ext in ["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts"] {
        candidates.push(format!("{base}.{ext}"));
    }
    for ext in ["ts", "tsx", "js", "jsx"] {
        candidates.push(format!("{base}/index.{ext}"));
    }
    files.probe(&candidates).into_iter().collect()
}

fn resolve_rust(from: &str, module: &str, files: &FileSet) -> Vec<String> {
    let mut segments: Vec<&str> = module.split("::").filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Vec::new();
    }

    let base = match segments[0] {
        "crate" => {
            segments.remove(0);
            crate_src_dir(from)
        }
        "self" => {
            segments.remove(0);
            rust_module_dir(from)
        }
        "super" => {
            let mut dir = rust_module_dir(from);
            while segments.first() == Some(&"super") {
                segments.remove(0);
                dir = parent_dir(&dir).to_string();
            }
            dir
        }
        _ => return Vec::new(),
    };

    // The last segments may name items rather than modules
    while !segments.is_empty() {
        let stem = join(&base, &segments.join("/"));
        if let Some(found) = files.probe(&[format!("{stem}.rs"), format!("{stem}/mod.rs")]) {
            return vec![found];
        }
        segments.pop();
    }
    Vec::new()
}

fn resolve_go(module: &str, files: &FileSet) -> Vec<String> {
    // Longest directory suffix of the import path that exists
    let parts: Vec<&str> = module.split('/').collect();
    for start in 0..parts.len() {
        let dir = parts[start..].join("/");
        let found: Vec<String> = files
            .in_dir(&dir)
            .into_iter()
            .filter(|f| f.ends_with(".go") && !f.ends_with("_test.go"))
            .collect();
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

/// Directory holding `crate::` paths for a file: everything up to `src/`
fn crate_src_dir(from: &str) -> String {
    match from.rfind("src/") {
        Some(pos) => from[..pos + 3].to_string(),
        None => String::new(),
    }
}

/// Directory a Rust file's child modules live in
fn rust_module_dir(from: &str) -> String {
    let dir = parent_dir(from);
    let stem = Path::new(from)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if matches!(stem, "mod" | "lib" | "main") {
        dir.to_string()
    } else {
        join(dir, stem)
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

fn join(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{rest}"),
    }
}

/// Resolve `.` and `..` segments; `None` if the path climbs above the root
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            p => parts.push(p),
        }
    }
    Some(parts.join("/"))
}
