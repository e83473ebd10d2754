//! Table-driven symbol extraction over a tree-sitter syntax tree.

use super::language::{DocStyle, LanguageSpec};
use crate::symbol::{
    count_lines, ImportRef, LineRange, ParseDiagnostic, ParsedSymbol, RefKind, Reference,
    SymbolKind,
};
use tree_sitter::{Node, Tree};

const MAX_DIAGNOSTICS: usize = 20;
const MAX_SIGNATURE_BYTES: usize = 240;
const MAX_REFERENCE_NAME: usize = 80;

/// Raw extraction output for one file
#[derive(Debug, Default)]
pub(crate) struct Extraction {
    pub symbols: Vec<ParsedSymbol>,
    pub references: Vec<Reference>,
    pub imports: Vec<ImportRef>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Enclosing context passed down during traversal
#[derive(Clone)]
struct Scope {
    /// Index of the enclosing symbol (the module symbol is 0)
    parent: usize,
    prefix: String,
    in_function: bool,
}

struct Extractor<'a> {
    spec: &'a LanguageSpec,
    source: &'a str,
    out: Extraction,
}

/// Extract symbols, references and imports from a parsed tree.
///
/// Traversal order is fixed (pre-order, source order), so identical input
/// always yields identical records.
pub(crate) fn extract(
    spec: &LanguageSpec,
    module_name: &str,
    source: &str,
    tree: &Tree,
) -> Extraction {
    let root = tree.root_node();
    let mut ex = Extractor {
        spec,
        source,
        out: Extraction::default(),
    };

    ex.push_module(module_name, root);
    let scope = Scope {
        parent: 0,
        prefix: String::new(),
        in_function: false,
    };
    ex.visit_children(root, &scope);

    if root.has_error() {
        collect_diagnostics(root, source, &mut ex.out.diagnostics);
    }
    ex.out
}

impl<'a> Extractor<'a> {
    fn push_module(&mut self, name: &str, root: Node) {
        let docstring = match self.spec.doc_style {
            DocStyle::BodyString => first_docstring(root, self.source),
            DocStyle::LeadingComment(_) => self.file_header_comment(root),
        };
        self.out.symbols.push(ParsedSymbol {
            name: name.to_string(),
            qualified_name: name.to_string(),
            kind: SymbolKind::Module,
            parent: None,
            lines: LineRange::new(1, count_lines(self.source).max(1)),
            span: 0..self.source.len(),
            signature: String::new(),
            docstring,
            body: None,
        });
    }

    fn visit_children(&mut self, node: Node, scope: &Scope) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child, scope);
        }
    }

    fn visit(&mut self, node: Node, scope: &Scope) {
        let kind = node.kind();

        if self.spec.is_call(kind) {
            self.record_call(node);
        }

        if self.spec.is_import(kind) {
            self.record_import(node, scope);
            return;
        }

        if self.spec.is_function(kind) {
            let body = node.child_by_field_name("body");
            if let Some(idx) = self.push_function(node, node, body, None, scope) {
                let inner = self.child_scope(idx, true);
                self.visit_children(node, &inner);
                return;
            }
        } else if kind == "type_declaration" && self.spec.name == "go" {
            self.record_go_types(node, scope);
            return;
        } else if self.spec.is_class(kind) {
            if let Some(idx) = self.push_class(node, scope) {
                let inner = self.child_scope(idx, false);
                self.visit_children(node, &inner);
                return;
            }
        } else if self.spec.is_module(kind) {
            if let Some(idx) = self.push_inline_module(node, scope) {
                let inner = self.child_scope(idx, false);
                self.visit_children(node, &inner);
                return;
            }
        } else if self.spec.is_variable(kind) && !scope.in_function {
            self.record_variables(node, scope);
            return;
        }

        self.visit_children(node, scope);
    }

    fn child_scope(&self, idx: usize, in_function: bool) -> Scope {
        Scope {
            parent: idx,
            prefix: self.out.symbols[idx].qualified_name.clone(),
            in_function,
        }
    }

    /// Push a function symbol. `outer` is the node whose range the symbol
    /// covers, `decl` the node carrying the name (they differ for
    /// `const f = () => {}`).
    fn push_function(
        &mut self,
        outer: Node,
        decl: Node,
        body: Option<Node>,
        name_override: Option<String>,
        scope: &Scope,
    ) -> Option<usize> {
        let name = match name_override {
            Some(n) => n,
            None => text(decl.child_by_field_name("name")?, self.source).to_string(),
        };
        if name.is_empty() {
            return None;
        }

        let qualified_name = match go_receiver_type(decl, self.source) {
            Some(receiver) => format!("{receiver}.{name}"),
            None => qualify(&scope.prefix, &name),
        };
        let signature = self.signature(outer, body);
        let (docstring, body_lines) = self.doc_and_body(outer, body);

        self.out.symbols.push(ParsedSymbol {
            name,
            qualified_name,
            kind: SymbolKind::Function,
            parent: Some(scope.parent),
            lines: node_lines(outer),
            span: outer.start_byte()..outer.end_byte(),
            signature,
            docstring,
            body: body_lines,
        });
        Some(self.out.symbols.len() - 1)
    }

    fn push_class(&mut self, node: Node, scope: &Scope) -> Option<usize> {
        let name = class_name(node, self.source)?;
        let body = node.child_by_field_name("body");
        let signature = self.signature(node, body);
        let docstring = match self.spec.doc_style {
            DocStyle::BodyString => body.and_then(|b| first_docstring(b, self.source)),
            DocStyle::LeadingComment(prefixes) => self.leading_comment(node, prefixes),
        };

        self.out.symbols.push(ParsedSymbol {
            qualified_name: qualify(&scope.prefix, &name),
            name,
            kind: SymbolKind::Class,
            parent: Some(scope.parent),
            lines: node_lines(node),
            span: node.start_byte()..node.end_byte(),
            signature,
            docstring,
            body: None,
        });
        Some(self.out.symbols.len() - 1)
    }

    fn push_inline_module(&mut self, node: Node, scope: &Scope) -> Option<usize> {
        let name = text(node.child_by_field_name("name")?, self.source).to_string();
        let body = node.child_by_field_name("body");
        let docstring = match self.spec.doc_style {
            DocStyle::LeadingComment(prefixes) => self.leading_comment(node, prefixes),
            DocStyle::BodyString => None,
        };
        self.out.symbols.push(ParsedSymbol {
            qualified_name: qualify(&scope.prefix, &name),
            name,
            kind: SymbolKind::Module,
            parent: Some(scope.parent),
            lines: node_lines(node),
            span: node.start_byte()..node.end_byte(),
            signature: self.signature(node, body),
            docstring,
            body: None,
        });
        Some(self.out.symbols.len() - 1)
    }

    fn push_variable(&mut self, node: Node, name: &str, scope: &Scope) {
        if name.is_empty() {
            return;
        }
        self.out.symbols.push(ParsedSymbol {
            name: name.to_string(),
            qualified_name: qualify(&scope.prefix, name),
            kind: SymbolKind::Variable,
            parent: Some(scope.parent),
            lines: node_lines(node),
            span: node.start_byte()..node.end_byte(),
            signature: first_line(text(node, self.source)),
            docstring: None,
            body: None,
        });
    }

    fn record_go_types(&mut self, node: Node, scope: &Scope) {
        let mut cursor = node.walk();
        let specs: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|c| matches!(c.kind(), "type_spec" | "type_alias"))
            .collect();
        for spec_node in specs {
            let Some(name_node) = spec_node.child_by_field_name("name") else {
                continue;
            };
            let name = text(name_node, self.source).to_string();
            // A lone spec carries the declaration's comments and `type` keyword.
            let outer = if node.named_child_count() == 1 { node } else { spec_node };
            let docstring = match self.spec.doc_style {
                DocStyle::LeadingComment(prefixes) => self.leading_comment(outer, prefixes),
                DocStyle::BodyString => None,
            };
            self.out.symbols.push(ParsedSymbol {
                qualified_name: qualify(&scope.prefix, &name),
                name,
                kind: SymbolKind::Class,
                parent: Some(scope.parent),
                lines: node_lines(outer),
                span: outer.start_byte()..outer.end_byte(),
                signature: first_line(text(outer, self.source)),
                docstring,
                body: None,
            });
        }
    }

    fn record_variables(&mut self, node: Node, scope: &Scope) {
        match self.spec.name {
            "python" => {
                if let Some(assignment) = node.named_child(0).filter(|c| c.kind() == "assignment") {
                    if let Some(left) = assignment
                        .child_by_field_name("left")
                        .filter(|l| l.kind() == "identifier")
                    {
                        let name = text(left, self.source).to_string();
                        self.push_variable(node, &name, scope);
                    }
                }
                self.visit_children(node, scope);
            }
            "rust" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = text(name, self.source).to_string();
                    self.push_variable(node, &name, scope);
                }
                self.visit_children(node, scope);
            }
            "go" => {
                let mut specs = Vec::new();
                collect_kinds(node, &["var_spec", "const_spec"], &mut specs);
                for spec_node in specs {
                    let mut cursor = spec_node.walk();
                    let names: Vec<String> = spec_node
                        .children_by_field_name("name", &mut cursor)
                        .map(|n| text(n, self.source).to_string())
                        .collect();
                    for name in names {
                        self.push_variable(spec_node, &name, scope);
                    }
                }
                self.visit_children(node, scope);
            }
            _ => {
                // JavaScript / TypeScript declarations
                let mut cursor = node.walk();
                let declarators: Vec<Node> = node
                    .named_children(&mut cursor)
                    .filter(|c| self.spec.declarators.contains(&c.kind()))
                    .collect();
                let single = declarators.len() == 1;
                for declarator in declarators {
                    let name_node = declarator.child_by_field_name("name");
                    let value = declarator.child_by_field_name("value");
                    let function_value = value.filter(|v| {
                        matches!(
                            v.kind(),
                            "arrow_function" | "function_expression" | "function" | "generator_function"
                        )
                    });
                    match (name_node, function_value) {
                        (Some(name_node), Some(func)) => {
                            let outer = if single { node } else { declarator };
                            let name = text(name_node, self.source).to_string();
                            let body = func.child_by_field_name("body");
                            if let Some(idx) =
                                self.push_function(outer, declarator, body, Some(name), scope)
                            {
                                let inner = self.child_scope(idx, true);
                                self.visit_children(func, &inner);
                            }
                        }
                        (Some(name_node), None) => {
                            if name_node.kind() == "identifier" {
                                let name = text(name_node, self.source).to_string();
                                let outer = if single { node } else { declarator };
                                self.push_variable(outer, &name, scope);
                            }
                            self.visit_children(declarator, scope);
                        }
                        _ => self.visit_children(declarator, scope),
                    }
                }
            }
        }
    }

    fn record_import(&mut self, node: Node, scope: &Scope) {
        let line = node_lines(node).start;
        let imports = match self.spec.name {
            "python" => python_imports(node, self.source, line),
            "rust" => rust_imports(node, self.source, line),
            "go" => go_imports(node, self.source),
            _ => js_imports(node, self.source, line),
        };

        for import in &imports {
            let names = if import.names.is_empty() {
                vec![import.module.clone()]
            } else {
                import.names.clone()
            };
            for name in names {
                self.out.references.push(Reference {
                    name,
                    qualifier: Some(import.module.clone()),
                    kind: RefKind::Import,
                    line: import.line,
                    span: node.start_byte()..node.end_byte(),
                });
            }
        }

        if let Some(first) = imports.first() {
            let signature = text(node, self.source);
            self.out.symbols.push(ParsedSymbol {
                name: first.module.clone(),
                qualified_name: qualify(&scope.prefix, &first.module),
                kind: SymbolKind::Import,
                parent: Some(scope.parent),
                lines: node_lines(node),
                span: node.start_byte()..node.end_byte(),
                signature: truncate(signature.trim(), MAX_SIGNATURE_BYTES),
                docstring: None,
                body: None,
            });
        }
        self.out.imports.extend(imports);
    }

    fn record_call(&mut self, node: Node) {
        let target = node
            .child_by_field_name("function")
            .or_else(|| node.child_by_field_name("constructor"));
        let Some(target) = target else {
            return;
        };
        let (name, qualifier) = call_target(target, self.source);
        if name.is_empty() {
            return;
        }
        self.out.references.push(Reference {
            name: truncate(&name, MAX_REFERENCE_NAME),
            qualifier,
            kind: RefKind::Call,
            line: node.start_position().row + 1,
            span: node.start_byte()..node.end_byte(),
        });
    }

    /// Declaration text from the node start up to its body
    fn signature(&self, node: Node, body: Option<Node>) -> String {
        let end = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
        let raw = &self.source[node.start_byte()..end];
        let trimmed = raw.trim_end();
        let trimmed = if body.is_some() || self.spec.braced {
            trimmed.trim_end_matches('{').trim_end()
        } else {
            trimmed
        };
        if body.is_none() {
            // Bodiless declarations (struct Foo;, interface members) keep
            // their first line only.
            return truncate(&first_line(trimmed), MAX_SIGNATURE_BYTES);
        }
        truncate(trimmed, MAX_SIGNATURE_BYTES * 2)
    }

    fn doc_and_body(&self, node: Node, body: Option<Node>) -> (Option<String>, Option<LineRange>) {
        let decl_line = node.start_position().row + 1;
        match self.spec.doc_style {
            DocStyle::BodyString => {
                let Some(body) = body else {
                    return (None, None);
                };
                let body_lines = node_lines(body);
                let doc_node = docstring_node(body);
                let docstring = doc_node.map(|d| clean_docstring(text(d, self.source)));
                let start = match doc_node {
                    Some(d) => node_lines(d).end + 1,
                    None => body_lines.start,
                };
                let elided = (start > decl_line && start <= body_lines.end)
                    .then(|| LineRange::new(start, body_lines.end));
                (docstring, elided)
            }
            DocStyle::LeadingComment(prefixes) => {
                let docstring = self.leading_comment(node, prefixes);
                let elided = body.and_then(|b| {
                    let lines = node_lines(b);
                    let start = lines.start + 1;
                    let end = lines.end.saturating_sub(1);
                    (start <= end && lines.start >= decl_line).then(|| LineRange::new(start, end))
                });
                (docstring, elided)
            }
        }
    }

    /// Doc comments directly above `node` (skipping attributes/decorators)
    fn leading_comment(&self, node: Node, prefixes: &[&str]) -> Option<String> {
        let anchor = match node.parent() {
            Some(p) if matches!(p.kind(), "export_statement") && node.prev_sibling().is_none() => p,
            _ => node,
        };

        let mut comments = Vec::new();
        let mut expected_line = anchor.start_position().row;
        let mut sibling = anchor.prev_sibling();
        while let Some(s) = sibling {
            let kind = s.kind();
            if kind == "attribute_item" || kind == "decorator" {
                expected_line = s.start_position().row;
                sibling = s.prev_sibling();
                continue;
            }
            if !kind.contains("comment") {
                break;
            }
            // Must be adjacent: no blank line between comment and declaration
            if s.end_position().row + 1 < expected_line {
                break;
            }
            comments.push(text(s, self.source).trim_end());
            expected_line = s.start_position().row;
            sibling = s.prev_sibling();
        }

        if comments.is_empty() {
            return None;
        }
        comments.reverse();
        let first = comments[0].trim_start();
        if !prefixes.iter().any(|p| first.starts_with(p)) {
            return None;
        }
        let doc = strip_comment_markers(&comments.join("\n"));
        (!doc.is_empty()).then_some(doc)
    }

    /// Comment block at the very top of a file (after any shebang)
    fn file_header_comment(&self, root: Node) -> Option<String> {
        let mut cursor = root.walk();
        let mut comments = Vec::new();
        for child in root.children(&mut cursor) {
            if !child.kind().contains("comment") {
                break;
            }
            let t = text(child, self.source);
            if t.starts_with("#!") {
                continue;
            }
            comments.push(t.trim_end());
        }
        if comments.is_empty() {
            return None;
        }
        let doc = strip_comment_markers(&comments.join("\n"));
        (!doc.is_empty()).then_some(doc)
    }
}

fn python_imports(node: Node, source: &str, line: usize) -> Vec<ImportRef> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    if node.kind() == "import_from_statement" {
        let Some(module) = node.child_by_field_name("module_name") else {
            return out;
        };
        let names: Vec<String> = node
            .named_children(&mut cursor)
            .filter(|c| c.id() != module.id())
            .filter_map(|c| match c.kind() {
                "dotted_name" => Some(text(c, source).to_string()),
                "aliased_import" => c.child_by_field_name("name").map(|n| text(n, source).to_string()),
                "wildcard_import" => Some("*".to_string()),
                _ => None,
            })
            .collect();
        out.push(ImportRef {
            module: text(module, source).to_string(),
            names,
            line,
        });
    } else {
        for child in node.named_children(&mut cursor) {
            let (module, bound) = match child.kind() {
                "dotted_name" => {
                    let m = text(child, source).to_string();
                    let first = m.split('.').next().unwrap_or_default().to_string();
                    (m, first)
                }
                "aliased_import" => {
                    let m = child
                        .child_by_field_name("name")
                        .map(|n| text(n, source).to_string())
                        .unwrap_or_default();
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| text(n, source).to_string())
                        .unwrap_or_else(|| m.clone());
                    (m, alias)
                }
                _ => continue,
            };
            if !module.is_empty() {
                out.push(ImportRef {
                    module,
                    names: vec![bound],
                    line,
                });
            }
        }
    }
    out
}

fn rust_imports(node: Node, source: &str, line: usize) -> Vec<ImportRef> {
    let Some(argument) = node.child_by_field_name("argument") else {
        return Vec::new();
    };
    let full = text(argument, source);
    let module = match full.find("::{") {
        Some(pos) => full[..pos].to_string(),
        None => full.split(" as ").next().unwrap_or(full).trim().to_string(),
    };
    let mut names = Vec::new();
    collect_rust_use_names(argument, source, &mut names);
    vec![ImportRef {
        module,
        names,
        line,
    }]
}

/// Leaf names bound by a Rust use tree
fn collect_rust_use_names(node: Node, source: &str, names: &mut Vec<String>) {
    match node.kind() {
        "identifier" => names.push(text(node, source).to_string()),
        "scoped_identifier" => {
            if let Some(name) = node.child_by_field_name("name") {
                names.push(text(name, source).to_string());
            }
        }
        "use_as_clause" => {
            if let Some(path) = node.child_by_field_name("path") {
                collect_rust_use_names(path, source, names);
            }
        }
        "use_wildcard" => names.push("*".to_string()),
        "scoped_use_list" => {
            if let Some(list) = node.child_by_field_name("list") {
                collect_rust_use_names(list, source, names);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_rust_use_names(child, source, names);
            }
        }
        _ => {}
    }
}

fn js_imports(node: Node, source: &str, line: usize) -> Vec<ImportRef> {
    let Some(src) = node.child_by_field_name("source") else {
        return Vec::new();
    };
    let module = strip_quotes(text(src, source)).to_string();
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "import_clause" {
            collect_js_import_names(child, source, &mut names);
        }
    }
    vec![ImportRef {
        module,
        names,
        line,
    }]
}

fn collect_js_import_names(node: Node, source: &str, names: &mut Vec<String>) {
    match node.kind() {
        "identifier" => names.push(text(node, source).to_string()),
        "import_specifier" => {
            if let Some(name) = node.child_by_field_name("name") {
                names.push(text(name, source).to_string());
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_js_import_names(child, source, names);
            }
        }
    }
}

fn go_imports(node: Node, source: &str) -> Vec<ImportRef> {
    let mut specs = Vec::new();
    collect_kinds(node, &["import_spec"], &mut specs);
    specs
        .into_iter()
        .filter_map(|spec| {
            let path = strip_quotes(text(spec.child_by_field_name("path")?, source)).to_string();
            let bound = spec
                .child_by_field_name("name")
                .map(|n| text(n, source).to_string())
                .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(&path).to_string());
            Some(ImportRef {
                module: path,
                names: vec![bound],
                line: spec.start_position().row + 1,
            })
        })
        .collect()
}

/// Extract the call target (function name and optional qualifier)
fn call_target(func: Node, source: &str) -> (String, Option<String>) {
    match func.kind() {
        "identifier" => (text(func, source).to_string(), None),
        "member_expression" | "attribute" | "field_expression" | "selector_expression" => {
            let property = func
                .child_by_field_name("property")
                .or_else(|| func.child_by_field_name("attribute"))
                .or_else(|| func.child_by_field_name("field"));
            let object = func
                .child_by_field_name("object")
                .or_else(|| func.child_by_field_name("value"))
                .or_else(|| func.child_by_field_name("operand"));
            match (property, object) {
                (Some(p), Some(o)) => (text(p, source).to_string(), Some(text(o, source).to_string())),
                (Some(p), None) => (text(p, source).to_string(), None),
                _ => (text(func, source).to_string(), None),
            }
        }
        "scoped_identifier" => match func.child_by_field_name("name") {
            Some(name) => (
                text(name, source).to_string(),
                func.child_by_field_name("path").map(|p| text(p, source).to_string()),
            ),
            None => (text(func, source).to_string(), None),
        },
        "generic_function" => match func.child_by_field_name("function") {
            Some(inner) => call_target(inner, source),
            None => (text(func, source).to_string(), None),
        },
        _ => (text(func, source).to_string(), None),
    }
}

fn class_name(node: Node, source: &str) -> Option<String> {
    if node.kind() == "impl_item" {
        let ty = node.child_by_field_name("type")?;
        let named = match ty.kind() {
            "generic_type" => ty.child_by_field_name("type").unwrap_or(ty),
            "scoped_type_identifier" => ty.child_by_field_name("name").unwrap_or(ty),
            _ => ty,
        };
        return Some(text(named, source).to_string());
    }
    node.child_by_field_name("name")
        .map(|n| text(n, source).to_string())
        .filter(|n| !n.is_empty())
}

fn go_receiver_type(node: Node, source: &str) -> Option<String> {
    if node.kind() != "method_declaration" {
        return None;
    }
    let receiver = node.child_by_field_name("receiver")?;
    let param = receiver.named_child(0)?;
    let ty = param.child_by_field_name("type")?;
    let ty = if ty.kind() == "pointer_type" {
        ty.named_child(0)?
    } else {
        ty
    };
    let ty = if ty.kind() == "generic_type" {
        ty.child_by_field_name("type").unwrap_or(ty)
    } else {
        ty
    };
    Some(text(ty, source).to_string())
}

/// The docstring statement of a Python block or module, if any
fn docstring_node(block: Node) -> Option<Node> {
    let first = block.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    first.named_child(0).filter(|c| c.kind() == "string").map(|_| first)
}

fn first_docstring(block: Node, source: &str) -> Option<String> {
    docstring_node(block).map(|d| clean_docstring(text(d, source)))
}

fn clean_docstring(raw: &str) -> String {
    let stripped = strip_quotes(raw.trim());
    stripped
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim_start_matches(|c: char| matches!(c, 'r' | 'R' | 'b' | 'B' | 'u' | 'U' | 'f' | 'F'));
    for quote in ["\"\"\"", "'''", "\"", "'", "`"] {
        if s.len() >= quote.len() * 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[quote.len()..s.len() - quote.len()];
        }
    }
    s
}

fn strip_comment_markers(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let l = line.trim();
            let l = l
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_start_matches("///")
                .trim_start_matches("//!")
                .trim_start_matches("//")
                .trim_start_matches('#');
            let l = l.trim_end_matches("*/");
            let l = l.trim_start();
            l.strip_prefix("* ").unwrap_or(if l == "*" { "" } else { l }).trim_end()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn collect_kinds<'t>(node: Node<'t>, kinds: &[&str], out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            out.push(child);
        } else {
            collect_kinds(child, kinds, out);
        }
    }
}

fn collect_diagnostics(node: Node, source: &str, out: &mut Vec<ParseDiagnostic>) {
    if out.len() >= MAX_DIAGNOSTICS {
        return;
    }
    let pos = node.start_position();
    if node.is_error() {
        let snippet = truncate(first_line(text(node, source)).trim(), 40);
        out.push(ParseDiagnostic {
            line: pos.row + 1,
            column: pos.column + 1,
            message: format!("syntax error near `{snippet}`"),
        });
        return;
    }
    if node.is_missing() {
        out.push(ParseDiagnostic {
            line: pos.row + 1,
            column: pos.column + 1,
            message: format!("missing `{}`", node.kind()),
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        collect_diagnostics(child, source, out);
    }
}

fn node_lines(node: Node) -> LineRange {
    let start = node.start_position().row + 1;
    let end_pos = node.end_position();
    // A node ending at column 0 stops on the previous line.
    let end = if end_pos.column == 0 && end_pos.row + 1 > start {
        end_pos.row
    } else {
        end_pos.row + 1
    };
    LineRange::new(start, end.max(start))
}

fn text<'s>(node: Node, source: &'s str) -> &'s str {
    &source[node.start_byte()..node.end_byte()]
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn first_line(s: &str) -> String {
    truncate(s.lines().next().unwrap_or_default().trim_end(), MAX_SIGNATURE_BYTES)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"\"\"doc\"\"\""), "doc");
        assert_eq!(strip_quotes("r'raw'"), "raw");
        assert_eq!(strip_quotes("\"./util\""), "./util");
    }

    #[test]
    fn test_strip_comment_markers() {
        assert_eq!(strip_comment_markers("/// Adds numbers\n/// quickly"), "Adds numbers\nquickly");
        assert_eq!(strip_comment_markers("/**\n * Docs here\n */"), "Docs here");
        assert_eq!(strip_comment_markers("// Package util does things"), "Package util does things");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "ééééé";
        let t = truncate(s, 3);
        assert!(t.ends_with("..."));
        assert!(t.len() <= 3 + 3);
    }
}
