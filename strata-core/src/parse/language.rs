//! Per-language grammar tables for the tree-sitter parser.

use tree_sitter::Language;

/// Where a language keeps its documentation text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStyle {
    /// First statement of the body is a string literal (Python)
    BodyString,
    /// Contiguous comments directly above the declaration starting with
    /// one of these prefixes
    LeadingComment(&'static [&'static str]),
}

/// Node-kind tables that drive symbol extraction for one grammar.
pub struct LanguageSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    /// Bumped whenever extraction for this language changes; invalidates
    /// cached records produced by older versions
    pub grammar_version: u32,
    pub language: fn() -> Language,
    pub functions: &'static [&'static str],
    pub classes: &'static [&'static str],
    pub modules: &'static [&'static str],
    pub variables: &'static [&'static str],
    pub imports: &'static [&'static str],
    pub calls: &'static [&'static str],
    /// Nodes that bind a name to a function-valued expression
    /// (`const f = () => {}`)
    pub declarators: &'static [&'static str],
    pub doc_style: DocStyle,
    pub comment_prefix: &'static str,
    /// Bodies are delimited by braces on their own lines
    pub braced: bool,
}

impl LanguageSpec {
    pub fn is_function(&self, kind: &str) -> bool {
        self.functions.contains(&kind)
    }

    pub fn is_class(&self, kind: &str) -> bool {
        self.classes.contains(&kind)
    }

    pub fn is_module(&self, kind: &str) -> bool {
        self.modules.contains(&kind)
    }

    pub fn is_variable(&self, kind: &str) -> bool {
        self.variables.contains(&kind)
    }

    pub fn is_import(&self, kind: &str) -> bool {
        self.imports.contains(&kind)
    }

    pub fn is_call(&self, kind: &str) -> bool {
        self.calls.contains(&kind)
    }

    /// Line that replaces the body lines `start..=end`
    pub fn elision_marker(&self, indent: &str, start: usize, end: usize) -> String {
        if self.name == "python" {
            format!("{indent}...  # lines {start}-{end} elided")
        } else {
            format!("{indent}{} ... lines {start}-{end} elided", self.comment_prefix)
        }
    }
}

fn python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

fn rust() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}

fn javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

fn typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}

fn tsx() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}

fn go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

pub static PYTHON: LanguageSpec = LanguageSpec {
    name: "python",
    extensions: &["py", "pyi"],
    grammar_version: 1,
    language: python,
    functions: &["function_definition"],
    classes: &["class_definition"],
    modules: &[],
    variables: &["expression_statement"],
    imports: &["import_statement", "import_from_statement"],
    calls: &["call"],
    declarators: &[],
    doc_style: DocStyle::BodyString,
    comment_prefix: "#",
    braced: false,
};

pub static RUST: LanguageSpec = LanguageSpec {
    name: "rust",
    extensions: &["rs"],
    grammar_version: 1,
    language: rust,
    functions: &["function_item", "function_signature_item"],
    classes: &[
        "struct_item",
        "enum_item",
        "union_item",
        "trait_item",
        "impl_item",
    ],
    modules: &["mod_item"],
    variables: &["const_item", "static_item"],
    imports: &["use_declaration"],
    calls: &["call_expression"],
    declarators: &[],
    doc_style: DocStyle::LeadingComment(&["///", "//!", "/**"]),
    comment_prefix: "//",
    braced: true,
};

static JS_FUNCTIONS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "method_definition",
];
static JS_CALLS: &[&str] = &["call_expression", "new_expression"];
static JS_DOC: DocStyle = DocStyle::LeadingComment(&["/**", "//"]);

pub static JAVASCRIPT: LanguageSpec = LanguageSpec {
    name: "javascript",
    extensions: &["js", "jsx", "mjs", "cjs"],
    grammar_version: 1,
    language: javascript,
    functions: JS_FUNCTIONS,
    classes: &["class_declaration"],
    modules: &[],
    variables: &["lexical_declaration", "variable_declaration"],
    imports: &["import_statement"],
    calls: JS_CALLS,
    declarators: &["variable_declarator"],
    doc_style: JS_DOC,
    comment_prefix: "//",
    braced: true,
};

static TS_CLASSES: &[&str] = &[
    "class_declaration",
    "abstract_class_declaration",
    "interface_declaration",
    "enum_declaration",
];
static TS_FUNCTIONS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "method_definition",
    "method_signature",
    "abstract_method_signature",
];

pub static TYPESCRIPT: LanguageSpec = LanguageSpec {
    name: "typescript",
    extensions: &["ts", "mts", "cts"],
    grammar_version: 1,
    language: typescript,
    functions: TS_FUNCTIONS,
    classes: TS_CLASSES,
    modules: &["internal_module"],
    variables: &["lexical_declaration", "variable_declaration"],
    imports: &["import_statement"],
    calls: JS_CALLS,
    declarators: &["variable_declarator"],
    doc_style: JS_DOC,
    comment_prefix: "//",
    braced: true,
};

pub static TSX: LanguageSpec = LanguageSpec {
    name: "tsx",
    extensions: &["tsx"],
    grammar_version: 1,
    language: tsx,
    functions: TS_FUNCTIONS,
    classes: TS_CLASSES,
    modules: &["internal_module"],
    variables: &["lexical_declaration", "variable_declaration"],
    imports: &["import_statement"],
    calls: JS_CALLS,
    declarators: &["variable_declarator"],
    doc_style: JS_DOC,
    comment_prefix: "//",
    braced: true,
};

pub static GO: LanguageSpec = LanguageSpec {
    name: "go",
    extensions: &["go"],
    grammar_version: 1,
    language: go,
    functions: &["function_declaration", "method_declaration"],
    classes: &["type_declaration"],
    modules: &[],
    variables: &["var_declaration", "const_declaration"],
    imports: &["import_declaration"],
    calls: &["call_expression"],
    declarators: &[],
    doc_style: DocStyle::LeadingComment(&["//"]),
    comment_prefix: "//",
    braced: true,
};

/// Built-in grammars, in registration order
pub static BUILTIN: &[&LanguageSpec] = &[&PYTHON, &RUST, &JAVASCRIPT, &TYPESCRIPT, &TSX, &GO];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions_are_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for spec in BUILTIN {
            for ext in spec.extensions {
                assert!(seen.insert(*ext), "extension {ext} registered twice");
            }
        }
    }

    #[test]
    fn test_grammars_load() {
        for spec in BUILTIN {
            let mut parser = tree_sitter::Parser::new();
            assert!(parser.set_language(&(spec.language)()).is_ok(), "{}", spec.name);
        }
    }

    #[test]
    fn test_elision_marker_styles() {
        assert_eq!(
            PYTHON.elision_marker("    ", 3, 9),
            "    ...  # lines 3-9 elided"
        );
        assert_eq!(RUST.elision_marker("", 2, 4), "// ... lines 2-4 elided");
    }
}
