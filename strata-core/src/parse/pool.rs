//! Thread-local pool of tree-sitter parsers.
//!
//! Creating a `tree_sitter::Parser` and loading a grammar is not free, and
//! analysis parses many files per worker thread. Each thread keeps one
//! parser per language, created on first use.

use super::language::LanguageSpec;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static PARSERS: RefCell<HashMap<&'static str, tree_sitter::Parser>> =
        RefCell::new(HashMap::new());
}

/// Run `f` with this thread's parser for `spec`.
///
/// Returns `None` if the grammar could not be loaded (an ABI mismatch
/// between the tree-sitter runtime and the grammar crate).
pub(crate) fn with_parser<F, R>(spec: &'static LanguageSpec, f: F) -> Option<R>
where
    F: FnOnce(&mut tree_sitter::Parser) -> R,
{
    PARSERS.with(|cell| {
        let mut parsers = cell.borrow_mut();
        if !parsers.contains_key(spec.name) {
            let mut parser = tree_sitter::Parser::new();
            if let Err(e) = parser.set_language(&(spec.language)()) {
                tracing::warn!(language = spec.name, "failed to load grammar: {}", e);
                return None;
            }
            parsers.insert(spec.name, parser);
        }
        parsers.get_mut(spec.name).map(f)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::language::{PYTHON, RUST};

    #[test]
    fn test_parser_is_reused_per_language() {
        let first = with_parser(&PYTHON, |p| p.parse("x = 1\n", None).is_some());
        let second = with_parser(&PYTHON, |p| p.parse("def f(): pass\n", None).is_some());
        assert_eq!(first, Some(true));
        assert_eq!(second, Some(true));

        let rust = with_parser(&RUST, |p| p.parse("fn main() {}\n", None).map(|t| t.root_node().kind().to_string()));
        assert_eq!(rust.flatten().as_deref(), Some("source_file"));
    }
}
