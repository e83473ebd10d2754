//! Four-dimension relevance scoring of symbols against a free-text query.

use crate::config::RelevanceWeights;
use crate::symbol::Symbol;
use serde::Serialize;

/// Per-dimension term-hit ratios and their weighted combination
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RelevanceScore {
    pub content: f64,
    pub signature: f64,
    pub docstring: f64,
    pub name: f64,
    pub total: f64,
}

/// Scores symbols by how many query terms appear in each of their
/// content, signature, docstring and name.
pub struct RelevanceScorer {
    query: String,
    terms: Vec<String>,
    weights: RelevanceWeights,
}

impl RelevanceScorer {
    pub fn new(query: &str, weights: &RelevanceWeights) -> Self {
        Self {
            query: query.trim().to_lowercase(),
            terms: split_terms(query),
            weights: weights.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Score one symbol. `content` is the symbol's source text.
    pub fn score(&self, symbol: &Symbol, content: &str) -> RelevanceScore {
        if self.terms.is_empty() {
            return RelevanceScore::default();
        }

        let content = self.hit_ratio(&content.to_lowercase());
        let signature = self.hit_ratio(&symbol.signature.to_lowercase());
        let docstring = symbol
            .docstring
            .as_deref()
            .map(|d| self.hit_ratio(&d.to_lowercase()))
            .unwrap_or(0.0);

        let name_lower = symbol.name.to_lowercase();
        let name = if name_lower == self.query || symbol.qualified_name.to_lowercase() == self.query
        {
            1.0
        } else {
            // Split the identifier too, so `load_config` matches "config"
            let name_terms = split_terms(&symbol.qualified_name).join(" ");
            self.hit_ratio(&name_terms).max(self.hit_ratio(&name_lower) * 0.8)
        };

        let w = &self.weights;
        let weight_sum = w.content + w.signature + w.docstring + w.name;
        let total = if weight_sum > 0.0 {
            (w.content * content + w.signature * signature + w.docstring * docstring + w.name * name)
                / weight_sum
        } else {
            0.0
        };

        RelevanceScore {
            content,
            signature,
            docstring,
            name,
            total,
        }
    }

    fn hit_ratio(&self, haystack: &str) -> f64 {
        let hits = self
            .terms
            .iter()
            .filter(|term| haystack.contains(term.as_str()))
            .count();
        hits as f64 / self.terms.len() as f64
    }
}

/// Lowercased, deduplicated query terms. Identifiers are split on
/// non-alphanumerics and camelCase boundaries.
pub fn split_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let mut current = String::new();
        let mut prev_lower = false;
        for c in word.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                push_term(&mut terms, &current);
                current.clear();
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.extend(c.to_lowercase());
        }
        push_term(&mut terms, &current);
    }
    terms
}

fn push_term(terms: &mut Vec<String>, term: &str) {
    if !term.is_empty() && !terms.iter().any(|t| t == term) {
        terms.push(term.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{LineRange, SymbolId, SymbolKind};

    fn symbol(name: &str, signature: &str, doc: Option<&str>) -> Symbol {
        Symbol {
            id: SymbolId(0),
            name: name.to_string(),
            qualified_name: name.to_string(),
            kind: SymbolKind::Function,
            path: "a.py".to_string(),
            content_hash: String::new(),
            lines: LineRange::new(1, 2),
            span: 0..0,
            signature: signature.to_string(),
            docstring: doc.map(str::to_string),
            body: None,
            parent: None,
            references: vec![],
        }
    }

    #[test]
    fn test_split_terms() {
        assert_eq!(split_terms("loadConfig file_path"), vec!["load", "config", "file", "path"]);
        assert_eq!(split_terms("auth auth"), vec!["auth"]);
        assert!(split_terms("  ").is_empty());
    }

    #[test]
    fn test_exact_name_dominates() {
        let weights = RelevanceWeights::default();
        let scorer = RelevanceScorer::new("parse_config", &weights);
        let exact = symbol("parse_config", "def parse_config(path):", None);
        let other = symbol("load", "def load(config):", Some("Parse things"));
        let a = scorer.score(&exact, "");
        let b = scorer.score(&other, "");
        assert_eq!(a.name, 1.0);
        assert!(a.total > b.total);
    }

    #[test]
    fn test_dimensions_are_independent() {
        let weights = RelevanceWeights::default();
        let scorer = RelevanceScorer::new("retry", &weights);
        let s = symbol("fetch", "def fetch(url):", Some("Fetch with retry."));
        let score = scorer.score(&s, "for _ in range(3): pass");
        assert_eq!(score.docstring, 1.0);
        assert_eq!(score.signature, 0.0);
        assert_eq!(score.content, 0.0);
        assert_eq!(score.name, 0.0);
        assert!(score.total > 0.0);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let scorer = RelevanceScorer::new("", &RelevanceWeights::default());
        assert!(scorer.is_empty());
        assert_eq!(scorer.score(&symbol("x", "", None), "x").total, 0.0);
    }
}
