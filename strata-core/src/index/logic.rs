//! L1 logic layer: the repository map and its textual rendering.

use super::trajectory::{Heatmap, TrajectoryMapping};
use crate::analyze::relevance::RelevanceScorer;
use crate::analyze::{Analysis, AnalysisStats};
use crate::config::Config;
use crate::symbol::{LineRange, SymbolId, SymbolKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub language: String,
    pub lines: usize,
    pub symbols: usize,
    /// Observed calls into this file
    pub heat: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySymbol {
    pub id: SymbolId,
    pub path: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub signature: String,
    pub lines: LineRange,
    pub importance: f64,
    /// Relevance to the focus query, when one was given
    pub relevance: Option<f64>,
    pub heat: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallEdge {
    pub caller: SymbolId,
    pub callee: SymbolId,
    pub caller_name: String,
    pub callee_name: String,
    /// Static call sites
    pub sites: usize,
    pub ambiguous: bool,
    /// Observed calls into the callee
    pub heat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

/// Panoramic view of an analyzed repository.
///
/// Rendering may collapse parts of it; the map itself always keeps
/// everything.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryMap {
    pub root: PathBuf,
    /// Hash of the tree listing, trajectory and focus this map was built from
    pub fingerprint: String,
    pub tree: Vec<TreeEntry>,
    pub key_symbols: Vec<KeySymbol>,
    pub call_edges: Vec<CallEdge>,
    pub dependencies: Vec<DependencyEdge>,
    /// Observed calls per symbol, keyed by `path::Qualified.name`
    pub heatmap: BTreeMap<String, u64>,
    /// One-line description per file
    pub modules: BTreeMap<String, String>,
    pub trajectory: Vec<TrajectoryMapping>,
    pub has_trajectory: bool,
    /// Files with no observed events (empty without a trajectory)
    pub unexecuted_files: Vec<String>,
    pub focus: Option<String>,
    pub stats: AnalysisStats,
}

impl RepositoryMap {
    pub(crate) fn build(
        analysis: &Analysis,
        heat: Option<&Heatmap>,
        focus: Option<&str>,
        config: &Config,
        fingerprint: String,
    ) -> Self {
        let empty = Heatmap::default();
        let heatmap_data = heat.unwrap_or(&empty);

        let tree = analysis
            .files
            .values()
            .map(|record| TreeEntry {
                path: record.path.clone(),
                language: record.language.clone(),
                lines: record.line_count,
                symbols: analysis
                    .symbols
                    .in_file(&record.path)
                    .iter()
                    .filter(|s| s.kind.is_callable())
                    .count(),
                heat: heatmap_data.file_heat(&record.path),
            })
            .collect();

        let key_symbols = key_symbols(analysis, heatmap_data, focus, config);

        let call_edges = analysis
            .calls
            .edges()
            .filter_map(|(from, to, info)| {
                let caller = analysis.symbols.get(from)?;
                let callee = analysis.symbols.get(to)?;
                Some(CallEdge {
                    caller: from,
                    callee: to,
                    caller_name: caller.display_name(),
                    callee_name: callee.display_name(),
                    sites: info.count,
                    ambiguous: info.ambiguous,
                    heat: heatmap_data.symbol_heat(to),
                })
            })
            .collect();

        let dependencies = analysis
            .dependencies
            .edges()
            .map(|(from, to)| DependencyEdge {
                from: from.to_string(),
                to: to.to_string(),
            })
            .collect();

        let heatmap = heatmap_data
            .symbols
            .iter()
            .filter_map(|(id, calls)| {
                analysis
                    .symbols
                    .get(*id)
                    .map(|s| (s.display_name(), *calls))
            })
            .collect();

        let modules = analysis
            .files
            .keys()
            .map(|path| (path.clone(), describe_module(analysis, path)))
            .collect();

        let unexecuted_files = if heat.is_some() {
            analysis
                .files
                .keys()
                .filter(|p| heatmap_data.file_heat(p) == 0)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        Self {
            root: analysis.root.clone(),
            fingerprint,
            tree,
            key_symbols,
            call_edges,
            dependencies,
            heatmap,
            modules,
            trajectory: heatmap_data.mappings.clone(),
            has_trajectory: heat.is_some(),
            unexecuted_files,
            focus: focus.map(str::to_string),
            stats: analysis.stats.clone(),
        }
    }

    /// Render the map as text for a context window.
    pub fn render(&self, options: &RenderOptions) -> RenderedMap {
        let text = MapText { map: self, options }.to_string();
        let tokens = estimate_tokens(&text);
        RenderedMap { text, tokens }
    }

    fn write_text(&self, out: &mut impl fmt::Write, options: &RenderOptions) -> fmt::Result {
        let prune = options.prune_unexecuted && self.has_trajectory;

        writeln!(out, "# Repository map: {}", self.root.display())?;
        if let Some(focus) = &self.focus {
            writeln!(out, "focus: {focus}")?;
        }

        // Directory tree
        writeln!(out, "\n## Files ({})", self.tree.len())?;
        let mut collapsed_files = 0usize;
        for entry in self.tree.iter().take(options.max_tree_entries) {
            if prune && entry.heat == 0 {
                writeln!(out, "  {} (not executed)", entry.path)?;
                collapsed_files += 1;
                continue;
            }
            let description = self.modules.get(&entry.path).map(String::as_str).unwrap_or("");
            write!(
                out,
                "  {} [{}, {} lines, {} symbols",
                entry.path, entry.language, entry.lines, entry.symbols
            )?;
            if self.has_trajectory {
                write!(out, ", {} calls", entry.heat)?;
            }
            writeln!(out, "] {description}")?;
        }
        if self.tree.len() > options.max_tree_entries {
            writeln!(out, "  ... {} more files", self.tree.len() - options.max_tree_entries)?;
        }

        // Key symbols
        writeln!(out, "\n## Key symbols")?;
        for symbol in self.key_symbols.iter().take(options.max_key_symbols) {
            let name = format!("{}::{}", symbol.path, symbol.qualified_name);
            if prune && symbol.heat == 0 {
                writeln!(out, "  {name} (not executed)")?;
                continue;
            }
            write!(
                out,
                "  {name} L{} [{} importance {:.4}",
                symbol.lines, symbol.kind, symbol.importance
            )?;
            if let Some(relevance) = symbol.relevance {
                write!(out, ", relevance {relevance:.2}")?;
            }
            if self.has_trajectory {
                write!(out, ", {} calls", symbol.heat)?;
            }
            writeln!(out, "]")?;
            writeln!(out, "      {}", first_line(&symbol.signature))?;
        }

        // Call graph, executed edges first
        writeln!(out, "\n## Call graph ({} edges)", self.call_edges.len())?;
        let mut edges: Vec<&CallEdge> = self.call_edges.iter().collect();
        edges.sort_by(|a, b| {
            b.heat
                .cmp(&a.heat)
                .then_with(|| a.caller_name.cmp(&b.caller_name))
                .then_with(|| a.callee_name.cmp(&b.callee_name))
        });
        let mut unexecuted_edges = 0usize;
        let mut shown = 0usize;
        for edge in edges {
            if prune && edge.heat == 0 {
                unexecuted_edges += 1;
                continue;
            }
            if shown == options.max_call_edges {
                break;
            }
            shown += 1;
            write!(out, "  {} -> {}", edge.caller_name, edge.callee_name)?;
            if self.has_trajectory {
                write!(out, " [{} calls]", edge.heat)?;
            } else if edge.sites > 1 {
                write!(out, " [{} sites]", edge.sites)?;
            }
            if edge.ambiguous {
                write!(out, " (ambiguous)")?;
            }
            out.write_char('\n')?;
        }
        let hidden = self.call_edges.len() - shown - unexecuted_edges;
        if hidden > 0 {
            writeln!(out, "  ... {hidden} more edges")?;
        }
        if unexecuted_edges > 0 {
            writeln!(out, "  ... {unexecuted_edges} edges not executed")?;
        }

        if !self.dependencies.is_empty() {
            writeln!(out, "\n## Dependencies")?;
            for dep in &self.dependencies {
                writeln!(out, "  {} -> {}", dep.from, dep.to)?;
            }
        }

        if self.has_trajectory {
            writeln!(out, "\n## Trajectory")?;
            for mapping in &self.trajectory {
                let target = mapping.target.as_deref().unwrap_or("(unmapped)");
                write!(
                    out,
                    "  {} x{} -> {}",
                    mapping.event.function, mapping.event.calls, target
                )?;
                if let Some(error) = &mapping.event.error {
                    write!(out, " !! {error}")?;
                }
                out.write_char('\n')?;
            }
            if collapsed_files > 0 {
                writeln!(out, "  {collapsed_files} files not executed")?;
            }
        }

        let s = &self.stats;
        writeln!(
            out,
            "\n-- {} files, {} symbols, {} call edges; calls resolved {}, ambiguous {}, unresolved {} (false-negative rate {:.1}%)",
            s.files,
            s.symbols,
            s.call_edges,
            s.resolution.resolved_calls,
            s.resolution.ambiguous_calls,
            s.resolution.unresolved_calls,
            s.false_negative_rate * 100.0
        )?;

        Ok(())
    }
}

struct MapText<'a> {
    map: &'a RepositoryMap,
    options: &'a RenderOptions,
}

impl fmt::Display for MapText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.map.write_text(f, self.options)
    }
}

/// Knobs for [`RepositoryMap::render`]
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Collapse files, symbols and edges with no observed calls
    pub prune_unexecuted: bool,
    pub max_tree_entries: usize,
    pub max_key_symbols: usize,
    pub max_call_edges: usize,
}

impl RenderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prune_unexecuted: config.map.prune_unexecuted,
            max_tree_entries: config.map.max_tree_entries,
            max_key_symbols: config.map.max_key_symbols,
            max_call_edges: config.map.max_call_edges,
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMap {
    pub text: String,
    pub tokens: usize,
}

/// Estimate token count using tiktoken
pub fn estimate_tokens(text: &str) -> usize {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    match BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        // Fallback: rough estimate of 4 chars per token
        None => text.len() / 4,
    }
}

/// Top functions and classes by importance, or by importance blended
/// with relevance when a focus query is given
fn key_symbols(
    analysis: &Analysis,
    heat: &Heatmap,
    focus: Option<&str>,
    config: &Config,
) -> Vec<KeySymbol> {
    let scorer = focus
        .map(|q| RelevanceScorer::new(q, &config.relevance))
        .filter(|s| !s.is_empty());

    let max_importance = analysis.importance.iter().copied().fold(0.0f64, f64::max);
    let normalized = |id: SymbolId| {
        if max_importance > 0.0 {
            analysis.importance_of(id) / max_importance
        } else {
            0.0
        }
    };

    let ranked: Vec<(SymbolId, Option<f64>)> = match &scorer {
        Some(scorer) => {
            let relevance: HashMap<SymbolId, f64> = analysis
                .relevance(scorer)
                .into_iter()
                .map(|(id, score)| (id, score.total))
                .collect();
            let blend = config.relevance.importance_blend.clamp(0.0, 1.0);
            let mut scored: Vec<(SymbolId, f64, f64)> = analysis
                .ranked()
                .into_iter()
                .map(|id| {
                    let r = relevance.get(&id).copied().unwrap_or(0.0);
                    (id, r, (1.0 - blend) * r + blend * normalized(id))
                })
                .collect();
            // Symbols matching the query at all come first
            scored.sort_by(|a, b| {
                (b.1 > 0.0)
                    .cmp(&(a.1 > 0.0))
                    .then_with(|| b.2.total_cmp(&a.2))
                    .then_with(|| a.0.cmp(&b.0))
            });
            scored.into_iter().map(|(id, r, _)| (id, Some(r))).collect()
        }
        None => analysis.ranked().into_iter().map(|id| (id, None)).collect(),
    };

    ranked
        .into_iter()
        .take(config.map.max_key_symbols)
        .filter_map(|(id, relevance)| {
            let s = analysis.symbols.get(id)?;
            Some(KeySymbol {
                id,
                path: s.path.clone(),
                qualified_name: s.qualified_name.clone(),
                kind: s.kind,
                signature: s.signature.clone(),
                lines: s.lines,
                importance: analysis.importance_of(id),
                relevance,
                heat: heat.symbol_heat(id),
            })
        })
        .collect()
}

/// Module docstring's first line, else the file's first comment line,
/// else a count of what it defines
fn describe_module(analysis: &Analysis, path: &str) -> String {
    let docstring = analysis
        .symbols
        .module_of(path)
        .and_then(|id| analysis.symbols.get(id))
        .and_then(|m| m.docstring.as_deref())
        .map(first_line)
        .filter(|l| !l.is_empty());
    if let Some(doc) = docstring {
        return doc.to_string();
    }

    if let Some(comment) = fs::read_to_string(analysis.root.join(path))
        .ok()
        .and_then(|source| first_comment(&source))
    {
        return comment;
    }

    let symbols = analysis.symbols.in_file(path);
    let functions = symbols.iter().filter(|s| s.kind == SymbolKind::Function).count();
    let classes = symbols.iter().filter(|s| s.kind == SymbolKind::Class).count();
    if functions == 0 && classes == 0 {
        let lines = analysis.files.get(path).map(|r| r.line_count).unwrap_or(0);
        return format!("{lines} lines");
    }
    format!(
        "{functions} function{}, {classes} class{}",
        if functions == 1 { "" } else { "s" },
        if classes == 1 { "" } else { "es" }
    )
}

fn first_comment(source: &str) -> Option<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("#!"))
        .take_while(|l| l.starts_with('#') || l.starts_with("//"))
        .map(|l| l.trim_start_matches(['#', '/', '!']).trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_comment() {
        assert_eq!(
            first_comment("#!/usr/bin/env python\n# Entry point.\nimport os\n").as_deref(),
            Some("Entry point.")
        );
        assert_eq!(first_comment("import os\n# late comment\n"), None);
        assert_eq!(first_comment("//! Crate root\n").as_deref(), Some("Crate root"));
    }

    #[test]
    fn test_estimate_tokens_counts_something() {
        assert!(estimate_tokens("def foo():\n    return 1\n") > 0);
        assert_eq!(estimate_tokens(""), 0);
    }
}
