//! Configuration for strata

use crate::StrataError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under the analyzed root that holds config, cache and snapshots
pub const STRATA_DIR: &str = ".strata";

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Strata Configuration

[indexing]
# Files considered for analysis
default_glob = "**/*.{py,pyi,rs,js,jsx,mjs,cjs,ts,tsx,go}"
# Parser worker threads (0 = one per CPU)
workers = 0
# Batches with at most this many files are parsed on the calling thread
sequential_threshold = 64

[ignore]
# Additional patterns to ignore (beyond .gitignore)
patterns = [
    ".git",
    ".strata",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
    "*.min.js",
]

[ranking]
# Probability of following a call edge on each step of the random walk
damping = 0.85
# Convergence threshold on the total weight delta between iterations
epsilon = 0.000001
max_iterations = 100
# Isolated symbols keep at least floor_fraction / symbol_count
floor_fraction = 0.5

[relevance]
# Weights of the four match dimensions
content = 0.2
signature = 0.25
docstring = 0.15
name = 0.4
# Share of relevance vs importance when a focus query ranks key symbols
importance_blend = 0.5

[map]
max_key_symbols = 30
max_tree_entries = 400
max_call_edges = 200
# Collapse files and symbols with no observed execution
prune_unexecuted = true

[coder]
# Default similarity threshold for fuzzy matching (0.0 - 1.0)
similarity_threshold = 0.8
fuzzy = true
# Files longer than this skip the similarity scan
max_fuzzy_lines = 20000
snapshot_dir = ".strata/snapshots"

[search]
max_results = 200
# auto | ripgrep | scan
backend = "auto"
# Concurrent ripgrep processes
max_processes = 4
# ripgrep_path = "/usr/local/bin/rg"
"#;

/// Strata configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub relevance: RelevanceWeights,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub coder: CoderConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_glob")]
    pub default_glob: String,
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_sequential_threshold")]
    pub sequential_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default = "default_ignore_patterns")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_damping")]
    pub damping: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_floor_fraction")]
    pub floor_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceWeights {
    #[serde(default = "default_content_weight")]
    pub content: f64,
    #[serde(default = "default_signature_weight")]
    pub signature: f64,
    #[serde(default = "default_docstring_weight")]
    pub docstring: f64,
    #[serde(default = "default_name_weight")]
    pub name: f64,
    #[serde(default = "default_importance_blend")]
    pub importance_blend: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_max_key_symbols")]
    pub max_key_symbols: usize,
    #[serde(default = "default_max_tree_entries")]
    pub max_tree_entries: usize,
    #[serde(default = "default_max_call_edges")]
    pub max_call_edges: usize,
    #[serde(default = "default_true")]
    pub prune_unexecuted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_true")]
    pub fuzzy: bool,
    #[serde(default = "default_max_fuzzy_lines")]
    pub max_fuzzy_lines: usize,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
}

/// Which content-search backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    Auto,
    Ripgrep,
    Scan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_backend")]
    pub backend: BackendPreference,
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,
    #[serde(default)]
    pub ripgrep_path: Option<PathBuf>,
}

// Default value functions
fn default_glob() -> String {
    "**/*.{py,pyi,rs,js,jsx,mjs,cjs,ts,tsx,go}".to_string()
}
fn default_sequential_threshold() -> usize {
    64
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git".to_string(),
        ".strata".to_string(),
        "node_modules".to_string(),
        "target".to_string(),
        "__pycache__".to_string(),
        ".venv".to_string(),
    ]
}
fn default_damping() -> f64 {
    0.85
}
fn default_epsilon() -> f64 {
    1e-6
}
fn default_max_iterations() -> usize {
    100
}
fn default_floor_fraction() -> f64 {
    0.5
}
fn default_content_weight() -> f64 {
    0.2
}
fn default_signature_weight() -> f64 {
    0.25
}
fn default_docstring_weight() -> f64 {
    0.15
}
fn default_name_weight() -> f64 {
    0.4
}
fn default_importance_blend() -> f64 {
    0.5
}
fn default_max_key_symbols() -> usize {
    30
}
fn default_max_tree_entries() -> usize {
    400
}
fn default_max_call_edges() -> usize {
    200
}
fn default_true() -> bool {
    true
}
fn default_similarity_threshold() -> f64 {
    0.8
}
fn default_max_fuzzy_lines() -> usize {
    20_000
}
fn default_snapshot_dir() -> String {
    ".strata/snapshots".to_string()
}
fn default_max_results() -> usize {
    200
}
fn default_backend() -> BackendPreference {
    BackendPreference::Auto
}
fn default_max_processes() -> usize {
    4
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            default_glob: default_glob(),
            workers: 0,
            sequential_threshold: default_sequential_threshold(),
        }
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: default_ignore_patterns(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            epsilon: default_epsilon(),
            max_iterations: default_max_iterations(),
            floor_fraction: default_floor_fraction(),
        }
    }
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            content: default_content_weight(),
            signature: default_signature_weight(),
            docstring: default_docstring_weight(),
            name: default_name_weight(),
            importance_blend: default_importance_blend(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_key_symbols: default_max_key_symbols(),
            max_tree_entries: default_max_tree_entries(),
            max_call_edges: default_max_call_edges(),
            prune_unexecuted: true,
        }
    }
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            fuzzy: true,
            max_fuzzy_lines: default_max_fuzzy_lines(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            backend: default_backend(),
            max_processes: default_max_processes(),
            ripgrep_path: None,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `<root>/.strata/config.toml`, falling back to defaults when absent
    pub fn load_or_default(root: &Path) -> crate::Result<Self> {
        let path = root.join(STRATA_DIR).join("config.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| StrataError::ConfigParse(e.to_string()))
    }

    /// Write the documented default config under `root`
    pub fn init(root: &Path) -> crate::Result<PathBuf> {
        let dir = root.join(STRATA_DIR);
        let path = dir.join("config.toml");
        if path.exists() {
            return Err(StrataError::ConfigExists(path));
        }
        std::fs::create_dir_all(&dir)?;
        std::fs::write(&path, DEFAULT_CONFIG)?;
        Ok(path)
    }

    /// Get the default glob pattern
    pub fn default_glob(&self) -> &str {
        &self.indexing.default_glob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.ranking.max_iterations, 100);
        assert_eq!(config.coder.similarity_threshold, 0.8);
        assert_eq!(config.search.backend, BackendPreference::Auto);
        assert!(config.ignore.patterns.iter().any(|p| p == ".strata"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_toml("[ranking]\ndamping = 0.5\n").unwrap();
        assert_eq!(config.ranking.damping, 0.5);
        assert_eq!(config.ranking.max_iterations, 100);
        assert_eq!(config.map.max_key_symbols, 30);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let err = Config::from_toml("[ranking\n").unwrap_err();
        assert!(matches!(err, StrataError::ConfigParse(_)));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = Config::init(dir.path()).unwrap();
        assert!(path.exists());
        assert!(matches!(
            Config::init(dir.path()),
            Err(StrataError::ConfigExists(_))
        ));
    }
}
