//! ripgrep process management and the `ripgrep` search backend.

use super::{ContentMatch, ContentQuery, SearchBackend};
use crate::error::StrataError;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, OnceLock};

/// Environment variable naming an explicit ripgrep binary
pub const RG_PATH_ENV: &str = "STRATA_RG_PATH";

/// Locates the ripgrep binary and bounds how many rg processes run at once.
///
/// Process slots are `()` tokens in a bounded channel: taking a slot is a
/// `recv`, giving it back is a `send`.
pub struct RipgrepManager {
    candidates: Vec<PathBuf>,
    located: OnceLock<Option<PathBuf>>,
    slots_tx: Sender<()>,
    slots_rx: Receiver<()>,
}

/// Held while an rg process runs; returns its slot on drop
struct Permit<'a> {
    manager: &'a RipgrepManager,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.manager.slots_tx.try_send(()).is_err() {
            tracing::warn!("ripgrep process slot could not be returned");
        }
    }
}

impl RipgrepManager {
    /// Candidates in order: configured path, `STRATA_RG_PATH`, `rg` on
    /// `PATH`, then the per-platform tool directory.
    pub fn new(configured: Option<PathBuf>, max_processes: usize) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(p) = configured {
            candidates.push(p);
        }
        if let Some(p) = std::env::var_os(RG_PATH_ENV) {
            candidates.push(PathBuf::from(p));
        }
        candidates.push(PathBuf::from(binary_name()));
        if let Some(dir) = tool_dir() {
            candidates.push(dir.join(binary_name()));
        }
        Self::with_candidates(candidates, max_processes)
    }

    /// Probe exactly `candidates`, in order
    pub fn with_candidates(candidates: Vec<PathBuf>, max_processes: usize) -> Self {
        let slots = max_processes.max(1);
        let (slots_tx, slots_rx) = bounded(slots);
        for _ in 0..slots {
            if slots_tx.try_send(()).is_err() {
                break;
            }
        }
        Self {
            candidates,
            located: OnceLock::new(),
            slots_tx,
            slots_rx,
        }
    }

    /// Path of a working rg binary, probed once and cached
    pub fn locate(&self) -> Option<&Path> {
        self.located.get_or_init(|| self.probe()).as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.locate().is_some()
    }

    fn probe(&self) -> Option<PathBuf> {
        let found = self.candidates.iter().find(|c| runs(c)).cloned();
        match &found {
            Some(p) => tracing::debug!(path = %p.display(), "located ripgrep"),
            None => tracing::debug!("ripgrep not found"),
        }
        found
    }

    /// Install a ripgrep binary into the per-platform tool directory so
    /// later probes find it.
    pub fn provision(source: &Path) -> crate::Result<PathBuf> {
        let dir = tool_dir().ok_or_else(|| StrataError::SearchBackend {
            backend: "ripgrep".to_string(),
            message: "no home directory for the tool cache".to_string(),
        })?;
        std::fs::create_dir_all(&dir)?;
        let dest = dir.join(binary_name());
        std::fs::copy(source, &dest)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(dest)
    }

    /// Block until a process slot is free
    fn acquire(&self) -> crate::Result<Permit<'_>> {
        self.slots_rx.recv().map_err(|_| StrataError::SearchBackend {
            backend: "ripgrep".to_string(),
            message: "process pool closed".to_string(),
        })?;
        Ok(Permit { manager: self })
    }

    /// Run rg with `args` in `cwd`, waiting for a free process slot
    pub fn run(&self, cwd: &Path, args: &[String]) -> crate::Result<Output> {
        let binary = self.locate().ok_or_else(|| StrataError::SearchBackend {
            backend: "ripgrep".to_string(),
            message: "ripgrep binary not found".to_string(),
        })?;
        let _permit = self.acquire()?;
        let output = Command::new(binary).args(args).current_dir(cwd).output()?;
        Ok(output)
    }
}

/// `~/.strata/bin/<os>-<arch>`
pub fn tool_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
    Some(
        PathBuf::from(home)
            .join(crate::config::STRATA_DIR)
            .join("bin")
            .join(format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)),
    )
}

fn binary_name() -> &'static str {
    if cfg!(windows) {
        "rg.exe"
    } else {
        "rg"
    }
}

fn runs(candidate: &Path) -> bool {
    Command::new(candidate)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[derive(Deserialize)]
struct RgLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct RgText {
    text: Option<String>,
}

#[derive(Deserialize)]
struct RgSubmatch {
    start: usize,
}

#[derive(Deserialize)]
struct RgMatch {
    path: RgText,
    lines: RgText,
    line_number: Option<usize>,
    #[serde(default)]
    submatches: Vec<RgSubmatch>,
}

/// Content search through an external `rg --json` process
pub struct RipgrepBackend {
    manager: Arc<RipgrepManager>,
    ignore_patterns: Vec<String>,
}

impl RipgrepBackend {
    pub fn new(manager: Arc<RipgrepManager>, ignore_patterns: Vec<String>) -> Self {
        Self {
            manager,
            ignore_patterns,
        }
    }

    fn args(&self, query: &ContentQuery) -> Vec<String> {
        let mut args = vec!["--json".to_string(), "--hidden".to_string()];
        if query.literal {
            args.push("--fixed-strings".to_string());
        }
        if query.case_insensitive {
            args.push("--ignore-case".to_string());
        }
        if let Some(scope) = &query.scope {
            args.push("--glob".to_string());
            args.push(scope.clone());
        }
        for pattern in &self.ignore_patterns {
            args.push("--glob".to_string());
            args.push(format!("!{}", pattern));
            args.push("--glob".to_string());
            args.push(format!("!{}/**", pattern));
        }
        args.push("--regexp".to_string());
        args.push(query.pattern.clone());
        args.push(".".to_string());
        args
    }
}

impl SearchBackend for RipgrepBackend {
    fn name(&self) -> &str {
        "ripgrep"
    }

    fn is_available(&self) -> bool {
        self.manager.is_available()
    }

    fn search(&self, root: &Path, query: &ContentQuery) -> crate::Result<Vec<ContentMatch>> {
        let output = self.manager.run(root, &self.args(query))?;
        // Exit code 1 means "no matches"; 2 is a real error
        if output.status.code() == Some(2) {
            return Err(StrataError::SearchBackend {
                backend: "ripgrep".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_json_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract matches from `rg --json` output, skipping non-UTF-8 paths
fn parse_json_output(stdout: &str) -> Vec<ContentMatch> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<RgLine>(line).ok())
        .filter(|msg| msg.kind == "match")
        .filter_map(|msg| serde_json::from_value::<RgMatch>(msg.data).ok())
        .filter_map(|m| {
            let path = m.path.text?;
            let path = path.strip_prefix("./").unwrap_or(&path).replace('\\', "/");
            Some(ContentMatch {
                path,
                line: m.line_number.unwrap_or(0),
                column: m.submatches.first().map(|s| s.start + 1).unwrap_or(1),
                text: m.lines.text.unwrap_or_default().trim_end_matches(['\r', '\n']).to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_output() {
        let out = r#"{"type":"begin","data":{"path":{"text":"./src/a.py"}}}
{"type":"match","data":{"path":{"text":"./src/a.py"},"lines":{"text":"def foo():\n"},"line_number":3,"absolute_offset":10,"submatches":[{"match":{"text":"foo"},"start":4,"end":7}]}}
{"type":"end","data":{"path":{"text":"./src/a.py"}}}
{"type":"summary","data":{}}
"#;
        let matches = parse_json_output(out);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/a.py");
        assert_eq!(matches[0].line, 3);
        assert_eq!(matches[0].column, 5);
        assert_eq!(matches[0].text, "def foo():");
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let manager = RipgrepManager::with_candidates(vec![PathBuf::from("/nonexistent/rg")], 2);
        assert_eq!(manager.locate(), None);
        assert!(!manager.is_available());
        assert!(manager.run(Path::new("."), &[]).is_err());
    }

    #[test]
    fn test_configured_path_is_probed_first() {
        let manager = RipgrepManager::new(Some(PathBuf::from("/nonexistent/rg")), 1);
        assert_eq!(manager.candidates[0], PathBuf::from("/nonexistent/rg"));
        assert_ne!(manager.locate(), Some(Path::new("/nonexistent/rg")));
    }

    #[test]
    fn test_engine_degrades_to_scan_without_rg() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        let mut engine = crate::search::SearchEngine::new(dir.path(), &crate::Config::default());
        let missing = RipgrepManager::with_candidates(vec![PathBuf::from("/nonexistent/rg")], 1);
        engine.register_backend(Arc::new(RipgrepBackend::new(Arc::new(missing), vec![])));

        let outcome = engine.search_content(&ContentQuery::literal("foo")).unwrap();
        assert_eq!(outcome.backend, "scan");
        assert!(matches!(
            outcome.degraded,
            Some(crate::error::AnalysisIssue::BackendUnavailable { ref backend, .. }) if backend == "ripgrep"
        ));
        assert_eq!(outcome.matches.len(), 1);
    }

    #[test]
    fn test_permits_are_returned() {
        let manager = RipgrepManager::with_candidates(vec![], 1);
        {
            let _a = manager.acquire().unwrap();
            assert!(manager.slots_rx.is_empty());
        }
        assert_eq!(manager.slots_rx.len(), 1);
        let _b = manager.acquire().unwrap();
    }

    #[test]
    fn test_waiters_get_the_released_permit() {
        let manager = Arc::new(RipgrepManager::with_candidates(vec![], 1));
        let held = manager.acquire().unwrap();
        let waiter = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.acquire().map(|_| ()).is_ok())
        };
        drop(held);
        assert!(waiter.join().unwrap());
        assert_eq!(manager.slots_rx.len(), 1);
    }
}
