//! File discovery backends: fd, ripgrep, ignore crate.

use crate::error::StrataError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// File discovery backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDiscovery {
    Fd,
    Ripgrep,
    Ignore,
}

/// Cached detection result, avoids repeated process spawns.
static DETECTED_BACKEND: OnceLock<FileDiscovery> = OnceLock::new();

impl FileDiscovery {
    /// Detect the best available file discovery tool (cached after first call).
    pub fn detect() -> Self {
        *DETECTED_BACKEND.get_or_init(Self::probe)
    }

    fn probe() -> Self {
        if Command::new("fd").arg("--version").output().is_ok() {
            return Self::Fd;
        }
        if Command::new("rg").arg("--version").output().is_ok() {
            return Self::Ripgrep;
        }
        Self::Ignore
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fd => "fd",
            Self::Ripgrep => "ripgrep",
            Self::Ignore => "ignore-crate",
        }
    }
}

/// Enumerates repository files, respecting `.gitignore` and the
/// configured ignore patterns.
///
/// Whatever backend lists the candidates, the include glob and ignore set
/// are applied here on repo-relative paths, so every backend returns the
/// same set. Results are sorted and use `/` separators.
#[derive(Debug, Clone)]
pub struct FileWalker {
    root: PathBuf,
    ignore_patterns: Vec<String>,
    backend: FileDiscovery,
}

impl FileWalker {
    pub fn new(root: &Path, ignore_patterns: &[String]) -> Self {
        Self {
            root: root.to_path_buf(),
            ignore_patterns: ignore_patterns.to_vec(),
            backend: FileDiscovery::detect(),
        }
    }

    /// Force a specific discovery backend
    pub fn with_backend(mut self, backend: FileDiscovery) -> Self {
        self.backend = backend;
        self
    }

    pub fn backend(&self) -> FileDiscovery {
        self.backend
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Repo-relative paths of files matching `glob`.
    /// Uses fd > ripgrep > ignore crate (in order of preference).
    pub fn walk(&self, glob: &str) -> crate::Result<Vec<String>> {
        let include = build_include(glob)?;
        let ignore = self.ignore_set();

        let candidates = match self.backend {
            FileDiscovery::Fd => self.list_fd(),
            FileDiscovery::Ripgrep => self.list_rg(),
            FileDiscovery::Ignore => None,
        };
        let candidates = match candidates {
            Some(c) => c,
            None => self.list_ignore(),
        };

        let mut files: Vec<String> = candidates
            .into_iter()
            .filter(|rel| !ignore.is_match(rel) && include.is_match(rel))
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Candidates from fd; `None` means fall back to the ignore walk
    fn list_fd(&self) -> Option<Vec<String>> {
        let mut cmd = Command::new("fd");
        cmd.arg("--type").arg("f");
        cmd.arg("--hidden"); // Include hidden, let .gitignore handle it
        for pattern in &self.ignore_patterns {
            cmd.arg("--exclude").arg(pattern);
        }
        cmd.arg(".").arg(&self.root);
        self.run_listing(cmd)
    }

    fn list_rg(&self) -> Option<Vec<String>> {
        let mut cmd = Command::new("rg");
        cmd.arg("--files");
        cmd.arg("--hidden");
        for pattern in &self.ignore_patterns {
            cmd.arg("--glob").arg(format!("!{}", pattern));
            cmd.arg("--glob").arg(format!("!{}/**", pattern));
        }
        cmd.arg(&self.root);
        self.run_listing(cmd)
    }

    fn run_listing(&self, mut cmd: Command) -> Option<Vec<String>> {
        let output = cmd.output().ok()?;
        if !output.status.success() {
            tracing::debug!(
                backend = self.backend.name(),
                "file listing failed, falling back to ignore walk"
            );
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Some(
            stdout
                .lines()
                .filter(|line| !line.is_empty())
                .filter_map(|line| self.relative(Path::new(line)))
                .collect(),
        )
    }

    fn list_ignore(&self) -> Vec<String> {
        let mut builder = WalkBuilder::new(&self.root);
        builder.hidden(false);
        builder.git_ignore(true);
        builder.git_global(true);
        builder.git_exclude(true);

        builder
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|entry| self.relative(entry.path()))
            .collect()
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path.strip_prefix(".").unwrap_or(path)
        };
        let s = rel.to_string_lossy().replace('\\', "/");
        (!s.is_empty()).then_some(s)
    }

    /// Glob matcher for the custom ignore patterns
    fn ignore_set(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore_patterns {
            let glob_pattern = if pattern.contains('*') || pattern.contains('?') {
                if pattern.contains('/') {
                    pattern.clone()
                } else {
                    format!("**/{}", pattern)
                }
            } else {
                format!("**/{}", pattern)
            };
            if let Ok(g) = Glob::new(&glob_pattern) {
                builder.add(g);
            }
            if let Ok(g) = Glob::new(&format!("**/{}/**", pattern)) {
                builder.add(g);
            }
        }
        builder.build().unwrap_or_else(|_| GlobSet::empty())
    }
}

fn build_include(glob: &str) -> crate::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(glob).map_err(|e| StrataError::GlobPattern(e.to_string()))?);
    builder
        .build()
        .map_err(|e| StrataError::GlobPattern(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("src/nested/b.py"), "y = 2\n").unwrap();
        fs::write(dir.path().join("src/c.rs"), "fn c() {}\n").unwrap();
        fs::write(dir.path().join("node_modules/pkg/d.py"), "z = 3\n").unwrap();
        dir
    }

    #[test]
    fn test_walk_filters_by_glob_and_ignore() {
        let dir = repo();
        let walker = FileWalker::new(dir.path(), &["node_modules".to_string()])
            .with_backend(FileDiscovery::Ignore);
        let files = walker.walk("**/*.py").unwrap();
        assert_eq!(files, vec!["src/a.py", "src/nested/b.py"]);
    }

    #[test]
    fn test_detected_backend_agrees_with_ignore_walk() {
        let dir = repo();
        let ignore = vec!["node_modules".to_string()];
        let fallback = FileWalker::new(dir.path(), &ignore)
            .with_backend(FileDiscovery::Ignore)
            .walk("**/*")
            .unwrap();
        let detected = FileWalker::new(dir.path(), &ignore).walk("**/*").unwrap();
        assert_eq!(fallback, detected);
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let dir = repo();
        let walker = FileWalker::new(dir.path(), &[]);
        assert!(matches!(walker.walk("src/[a"), Err(StrataError::GlobPattern(_))));
    }
}
