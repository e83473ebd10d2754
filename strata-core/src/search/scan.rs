//! In-process content search over the discovered file set.

use super::discovery::FileWalker;
use super::{ContentMatch, ContentQuery, SearchBackend};
use rayon::prelude::*;
use std::path::Path;

/// Bytes inspected when deciding whether a file is binary
const BINARY_SNIFF_LEN: usize = 8192;

/// Regex scan backend; always available
pub struct ScanBackend {
    ignore_patterns: Vec<String>,
}

impl ScanBackend {
    pub fn new(ignore_patterns: Vec<String>) -> Self {
        Self { ignore_patterns }
    }
}

impl SearchBackend for ScanBackend {
    fn name(&self) -> &str {
        "scan"
    }

    fn search(&self, root: &Path, query: &ContentQuery) -> crate::Result<Vec<ContentMatch>> {
        let regex = query.compile()?;
        let glob = query.scope.as_deref().unwrap_or("**/*");
        let files = FileWalker::new(root, &self.ignore_patterns).walk(glob)?;

        let matches: Vec<ContentMatch> = files
            .par_iter()
            .flat_map_iter(|rel| {
                let content = read_text(&root.join(rel));
                let mut found = Vec::new();
                if let Some(content) = content {
                    for (idx, line) in content.lines().enumerate() {
                        if let Some(m) = regex.find(line) {
                            found.push(ContentMatch {
                                path: rel.clone(),
                                line: idx + 1,
                                column: m.start() + 1,
                                text: line.trim_end_matches('\r').to_string(),
                            });
                        }
                    }
                }
                found
            })
            .collect();
        Ok(matches)
    }
}

/// UTF-8 text of a file, or `None` for unreadable or binary files
fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_finds_matches_and_skips_binary() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def foo():\n    return foo_helper()\n").unwrap();
        fs::write(dir.path().join("blob.bin"), b"foo\0\0\0").unwrap();

        let backend = ScanBackend::new(vec![]);
        let mut matches = backend
            .search(dir.path(), &ContentQuery::literal("foo"))
            .unwrap();
        matches.sort();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].path, "a.py");
        assert_eq!(matches[0].line, 1);
        assert_eq!(matches[0].column, 5);
        assert_eq!(matches[1].line, 2);
    }

    #[test]
    fn test_scan_respects_scope() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "needle\n").unwrap();
        fs::write(dir.path().join("b.rs"), "needle\n").unwrap();

        let backend = ScanBackend::new(vec![]);
        let mut query = ContentQuery::regex("nee+dle");
        query.scope = Some("**/*.rs".to_string());
        let matches = backend.search(dir.path(), &query).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "b.rs");
    }
}
