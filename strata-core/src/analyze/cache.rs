//! Persistent analysis cache keyed by (path, content hash).

use crate::error::{AnalysisIssue, StrataError};
use crate::symbol::FileRecord;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const SCHEMA_VERSION: i32 = 1;

/// A cached parse result; the record carries its own hash, mtime and
/// grammar version.
pub type CacheEntry = FileRecord;

/// Content hash and grammar version of every cached path
pub type Manifest = HashMap<String, (String, u32)>;

/// Key-value store for per-file analysis results.
///
/// Only the analyzer's single-threaded merge phase writes to it.
pub trait AnalysisCache: Send {
    /// Entry for `path` if it was produced from content with `hash`.
    /// An `Err` means the stored entry is unusable.
    fn get(&self, path: &str, hash: &str) -> crate::Result<Option<CacheEntry>>;

    fn put(&mut self, entry: &CacheEntry) -> crate::Result<()>;

    fn invalidate(&mut self, path: &str) -> crate::Result<()>;

    fn paths(&self) -> crate::Result<Vec<String>>;

    /// Hash and grammar version per path, loaded in one pass so workers
    /// can skip unchanged files without touching the store.
    fn manifest(&self) -> crate::Result<Manifest>;
}

/// SQLite-backed cache at `.strata/cache.db`
pub struct SqliteCache {
    conn: Connection,
}

impl SqliteCache {
    pub fn open(path: &Path) -> crate::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open the cache at `path`, deleting and recreating the database when
    /// it is unreadable or was written under another schema version.
    pub fn open_or_rebuild(path: &Path) -> crate::Result<Self> {
        match Self::open(path) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                AnalysisIssue::CacheCorruption {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
                .log();
                for suffix in ["", "-wal", "-shm"] {
                    let mut file = path.as_os_str().to_owned();
                    file.push(suffix);
                    match std::fs::remove_file(&file) {
                        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                            return Err(err.into())
                        }
                        _ => {}
                    }
                }
                Self::open(path)
            }
        }
    }

    pub fn in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        // Other schema versions are rejected; open_or_rebuild starts over
        if version != 0 && version != SCHEMA_VERSION {
            return Err(StrataError::SchemaVersionMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS entries (
                    path TEXT PRIMARY KEY,
                    content_hash TEXT NOT NULL,
                    mtime INTEGER NOT NULL,
                    grammar_version INTEGER NOT NULL,
                    analyzed_at INTEGER NOT NULL,
                    payload TEXT NOT NULL
                );
                ",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }
}

impl AnalysisCache for SqliteCache {
    fn get(&self, path: &str, hash: &str) -> crate::Result<Option<CacheEntry>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM entries WHERE path = ? AND content_hash = ?",
                params![path, hash],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, entry: &CacheEntry) -> crate::Result<()> {
        let payload = serde_json::to_string(entry)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.conn.execute(
            "INSERT OR REPLACE INTO entries
                 (path, content_hash, mtime, grammar_version, analyzed_at, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.path,
                entry.content_hash,
                entry.mtime,
                entry.grammar_version,
                now,
                payload
            ],
        )?;
        Ok(())
    }

    fn invalidate(&mut self, path: &str) -> crate::Result<()> {
        self.conn
            .execute("DELETE FROM entries WHERE path = ?", params![path])?;
        Ok(())
    }

    fn paths(&self) -> crate::Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM entries ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    fn manifest(&self) -> crate::Result<Manifest> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, content_hash, grammar_version FROM entries")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, u32>(2)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (path, hash, version) = row?;
            map.insert(path, (hash, version));
        }
        Ok(map)
    }
}

/// Process-local cache, for tests and `--no-cache` runs
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnalysisCache for MemoryCache {
    fn get(&self, path: &str, hash: &str) -> crate::Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(path)
            .filter(|e| e.content_hash == hash)
            .cloned())
    }

    fn put(&mut self, entry: &CacheEntry) -> crate::Result<()> {
        self.entries.insert(entry.path.clone(), entry.clone());
        Ok(())
    }

    fn invalidate(&mut self, path: &str) -> crate::Result<()> {
        self.entries.remove(path);
        Ok(())
    }

    fn paths(&self) -> crate::Result<Vec<String>> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    fn manifest(&self) -> crate::Result<Manifest> {
        Ok(self
            .entries
            .iter()
            .map(|(path, e)| (path.clone(), (e.content_hash.clone(), e.grammar_version)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::content_hash;

    fn record(path: &str, source: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            content_hash: content_hash(source),
            mtime: 1,
            size: source.len() as u64,
            line_count: 1,
            language: "python".to_string(),
            grammar_version: 1,
            symbols: vec![],
            references: vec![],
            imports: vec![],
            diagnostics: vec![],
        }
    }

    fn exercise(cache: &mut dyn AnalysisCache) {
        let a = record("a.py", "x = 1");
        cache.put(&a).unwrap();
        assert_eq!(cache.get("a.py", &a.content_hash).unwrap(), Some(a.clone()));
        assert_eq!(cache.get("a.py", &content_hash("x = 2")).unwrap(), None);

        let manifest = cache.manifest().unwrap();
        assert_eq!(manifest.get("a.py"), Some(&(a.content_hash.clone(), 1)));

        let a2 = record("a.py", "x = 2");
        cache.put(&a2).unwrap();
        assert_eq!(cache.get("a.py", &a.content_hash).unwrap(), None);
        assert_eq!(cache.paths().unwrap(), vec!["a.py"]);

        cache.invalidate("a.py").unwrap();
        assert!(cache.paths().unwrap().is_empty());
    }

    #[test]
    fn test_memory_cache() {
        exercise(&mut MemoryCache::new());
    }

    #[test]
    fn test_sqlite_cache() {
        exercise(&mut SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_cache_persists_across_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join(".strata").join("cache.db");
        let a = record("a.py", "x = 1");
        {
            let mut cache = SqliteCache::open(&db).unwrap();
            cache.put(&a).unwrap();
        }
        let cache = SqliteCache::open(&db).unwrap();
        assert_eq!(cache.get("a.py", &a.content_hash).unwrap(), Some(a));
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let mut cache = SqliteCache::in_memory().unwrap();
        let a = record("a.py", "x = 1");
        cache.put(&a).unwrap();
        cache
            .conn
            .execute("UPDATE entries SET payload = 'not json'", [])
            .unwrap();
        assert!(cache.get("a.py", &a.content_hash).is_err());
    }

    #[test]
    fn test_schema_mismatch_fails_fast() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("cache.db");
        {
            let conn = Connection::open(&db).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(matches!(
            SqliteCache::open(&db),
            Err(StrataError::SchemaVersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn test_schema_mismatch_is_rebuilt() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("cache.db");
        {
            let conn = Connection::open(&db).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        let mut cache = SqliteCache::open_or_rebuild(&db).unwrap();
        assert!(cache.paths().unwrap().is_empty());
        let a = record("a.py", "x = 1");
        cache.put(&a).unwrap();
        drop(cache);

        let cache = SqliteCache::open(&db).unwrap();
        assert_eq!(cache.get("a.py", &a.content_hash).unwrap(), Some(a));
    }

    #[test]
    fn test_garbage_database_is_rebuilt() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("cache.db");
        std::fs::write(&db, vec![b'x'; 4096]).unwrap();
        assert!(SqliteCache::open(&db).is_err());

        let mut cache = SqliteCache::open_or_rebuild(&db).unwrap();
        exercise(&mut cache);
    }
}
