//! Pre-patch snapshots: zip archives of a target directory.

use crate::config::STRATA_DIR;
use crate::error::StrataError;
use ignore::WalkBuilder;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Archive every file under `target_dir` into
/// `<target_dir>/<snapshot_dir>/snapshot-<UTC timestamp>.zip`.
///
/// The walk ignores no files except the snapshot directory itself and
/// the `.strata` state directory at the top of the target (its cache
/// database is held open while patches run).
pub fn generate_snapshot(target_dir: &Path, snapshot_dir: &str) -> crate::Result<PathBuf> {
    if !target_dir.is_dir() {
        return Err(StrataError::FileNotFound(target_dir.to_path_buf()));
    }
    let out_dir = target_dir.join(snapshot_dir);
    fs::create_dir_all(&out_dir)?;
    let archive_path = unique_archive_path(&out_dir)?;

    let skip = [out_dir.canonicalize()?, target_dir.join(STRATA_DIR)];
    let mut files: Vec<PathBuf> = WalkBuilder::new(target_dir)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .filter_entry(move |entry| {
            entry.depth() == 0
                || !(entry.path() == skip[1]
                    || entry.path().canonicalize().is_ok_and(|p| p == skip[0]))
        })
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    let mut zip = ZipWriter::new(File::create(&archive_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for path in &files {
        let Ok(rel) = path.strip_prefix(target_dir) else {
            continue;
        };
        let name = rel.to_string_lossy().replace('\\', "/");
        let options = with_permissions(options, path);
        zip.start_file(name, options)?;
        let mut source = File::open(path)?;
        io::copy(&mut source, &mut zip)?;
    }
    zip.finish()?.flush()?;

    tracing::info!(
        archive = %archive_path.display(),
        files = files.len(),
        "snapshot written"
    );
    Ok(archive_path)
}

/// Extract `archive` over `target_dir`, returning the number of files
/// restored. Files created after the snapshot are left alone.
pub fn restore_snapshot(archive: &Path, target_dir: &Path) -> crate::Result<usize> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut restored = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!(name = entry.name(), "skipping archive entry outside the target");
            continue;
        };
        let dest = target_dir.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
        }
        restored += 1;
    }
    tracing::info!(archive = %archive.display(), restored, "snapshot restored");
    Ok(restored)
}

fn unique_archive_path(out_dir: &Path) -> crate::Result<PathBuf> {
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]Z"
        ))
        .map_err(|e| StrataError::Io(io::Error::other(e.to_string())))?;
    let mut path = out_dir.join(format!("snapshot-{stamp}.zip"));
    let mut n = 1;
    while path.exists() {
        path = out_dir.join(format!("snapshot-{stamp}-{n}.zip"));
        n += 1;
    }
    Ok(path)
}

#[cfg(unix)]
fn with_permissions(options: SimpleFileOptions, path: &Path) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(path) {
        Ok(meta) => options.unix_permissions(meta.permissions().mode()),
        Err(_) => options,
    }
}

#[cfg(not(unix))]
fn with_permissions(options: SimpleFileOptions, _path: &Path) -> SimpleFileOptions {
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_and_restore() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("pkg/b.py"), "y = 2\n").unwrap();
        fs::write(dir.path().join(".hidden"), "h\n").unwrap();
        fs::create_dir_all(dir.path().join(".strata")).unwrap();
        fs::write(dir.path().join(".strata/cache.db"), "db").unwrap();

        let archive = generate_snapshot(dir.path(), ".strata/snapshots").unwrap();
        assert!(archive.starts_with(dir.path().join(".strata/snapshots")));
        assert!(archive
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("snapshot-"));

        let names: Vec<String> = {
            let zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
            let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
            names.sort();
            names
        };
        assert_eq!(names, vec![".hidden", "a.py", "pkg/b.py"]);

        fs::write(dir.path().join("a.py"), "x = 99\n").unwrap();
        fs::remove_file(dir.path().join("pkg/b.py")).unwrap();
        assert_eq!(restore_snapshot(&archive, dir.path()).unwrap(), 3);
        assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), "x = 1\n");
        assert_eq!(fs::read_to_string(dir.path().join("pkg/b.py")).unwrap(), "y = 2\n");
    }

    #[test]
    fn test_second_snapshot_excludes_first() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let first = generate_snapshot(dir.path(), ".strata/snapshots").unwrap();
        let second = generate_snapshot(dir.path(), ".strata/snapshots").unwrap();
        assert_ne!(first, second);
        let zip = ZipArchive::new(File::open(&second).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
    }

    #[test]
    fn test_missing_target() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            generate_snapshot(&dir.path().join("nope"), ".strata/snapshots"),
            Err(StrataError::FileNotFound(_))
        ));
    }
}
