//! Filesystem service used for lineage stability and cache hygiene.
//!
//! `Load` lineage embeds the input file's modification time so that edits
//! invalidate cached materializations; the cache catalogue uses `exists` and
//! `delete` to drop entries whose backing artifacts are gone.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Minimal filesystem contract the compiler depends on.
pub trait FileService {
    /// Modification time of `path` in milliseconds since the epoch.
    fn last_modified(&self, path: &Path) -> io::Result<i64>;

    /// Returns true if `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Remove `path` (file or directory tree).
    fn delete(&self, path: &Path) -> io::Result<()>;
}

/// Local-disk implementation of [`FileService`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileService;

impl FileService for LocalFileService {
    fn last_modified(&self, path: &Path) -> io::Result<i64> {
        let modified = fs::metadata(path)?.modified()?;
        let since_epoch = modified
            .duration_since(UNIX_EPOCH)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(since_epoch.as_millis() as i64)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_modified_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();

        let svc = LocalFileService;
        assert!(svc.exists(&file));
        assert!(svc.last_modified(&file).unwrap() > 0);

        svc.delete(&file).unwrap();
        assert!(!svc.exists(&file));
        assert!(svc.last_modified(&file).is_err());
    }
}
