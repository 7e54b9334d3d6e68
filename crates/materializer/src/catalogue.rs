//! Persistent catalogue of materialized operator outputs.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use common::FileService;

use crate::error::CacheError;

/// One cached artifact: the producing operator's lineage signature, the
/// on-disk location, and the creation time in epoch milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry {
    pub lineage: String,
    pub uri: PathBuf,
    pub created_at: u64,
}

/// The JSON-backed mapping `lineage signature -> artifact URI`, stored as
/// `catalogue.json` under the materialization base directory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CacheCatalogue {
    entries: Vec<CatalogueEntry>,
}

impl CacheCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    fn file_path(base_dir: &Path) -> PathBuf {
        base_dir.join("catalogue.json")
    }

    /// Load the catalogue under `base_dir`; absent or unreadable files yield
    /// an empty catalogue (a cache problem never aborts compilation).
    pub fn load(base_dir: &Path) -> Self {
        let path = Self::file_path(base_dir);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                warn!("ignoring corrupt catalogue at {}: {}", path.display(), err);
                Self::new()
            }),
            Err(_) => Self::new(),
        }
    }

    /// Persist as pretty JSON with a trailing newline.
    pub fn save(&self, base_dir: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(base_dir)?;
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        fs::write(Self::file_path(base_dir), json)?;
        Ok(())
    }

    pub fn lookup(&self, lineage: &str) -> Option<&CatalogueEntry> {
        self.entries.iter().find(|e| e.lineage == lineage)
    }

    pub fn contains(&self, lineage: &str) -> bool {
        self.lookup(lineage).is_some()
    }

    /// Insert or overwrite the entry for `lineage`.
    pub fn insert(&mut self, lineage: &str, uri: &Path, created_at: u64) {
        self.entries.retain(|e| e.lineage != lineage);
        self.entries.push(CatalogueEntry {
            lineage: lineage.to_string(),
            uri: uri.to_path_buf(),
            created_at,
        });
    }

    pub fn remove(&mut self, lineage: &str) {
        self.entries.retain(|e| e.lineage != lineage);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose backing artifact no longer exists.
    pub fn prune(&mut self, fs: &dyn FileService) {
        self.entries.retain(|entry| {
            let alive = fs.exists(&entry.uri);
            if !alive {
                warn!(
                    "dropping catalogue entry {} (artifact {} is gone)",
                    entry.lineage,
                    entry.uri.display()
                );
            }
            alive
        });
    }
}
