//! Persisted compiler settings loaded from `~/.hamlet/config.json`.

use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::warn;

/// Folding applied to per-path costs in the Markov model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CostStrategy {
    Min,
    #[default]
    Max,
}

/// Aggregation applied to parallel path probabilities in the Markov model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbStrategy {
    Min,
    #[default]
    Max,
    Avg,
    Product,
}

/// Final selection applied to the surviving materialization candidates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GlobalStrategy {
    /// Keep only the candidate with the greatest benefit.
    #[default]
    GreatestBenefit,
    /// Keep only the candidate with the greatest re-execution probability.
    GreatestProb,
    /// Keep only the candidate maximizing benefit x probability.
    Product,
    /// Keep every candidate that passed the thresholds.
    AllAboveThreshold,
}

/// Persist mode for inserted `Cache` operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    None,
    #[default]
    MemoryOnly,
    MemoryAndDisk,
    DiskOnly,
}

impl CacheMode {
    /// Render the mode as the storage-level token used in emitted code.
    pub fn storage_level(&self) -> &'static str {
        match self {
            CacheMode::None => "NONE",
            CacheMode::MemoryOnly => "MEMORY_ONLY",
            CacheMode::MemoryAndDisk => "MEMORY_AND_DISK",
            CacheMode::DiskOnly => "DISK_ONLY",
        }
    }
}

/// Materialization tuning knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterializationSettings {
    /// Base directory for cached operator outputs and the catalogue.
    pub base_dir: PathBuf,
    /// Minimum benefit (milliseconds) a candidate must clear.
    pub min_benefit_ms: u64,
    /// Minimum re-execution probability a candidate must clear.
    pub prob_threshold: f64,
    /// Assumed sequential write throughput in MiB/s.
    pub write_throughput_mibs: u64,
    /// Assumed sequential read throughput in MiB/s.
    pub read_throughput_mibs: u64,
    pub cost_strategy: CostStrategy,
    pub prob_strategy: ProbStrategy,
    pub global_strategy: GlobalStrategy,
    /// Mode for `Cache` operators inserted behind new materialization points.
    pub cache_mode: CacheMode,
}

impl Default for MaterializationSettings {
    fn default() -> Self {
        Self {
            base_dir: hamlet_dir().join("materializations"),
            min_benefit_ms: 1_000,
            prob_threshold: 0.3,
            write_throughput_mibs: 100,
            read_throughput_mibs: 200,
            cost_strategy: CostStrategy::default(),
            prob_strategy: ProbStrategy::default(),
            global_strategy: GlobalStrategy::default(),
            cache_mode: CacheMode::default(),
        }
    }
}

/// Compiler settings persisted between runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Port the profiling collector binds to.
    pub collector_port: u16,
    /// Location of the persisted Markov model.
    pub profiling_file: PathBuf,
    /// Optional URL notified when a run finishes.
    pub webhook_url: Option<String>,
    /// Hard timeout (seconds) for the end-of-run notification webhook.
    pub webhook_timeout_secs: u64,
    pub materialization: MaterializationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            collector_port: 8080,
            profiling_file: hamlet_dir().join("profiling.json"),
            webhook_url: None,
            webhook_timeout_secs: 10,
            materialization: MaterializationSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `~/.hamlet/config.json`, falling back to defaults
    /// when the file is absent or unreadable.
    pub fn load() -> Self {
        Self::load_from(&hamlet_dir().join("config.json"))
    }

    /// Load settings from an explicit path, falling back to defaults.
    pub fn load_from(path: &std::path::Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings at {}: {}", path.display(), err);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist settings as pretty JSON with a trailing newline.
    pub fn save_to(&self, path: &std::path::Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        json.push('\n');
        fs::write(path, json)
    }
}

/// The per-user Hamlet state directory (`~/.hamlet`).
pub fn hamlet_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hamlet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.collector_port, 8080);
        assert!(s.materialization.prob_threshold > 0.0);
        assert_eq!(s.materialization.global_strategy, GlobalStrategy::GreatestBenefit);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut s = Settings::default();
        s.collector_port = 9999;
        s.materialization.prob_threshold = 0.9;
        s.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path);
        assert_eq!(loaded.collector_port, 9999);
        assert_eq!(loaded.materialization.prob_threshold, 0.9);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let loaded = Settings::load_from(&path);
        assert_eq!(loaded.collector_port, Settings::default().collector_port);
    }

    #[test]
    fn cache_mode_storage_levels() {
        assert_eq!(CacheMode::MemoryAndDisk.storage_level(), "MEMORY_AND_DISK");
    }
}
