//! Command line argument parsing for Hamlet tools.

use clap::{ArgAction, Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// Target backend for code emission and job submission.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum, Default)]
pub enum BackendKind {
    /// Batch dataflow backend (RDD-style operator chains).
    #[default]
    Spark,
    /// Streaming dataflow backend (windowed stream operators).
    Flinks,
}

impl BackendKind {
    /// Backend name as used in template lookups and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Spark => "spark",
            BackendKind::Flinks => "flinks",
        }
    }

    /// Returns true if this backend executes plans as unbounded streams.
    pub fn is_streaming(&self) -> bool {
        matches!(self, BackendKind::Flinks)
    }
}

/// Command line arguments for the Hamlet compiler
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Serialized dataflow scripts (JSON operator lists from the parser)
    #[arg(value_name = "SCRIPT", required = true)]
    pub scripts: Vec<String>,

    /// Choose the target backend
    #[arg(short = 'b', long, value_enum, default_value = "spark", value_name = "BACKEND")]
    pub backend: BackendKind,

    /// Master specification handed to the backend runner (e.g. local[4])
    #[arg(short = 'm', long, default_value = "local", value_name = "MASTER")]
    pub master: String,

    /// Enable profiling and report to the collector at <URL>
    #[arg(long, value_name = "URL")]
    pub profiling: Option<String>,

    /// Stop after emitting the artifact, do not submit the job
    #[arg(long, action = ArgAction::SetTrue)]
    pub compile_only: bool,

    /// Compile multiple scripts one after another instead of as one merged plan
    #[arg(long, action = ArgAction::SetTrue)]
    pub sequential: bool,

    /// Print the final dataflow plan before emission
    #[arg(long, action = ArgAction::SetTrue)]
    pub show_plan: bool,

    /// Suppress backend runner output on stdout
    #[arg(long, action = ArgAction::SetTrue)]
    pub mute_consumer: bool,

    /// Parameter substitutions applied to the script (repeatable)
    #[arg(long = "params", value_name = "K=V")]
    pub params: Vec<String>,

    /// Directory for the emitted artifact
    #[arg(short = 'o', long, value_name = "DIR")]
    pub outdir: Option<String>,
}

impl Args {
    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    /// Name derived from a script path, used for the emitted object.
    pub fn script_name(script: &str) -> String {
        Path::new(script)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown_script".into())
    }

    pub fn outdir(&self) -> PathBuf {
        self.outdir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn profiling_enabled(&self) -> bool {
        self.profiling.is_some()
    }

    /// Parse `--params k=v` pairs into (key, value) tuples, ignoring malformed entries.
    pub fn param_map(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|kv| {
                kv.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let args = Args::parse_from(["hamlet", "script.json"]);
        assert_eq!(args.backend, BackendKind::Spark);
        assert_eq!(args.master, "local");
        assert!(!args.compile_only);
        assert!(args.profiling.is_none());
        assert_eq!(Args::script_name("dir/script.json"), "script");
    }

    #[test]
    fn parse_params() {
        let args = Args::parse_from([
            "hamlet",
            "s.json",
            "--params",
            "inbase=/data",
            "--params",
            "bad",
        ]);
        assert_eq!(args.param_map(), vec![("inbase".into(), "/data".into())]);
    }

    #[test]
    fn backend_names() {
        assert_eq!(BackendKind::Spark.name(), "spark");
        assert!(BackendKind::Flinks.is_streaming());
    }
}
