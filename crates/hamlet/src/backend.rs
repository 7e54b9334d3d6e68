//! Backend descriptors and the job runner contract.
//!
//! The runner itself is an external collaborator: the compiler only fixes
//! the handoff (artifact path, master, free-form argument map, profiling
//! flag) and surfaces the runner's exit status as its own.

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use common::BackendKind;

use crate::error::CompileError;

/// Submits a compiled artifact for execution.
pub trait BackendRunner {
    /// Run the artifact; returns the job's exit status (non-zero on failure).
    fn run(
        &self,
        artifact: &Path,
        master: &str,
        args: &[(String, String)],
        profiling: bool,
        mute: bool,
    ) -> Result<i32, CompileError>;
}

/// Spawns the backend's submit command as a child process.
pub struct ProcessRunner {
    backend: BackendKind,
}

impl ProcessRunner {
    pub fn new(backend: BackendKind) -> Self {
        Self { backend }
    }

    fn submit_command(&self) -> &'static str {
        match self.backend {
            BackendKind::Spark => "spark-submit",
            BackendKind::Flinks => "flink",
        }
    }
}

impl BackendRunner for ProcessRunner {
    fn run(
        &self,
        artifact: &Path,
        master: &str,
        args: &[(String, String)],
        profiling: bool,
        mute: bool,
    ) -> Result<i32, CompileError> {
        let mut cmd = Command::new(self.submit_command());
        match self.backend {
            BackendKind::Spark => {
                cmd.arg("--master").arg(master);
            }
            BackendKind::Flinks => {
                cmd.arg("run").arg("--jobmanager").arg(master);
            }
        }
        cmd.arg(artifact);
        for (key, value) in args {
            cmd.arg(format!("--{}", key)).arg(value);
        }
        if profiling {
            cmd.arg("--profiling");
        }
        if mute {
            cmd.stdout(Stdio::null());
        }
        debug!("submitting: {:?}", cmd);

        let status = cmd.status()?;
        let code = status.code().unwrap_or(-1);
        info!("backend runner finished with status {}", code);
        Ok(code)
    }
}
