//! Execution backend trait and implementations.
//!
//! A backend runs one resolved command under a wall-clock budget and reports
//! what the process produced. It does not interpret the outcome; that is the
//! normalizer's job.

mod process;

pub use process::ProcessBackend;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A fully resolved command ready to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Interpreter binary.
    pub program: String,
    /// Discrete argv elements, never joined into a shell string.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// Wall-clock budget.
    pub timeout: Duration,
    /// Per-stream capture ceiling in bytes.
    pub max_output_bytes: usize,
}

/// What a process produced before it exited or was killed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was terminated by a signal or killed on timeout.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// The timeout fired and the process was killed.
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ProcessOutput {
    /// Exited on its own with status 0.
    pub const fn succeeded(&self) -> bool {
        !self.timed_out && matches!(self.exit_code, Some(0))
    }
}

/// Failures that prevent a process from producing an exit status.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The interpreter could not be started (missing binary, permissions).
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The submitted source could not be written to a scratch file.
    #[error("failed to write source file: {0}")]
    Materialize(#[source] io::Error),

    /// The process started but could not be waited on.
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
}

/// Trait for execution backends.
///
/// Exactly one process is spawned per call and failed spawns are never
/// retried. Implementations must tear the process down before returning,
/// including on timeout.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run `invocation` to completion or until its timeout expires.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecError>;
}
