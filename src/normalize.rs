//! Mapping from raw process outcomes to the uniform execution result.

use std::io;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{ExecError, ProcessOutput};

/// `error` text for executions cut off by the timeout.
pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// Appended to a stream that hit the capture ceiling.
pub const TRUNCATION_MARKER: &str = "[output truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Outcome of one execution attempt, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured stdout, possibly partial.
    pub output: String,
    /// Empty on success, otherwise why the attempt failed.
    pub error_detail: String,
    pub status: ExecutionStatus,
    pub timed_out: bool,
}

impl ExecutionResult {
    fn failed(output: String, error_detail: String) -> Self {
        Self {
            output,
            error_detail,
            status: ExecutionStatus::Error,
            timed_out: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Convert a backend outcome into an [`ExecutionResult`].
///
/// - spawn/materialize/wait failure: error, no output, cause as detail
/// - timeout: error, `timed_out`, fixed message, partial stdout
/// - non-zero exit or signal: error, stderr (or a default) as detail, stdout kept
/// - zero exit: success, stdout
pub fn normalize(raw: Result<ProcessOutput, ExecError>, language: &str) -> ExecutionResult {
    let output = match raw {
        Ok(output) => output,
        Err(e) => {
            warn!(language, error = %e, "Execution could not run");
            return ExecutionResult::failed(String::new(), describe(&e));
        }
    };

    let stdout = with_marker(output.stdout, output.stdout_truncated);

    if output.timed_out {
        return ExecutionResult {
            timed_out: true,
            ..ExecutionResult::failed(stdout, TIMEOUT_MESSAGE.to_string())
        };
    }

    match output.exit_code {
        Some(0) => ExecutionResult {
            output: stdout,
            error_detail: String::new(),
            status: ExecutionStatus::Success,
            timed_out: false,
        },
        code => {
            debug!(language, exit_code = ?code, "Program exited with failure");
            let detail = if output.stderr.trim().is_empty() {
                code.map_or_else(
                    || "Process terminated by signal".to_string(),
                    |c| format!("Process exited with code {c}"),
                )
            } else {
                with_marker(output.stderr, output.stderr_truncated)
            };
            ExecutionResult::failed(stdout, detail)
        }
    }
}

fn describe(error: &ExecError) -> String {
    match error {
        ExecError::Spawn { program, source } if source.kind() == io::ErrorKind::NotFound => {
            format!("Interpreter `{program}` not found")
        }
        ExecError::Spawn { program, source } => format!("Failed to start `{program}`: {source}"),
        ExecError::Materialize(source) => format!("Failed to write source file: {source}"),
        ExecError::Wait(source) => format!("Failed to wait for process: {source}"),
    }
}

fn with_marker(mut text: String, truncated: bool) -> String {
    if truncated {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
