//! Request orchestration.
//!
//! A request moves Received → Validated → Resolved → (Materialized) →
//! Executed → Normalized. Validation and resolution failures reject it
//! before anything is spawned; once execution starts a result is always
//! produced and the scratch file is released first.

use std::path::Path;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::backend::{ExecError, ExecutionBackend, Invocation};
use crate::config::Config;
use crate::error::SandboxError;
use crate::language::LanguageTable;
use crate::normalize::{normalize, ExecutionResult};
use crate::scratch::ScratchDir;

/// Message for requests missing `code` or `language`.
pub const MISSING_INPUT_MESSAGE: &str = "Code and language are required";

/// A validated execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
}

impl ExecutionRequest {
    /// Validate raw inbound fields. Both must be present and non-empty.
    pub fn new(code: Option<String>, language: Option<String>) -> Result<Self, SandboxError> {
        match (code, language) {
            (Some(code), Some(language)) if !code.is_empty() && !language.trim().is_empty() => {
                Ok(Self { code, language })
            }
            _ => Err(SandboxError::invalid_request(MISSING_INPUT_MESSAGE)),
        }
    }
}

/// Runs requests against a strategy table and an execution backend.
pub struct Sandbox<B> {
    languages: LanguageTable,
    backend: B,
    scratch: ScratchDir,
    timeout: Duration,
    max_output_bytes: usize,
    limiter: Option<Semaphore>,
}

impl<B: ExecutionBackend> Sandbox<B> {
    pub fn new(config: &Config, languages: LanguageTable, backend: B) -> Self {
        Self {
            languages,
            backend,
            scratch: ScratchDir::new(&config.scratch_dir),
            timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
            limiter: config.max_concurrent_executions.map(Semaphore::new),
        }
    }

    pub const fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Create the scratch directory.
    pub async fn prepare(&self) -> std::io::Result<()> {
        self.scratch.prepare().await
    }

    /// Execute one request.
    ///
    /// Returns `Err` only for rejections (unknown language) and internal
    /// faults. Every execution attempt, failed or not, is an `Ok` result.
    #[instrument(skip_all, fields(language = %request.language, code_len = request.code.len()))]
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        let recipe = self
            .languages
            .resolve(&request.language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(request.language.clone()))?;
        debug!(recipe = %recipe.name, command = %recipe.command, "Resolved language");

        let _permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|e| SandboxError::internal(format!("execution limiter: {e}")))?,
            ),
            None => None,
        };

        let mut source = match self.scratch.materialize(recipe, &request.code).await {
            Ok(source) => source,
            Err(e) => return Ok(normalize(Err(ExecError::Materialize(e)), &request.language)),
        };

        let invocation = Invocation {
            program: recipe.command.clone(),
            args: recipe.build_args(&source.argument()),
            working_dir: self.scratch.path().to_path_buf(),
            timeout: self.timeout,
            max_output_bytes: self.max_output_bytes,
        };

        let raw = self.backend.run(&invocation).await;
        // Release before the response leaves; Drop covers unwinding.
        source.release();

        let result = normalize(raw, &request.language);
        debug!(status = ?result.status, timed_out = result.timed_out, "Execution normalized");
        Ok(result)
    }
}
