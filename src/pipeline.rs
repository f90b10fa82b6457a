//! End-to-end pipeline: prompt → synthesis → validated execution.
//!
//! One instruction per run, synchronous end-to-end on the caller's task.
//! Cancellation aborts an in-flight provider request (by dropping the future)
//! and kills a running child process.

use crate::exec::{self, ExecutionError, ExecutionResult, ValidatedCommand};
use crate::llm::ModelProvider;
use crate::profile::CapabilityProfile;
use crate::prompt::{self, PromptError};
use crate::synth::{SynthError, Synthesizer};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Pipeline-level error taxonomy.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The instruction was unusable; no request was made.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// Synthesis failed (provider failure or repair-loop exhaustion).
    #[error(transparent)]
    Synthesis(#[from] SynthError),
    /// The validated command could not be run to completion.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// The run was cancelled before a command was synthesized.
    #[error("cancelled")]
    Cancelled,
}

/// Wires the pipeline stages together for one instruction per call.
pub struct Pipeline<'a> {
    provider: &'a dyn ModelProvider,
    profile: &'a CapabilityProfile,
    max_attempts: usize,
    execution_timeout: Option<Duration>,
    tool_version: Option<String>,
}

impl<'a> Pipeline<'a> {
    /// Assemble a pipeline over `provider` and `profile`.
    #[must_use]
    pub fn new(
        provider: &'a dyn ModelProvider,
        profile: &'a CapabilityProfile,
        max_attempts: usize,
        execution_timeout: Option<Duration>,
        tool_version: Option<String>,
    ) -> Self {
        Self {
            provider,
            profile,
            max_attempts,
            execution_timeout,
            tool_version,
        }
    }

    /// Turn an instruction into a validated command without executing it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Prompt`] for unusable instructions (before any
    /// network activity), [`PipelineError::Synthesis`] for provider failures
    /// or repair exhaustion, [`PipelineError::Cancelled`] when `cancel` fires
    /// mid-synthesis.
    pub async fn synthesize(
        &self,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> Result<ValidatedCommand, PipelineError> {
        let payload = prompt::build(instruction, self.profile, self.tool_version.as_deref())?;
        let synthesizer = Synthesizer::new(self.provider, self.profile, self.max_attempts);
        tokio::select! {
            result = synthesizer.synthesize(&payload) => Ok(result?),
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    /// Execute a validated command under the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Execution`] when the child cannot be launched,
    /// times out, or is cancelled. A non-zero exit is a normal
    /// [`ExecutionResult`], not an error.
    pub async fn execute(
        &self,
        command: &ValidatedCommand,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, PipelineError> {
        Ok(exec::execute(command, self.execution_timeout, cancel).await?)
    }

    /// Synthesize and immediately execute, with no confirmation step.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::synthesize`] and [`Self::execute`].
    pub async fn run(
        &self,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, PipelineError> {
        let command = self.synthesize(instruction, cancel).await?;
        self.execute(&command, cancel).await
    }
}
