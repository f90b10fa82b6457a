//! Command synthesis with a bounded repair loop.
//!
//! One synthesis run is a small state machine: Drafting sends the
//! conversation to the provider, Validating parses and validates the reply,
//! and a rejection moves to Repairing, which appends the malformed reply plus
//! the specific rejection reason to the conversation and drafts again. The
//! attempt bound makes the terminal states (Done/Failed) easy to verify.

use crate::command::{split_command_line, CandidateCommand};
use crate::exec::{self, RejectionReason, ValidatedCommand};
use crate::llm::{LlmError, Message, ModelProvider};
use crate::profile::CapabilityProfile;
use crate::prompt::PromptPayload;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by the synthesizer.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The provider call itself failed; transport failures are never retried
    /// by the repair loop, since re-asking cannot change validity.
    #[error(transparent)]
    Provider(#[from] LlmError),
    /// The repair loop ran out of attempts. Carries the last rejection
    /// verbatim so the user can refine the instruction.
    #[error(
        "no valid command after {attempts} attempts; last rejection: {last_reason}; last reply: {last_reply}"
    )]
    Exhausted {
        /// Provider round trips consumed.
        attempts: usize,
        /// Rejection reason for the final reply.
        last_reason: RejectionReason,
        /// The final reply, verbatim, for diagnosis.
        last_reply: String,
    },
}

/// Repair-loop state. One provider round trip per Drafting visit.
#[derive(Debug)]
enum SynthState {
    Drafting,
    Repairing {
        reply: String,
        reason: RejectionReason,
    },
    Done(ValidatedCommand),
    Failed {
        reply: String,
        reason: RejectionReason,
    },
}

/// Turns one instruction payload into one validated command.
pub struct Synthesizer<'a> {
    provider: &'a dyn ModelProvider,
    profile: &'a CapabilityProfile,
    max_attempts: usize,
}

impl<'a> Synthesizer<'a> {
    /// Create a synthesizer bounded to `max_attempts` provider round trips.
    #[must_use]
    pub fn new(
        provider: &'a dyn ModelProvider,
        profile: &'a CapabilityProfile,
        max_attempts: usize,
    ) -> Self {
        Self {
            provider,
            profile,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run the synthesis state machine to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`SynthError::Provider`] on provider failures and
    /// [`SynthError::Exhausted`] when the attempt bound is reached without a
    /// valid command. Never executes anything.
    pub async fn synthesize(
        &self,
        payload: &PromptPayload,
    ) -> Result<ValidatedCommand, SynthError> {
        let mut messages = vec![
            Message::system(&payload.system),
            Message::user(&payload.user),
        ];
        let mut attempts = 0;
        let mut state = SynthState::Drafting;

        loop {
            state = match state {
                SynthState::Drafting => {
                    attempts += 1;
                    let reply = self.provider.complete(&messages).await?;
                    match self.extract_and_validate(&reply) {
                        Ok(command) => SynthState::Done(command),
                        Err(reason) if attempts < self.max_attempts => {
                            SynthState::Repairing { reply, reason }
                        }
                        Err(reason) => SynthState::Failed { reply, reason },
                    }
                }
                SynthState::Repairing { reply, reason } => {
                    warn!(attempt = attempts, reason = %reason, "model reply rejected, repairing");
                    messages.push(Message::assistant(&reply));
                    messages.push(Message::user(&self.repair_feedback(&reason)));
                    SynthState::Drafting
                }
                SynthState::Done(command) => {
                    debug!(attempts, command = %command.display(), "synthesis succeeded");
                    return Ok(command);
                }
                SynthState::Failed { reply, reason } => {
                    warn!(attempts, reason = %reason, "synthesis exhausted");
                    return Err(SynthError::Exhausted {
                        attempts,
                        last_reason: reason,
                        last_reply: reply,
                    });
                }
            };
        }
    }

    /// Parse one reply into a candidate and statically validate it.
    fn extract_and_validate(&self, reply: &str) -> Result<ValidatedCommand, RejectionReason> {
        let candidate = extract_candidate(reply, self.profile)?;
        exec::validate(&candidate, self.profile)
    }

    fn repair_feedback(&self, reason: &RejectionReason) -> String {
        format!(
            "That reply was rejected: {reason}. Respond again with exactly one \
             line containing only a valid {} command. No explanation, no \
             markdown fencing.",
            self.profile.program
        )
    }
}

/// Extract the command line from a raw model reply.
///
/// Despite the output contract, models routinely wrap the command in a fenced
/// code block amid prose; when the reply contains exactly one such block, its
/// content is preferred. Otherwise the reply must be exactly one non-empty
/// line. A leading `$ ` prompt artifact is stripped. The line is screened for
/// shell metacharacters before tokenization, tokenized quote-aware, and the
/// first token must name the profile's program.
///
/// # Errors
///
/// Returns the [`RejectionReason`] describing the first contract violation.
pub fn extract_candidate(
    reply: &str,
    profile: &CapabilityProfile,
) -> Result<CandidateCommand, RejectionReason> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(RejectionReason::EmptyReply);
    }

    let content = match single_fenced_block(trimmed) {
        Some(block) => block.trim().to_string(),
        None => {
            let lines: Vec<&str> = trimmed.lines().filter(|l| !l.trim().is_empty()).collect();
            match lines.as_slice() {
                [] => return Err(RejectionReason::EmptyReply),
                [line] => (*line).trim().to_string(),
                many => {
                    return Err(RejectionReason::MultipleLines { lines: many.len() });
                }
            }
        }
    };

    let line = content.strip_prefix("$ ").unwrap_or(&content);

    // Screen the raw line before tokenization so `url; rm -rf /` is reported
    // as a metacharacter violation rather than an unknown-flag one.
    for meta in exec::SHELL_METACHARACTERS {
        if line.contains(meta) {
            return Err(RejectionReason::ShellMetacharacter {
                token: (*meta).to_string(),
            });
        }
    }

    let tokens = split_command_line(line).ok_or(RejectionReason::UnbalancedQuote)?;
    let candidate = CandidateCommand::new(tokens);
    match candidate.program() {
        None => Err(RejectionReason::EmptyReply),
        Some(program) if program != profile.program => Err(RejectionReason::WrongProgram {
            expected: profile.program.to_string(),
            found: program.to_string(),
        }),
        Some(_) => Ok(candidate),
    }
}

/// If the reply contains exactly one triple-backtick fenced block, return its
/// content (without the language tag line). More than one block, or none,
/// returns `None` and the single-line contract applies.
fn single_fenced_block(reply: &str) -> Option<&str> {
    let mut sections = reply.split("```");
    let _prose_before = sections.next()?;
    let block = sections.next()?;
    let _prose_after = sections.next()?;
    if sections.next().is_some() {
        // A second fenced block: ambiguous, let the caller reject.
        return None;
    }
    // Drop the language tag if the opening fence carried one.
    match block.split_once('\n') {
        Some((first_line, rest)) if !first_line.trim().contains(' ') && !rest.trim().is_empty() => {
            Some(rest)
        }
        _ => Some(block),
    }
}
