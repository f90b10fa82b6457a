//! Command validation and child-process execution.
//!
//! Validation is an allow-list over the capability profile; execution is a
//! direct argument-array spawn, so no shell ever interprets the command. The
//! metacharacter rule is kept anyway as defense against a future
//! shell-mediated launch path.

use crate::command::{render_tokens, CandidateCommand};
use crate::profile::{CapabilityProfile, ValueDomain};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Substrings that chain or substitute commands in a shell.
pub const SHELL_METACHARACTERS: &[&str] = &[";", "|", "&&", "`", "$(", "\n"];

/// Bytes of stderr retained for the result's tail.
const STDERR_TAIL_BYTES: usize = 4096;

/// Why a candidate command was rejected.
///
/// The `Display` text is fed back to the model verbatim during repair, so it
/// is phrased as actionable feedback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    /// Reply contained no command at all.
    #[error("the reply contained no command")]
    EmptyReply,
    /// Reply contained more than one line of content.
    #[error("the reply contained {lines} lines of content; respond with exactly one command line")]
    MultipleLines {
        /// Number of non-empty lines seen.
        lines: usize,
    },
    /// A quote was left unbalanced.
    #[error("the command line has an unbalanced quote")]
    UnbalancedQuote,
    /// First token named a different program.
    #[error("the command must start with `{expected}`, not `{found}`")]
    WrongProgram {
        /// Required program name.
        expected: String,
        /// Program the reply named instead.
        found: String,
    },
    /// A flag is not in the capability profile.
    #[error("unknown flag `{flag}`")]
    UnknownFlag {
        /// The unrecognized flag token.
        flag: String,
    },
    /// A flag that requires a value had none.
    #[error("flag `{flag}` requires {expected}")]
    MissingValue {
        /// The flag missing its argument.
        flag: String,
        /// Description of the expected value domain.
        expected: String,
    },
    /// A flag value (or positional argument) fell outside its domain.
    #[error("`{value}` is not a valid argument for `{flag}`; expected {expected}")]
    InvalidArgument {
        /// The flag (or `<positional>`).
        flag: String,
        /// The offending value.
        value: String,
        /// Description of the expected value domain.
        expected: String,
    },
    /// Two mutually-exclusive flags were both present.
    #[error("flags `{first}` and `{second}` cannot be used together")]
    ConflictingFlags {
        /// First flag of the conflicting pair.
        first: String,
        /// Second flag of the conflicting pair.
        second: String,
    },
    /// A token contained a command-chaining or substitution metacharacter.
    #[error("`{token}` contains a shell metacharacter; commands must not chain or substitute")]
    ShellMetacharacter {
        /// The offending token or snippet.
        token: String,
    },
}

/// A command that passed every validation rule.
///
/// The only constructor is [`validate`], which makes the program-name
/// invariant structural: no code path can execute a command naming a
/// different program, because no such value can exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    program: String,
    args: Vec<String>,
}

impl ValidatedCommand {
    /// The program name (always the profile's program).
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Render the command for display, quoting where needed.
    #[must_use]
    pub fn display(&self) -> String {
        let mut tokens = vec![self.program.clone()];
        tokens.extend(self.args.iter().cloned());
        render_tokens(&tokens)
    }
}

/// Split a flag token into its name part and an optional `=`-joined value.
fn split_flag_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once('=') {
        Some((name, value)) if name.starts_with("--") => (name, Some(value)),
        _ => (token, None),
    }
}

fn check_program(
    tokens: &[String],
    profile: &CapabilityProfile,
) -> Result<(), RejectionReason> {
    let Some(program) = tokens.first() else {
        return Err(RejectionReason::EmptyReply);
    };
    if program != profile.program {
        return Err(RejectionReason::WrongProgram {
            expected: profile.program.to_string(),
            found: program.clone(),
        });
    }
    Ok(())
}

fn check_flags_known(
    tokens: &[String],
    profile: &CapabilityProfile,
) -> Result<(), RejectionReason> {
    for token in &tokens[1..] {
        if token.starts_with('-') && token.len() > 1 {
            let (name, _) = split_flag_token(token);
            if profile.find_flag(name).is_none() {
                return Err(RejectionReason::UnknownFlag {
                    flag: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_values(
    tokens: &[String],
    profile: &CapabilityProfile,
) -> Result<(), RejectionReason> {
    let mut i = 1;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.starts_with('-') && token.len() > 1 {
            let (name, inline_value) = split_flag_token(token);
            let Some(spec) = profile.find_flag(name) else {
                // Already rejected by the previous rule; keep this pass total.
                i += 1;
                continue;
            };
            match spec.value {
                ValueDomain::None => {
                    if let Some(value) = inline_value {
                        return Err(RejectionReason::InvalidArgument {
                            flag: name.to_string(),
                            value: value.to_string(),
                            expected: spec.value.describe(),
                        });
                    }
                }
                domain => {
                    let value = match inline_value {
                        Some(v) => v.to_string(),
                        None => {
                            i += 1;
                            match tokens.get(i) {
                                Some(v) => v.clone(),
                                None => {
                                    return Err(RejectionReason::MissingValue {
                                        flag: name.to_string(),
                                        expected: domain.describe(),
                                    })
                                }
                            }
                        }
                    };
                    if !domain.accepts(&value) {
                        return Err(RejectionReason::InvalidArgument {
                            flag: name.to_string(),
                            value,
                            expected: domain.describe(),
                        });
                    }
                }
            }
        } else if !profile.positional.accepts(token) {
            return Err(RejectionReason::InvalidArgument {
                flag: "<positional>".to_string(),
                value: token.clone(),
                expected: profile.positional.describe(),
            });
        }
        i += 1;
    }
    Ok(())
}

fn check_exclusion_groups(
    tokens: &[String],
    profile: &CapabilityProfile,
) -> Result<(), RejectionReason> {
    let mut seen: Vec<(&'static str, &'static str)> = Vec::new();
    for token in &tokens[1..] {
        let (name, _) = split_flag_token(token);
        let Some(spec) = profile.find_flag(name) else {
            continue;
        };
        let Some(group) = spec.group else { continue };
        if let Some((_, earlier)) = seen.iter().find(|(g, _)| *g == group) {
            if *earlier != spec.name {
                return Err(RejectionReason::ConflictingFlags {
                    first: (*earlier).to_string(),
                    second: spec.name.to_string(),
                });
            }
        } else {
            seen.push((group, spec.name));
        }
    }
    Ok(())
}

/// Scan for command-chaining and substitution metacharacters.
///
/// # Errors
///
/// Returns [`RejectionReason::ShellMetacharacter`] naming the first offending
/// token.
pub fn check_metacharacters(tokens: &[String]) -> Result<(), RejectionReason> {
    for token in tokens {
        if SHELL_METACHARACTERS.iter().any(|meta| token.contains(meta)) {
            return Err(RejectionReason::ShellMetacharacter {
                token: token.clone(),
            });
        }
    }
    Ok(())
}

/// Validate a candidate command against the capability profile.
///
/// Rules are applied in order, first failure wins: program name, flag
/// allow-list, value domains, mutual exclusion, metacharacters.
///
/// # Errors
///
/// Returns the first [`RejectionReason`] encountered.
pub fn validate(
    cmd: &CandidateCommand,
    profile: &CapabilityProfile,
) -> Result<ValidatedCommand, RejectionReason> {
    let tokens = cmd.tokens();
    check_program(tokens, profile)?;
    check_flags_known(tokens, profile)?;
    check_values(tokens, profile)?;
    check_exclusion_groups(tokens, profile)?;
    check_metacharacters(tokens)?;

    Ok(ValidatedCommand {
        program: profile.program.to_string(),
        args: tokens[1..].to_vec(),
    })
}

/// Outcome of running a validated command to completion.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Child exit code (`-1` when terminated by a signal).
    pub exit_code: i32,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Tail of the child's stderr, bounded to a few KiB.
    pub stderr_tail: String,
}

impl ExecutionResult {
    /// Whether the child exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors raised while launching or supervising the child process.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The child could not be spawned.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The child ran past the configured timeout and was killed.
    #[error("command timed out after {0:?} and was terminated")]
    TimedOut(Duration),
    /// The run was cancelled and the child was killed.
    #[error("command was cancelled")]
    Cancelled,
}

/// Sleep for the configured timeout, or suspend forever when none is set.
async fn sleep_or_never(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

async fn forward_stdout(mut reader: impl AsyncRead + Unpin) {
    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stdout.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        }
    }
}

async fn forward_stderr(mut reader: impl AsyncRead + Unpin) -> String {
    let mut stderr = tokio::io::stderr();
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stderr.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                let _ = stderr.flush().await;
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// Run a validated command as a child process with an explicit argument
/// array, forwarding stdout/stderr live. Blocks until the child exits, the
/// timeout elapses, or `cancel` fires; in the latter two cases the child is
/// killed. Partial output already streamed stays on the terminal either way.
///
/// # Errors
///
/// Returns [`ExecutionError::Spawn`] when the program cannot start,
/// [`ExecutionError::TimedOut`] on timeout, [`ExecutionError::Cancelled`] on
/// cancellation.
pub async fn execute(
    cmd: &ValidatedCommand,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<ExecutionResult, ExecutionError> {
    let started = Instant::now();
    debug!(command = %cmd.display(), "spawning child process");

    let mut child = Command::new(cmd.program())
        .args(cmd.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecutionError::Spawn {
            program: cmd.program().to_string(),
            source,
        })?;

    let out_task = child.stdout.take().map(|r| tokio::spawn(forward_stdout(r)));
    let err_task = child.stderr.take().map(|r| tokio::spawn(forward_stderr(r)));

    enum WaitOutcome {
        Exited(std::io::Result<std::process::ExitStatus>),
        TimedOut,
        Cancelled,
    }

    let outcome = {
        let wait = child.wait();
        tokio::pin!(wait);
        tokio::select! {
            status = &mut wait => WaitOutcome::Exited(status),
            () = sleep_or_never(timeout) => WaitOutcome::TimedOut,
            () = cancel.cancelled() => WaitOutcome::Cancelled,
        }
    };

    let status = match outcome {
        WaitOutcome::Exited(status) => status.map_err(|source| ExecutionError::Spawn {
            program: cmd.program().to_string(),
            source,
        })?,
        WaitOutcome::TimedOut => {
            let limit = timeout.unwrap_or_default();
            warn!(timeout_secs = limit.as_secs(), "child exceeded timeout, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ExecutionError::TimedOut(limit));
        }
        WaitOutcome::Cancelled => {
            warn!("cancellation requested, killing child");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ExecutionError::Cancelled);
        }
    };

    if let Some(task) = out_task {
        let _ = task.await;
    }
    let stderr_tail = match err_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    let exit_code = status.code().unwrap_or(-1);
    debug!(exit_code, duration_ms = started.elapsed().as_millis(), "child exited");

    Ok(ExecutionResult {
        exit_code,
        duration: started.elapsed(),
        stderr_tail,
    })
}

/// Resolve `program` on `PATH`, the same way the tool itself would be found
/// by a shell. Returns `None` when it is not installed.
#[must_use]
pub fn locate_program(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Probe the installed tool's `--version` output (first line), for prompt
/// grounding. Failures are tolerated: the prompt simply omits the version.
pub async fn probe_version(program: &str) -> Option<String> {
    let output = tokio::time::timeout(
        Duration::from_secs(5),
        Command::new(program).arg("--version").output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines().next().map(|line| line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CapabilityProfile, FlagSpec, ValueDomain, YTDLP};

    fn candidate(line: &str) -> CandidateCommand {
        let tokens = crate::command::split_command_line(line).expect("balanced test input");
        CandidateCommand::new(tokens)
    }

    #[test]
    fn accepts_known_audio_extraction_command() {
        let cmd = candidate("yt-dlp -x --audio-format mp3 https://x/y");
        let validated = validate(&cmd, &YTDLP).expect("valid command");
        assert_eq!(validated.program(), "yt-dlp");
        assert_eq!(validated.args(), ["-x", "--audio-format", "mp3", "https://x/y"]);
    }

    #[test]
    fn rejects_other_program_names() {
        let cmd = candidate("rm -rf https://x/y");
        let err = validate(&cmd, &YTDLP).expect_err("must reject");
        assert!(matches!(err, RejectionReason::WrongProgram { .. }));
    }

    #[test]
    fn rejects_path_qualified_program() {
        // No path traversal or aliasing: the name must match exactly.
        let cmd = candidate("/usr/bin/yt-dlp https://x/y");
        let err = validate(&cmd, &YTDLP).expect_err("must reject");
        assert!(matches!(err, RejectionReason::WrongProgram { .. }));
    }

    #[test]
    fn rejects_unknown_flag() {
        let cmd = candidate("yt-dlp --frobnicate https://x/y");
        let err = validate(&cmd, &YTDLP).expect_err("must reject");
        assert_eq!(
            err,
            RejectionReason::UnknownFlag {
                flag: "--frobnicate".to_string()
            }
        );
    }

    #[test]
    fn rejects_out_of_domain_value() {
        let cmd = candidate("yt-dlp --audio-quality 11 https://x/y");
        let err = validate(&cmd, &YTDLP).expect_err("must reject");
        assert!(matches!(err, RejectionReason::InvalidArgument { .. }));
    }

    #[test]
    fn rejects_missing_value_at_end_of_line() {
        let cmd = candidate("yt-dlp https://x/y --audio-format");
        let err = validate(&cmd, &YTDLP).expect_err("must reject");
        assert!(matches!(err, RejectionReason::MissingValue { .. }));
    }

    #[test]
    fn accepts_equals_joined_values() {
        let cmd = candidate("yt-dlp --audio-quality=0 -x https://x/y");
        validate(&cmd, &YTDLP).expect("valid command");
    }

    #[test]
    fn rejects_conflicting_flags() {
        let cmd = candidate("yt-dlp --yes-playlist --no-playlist https://x/y");
        let err = validate(&cmd, &YTDLP).expect_err("must reject");
        assert_eq!(
            err,
            RejectionReason::ConflictingFlags {
                first: "--yes-playlist".to_string(),
                second: "--no-playlist".to_string()
            }
        );
    }

    #[test]
    fn repeating_one_flag_of_a_group_is_not_a_conflict() {
        let cmd = candidate("yt-dlp -q -q https://x/y");
        validate(&cmd, &YTDLP).expect("repetition is not mutual exclusion");
    }

    #[test]
    fn rejects_non_url_positional() {
        let cmd = candidate("yt-dlp -x notaurl");
        let err = validate(&cmd, &YTDLP).expect_err("must reject");
        assert!(matches!(err, RejectionReason::InvalidArgument { ref flag, .. } if flag == "<positional>"));
    }

    #[test]
    fn metacharacter_screen_catches_chaining() {
        for line in [
            "yt-dlp https://x/y;rm",
            "yt-dlp https://x/y|tee",
            "yt-dlp https://x/$(whoami)",
            "yt-dlp https://x/`whoami`",
        ] {
            let tokens = crate::command::split_command_line(line).expect("balanced");
            assert!(
                matches!(
                    check_metacharacters(&tokens),
                    Err(RejectionReason::ShellMetacharacter { .. })
                ),
                "{line} should be screened"
            );
        }
    }

    static PERMISSIVE: CapabilityProfile = CapabilityProfile {
        program: "sleep",
        grammar_version: "test",
        flags: &[],
        positional: ValueDomain::Any,
    };

    static FALSE_PROFILE: CapabilityProfile = CapabilityProfile {
        program: "false",
        grammar_version: "test",
        flags: &[FlagSpec {
            name: "--unused",
            aliases: &[],
            summary: "placeholder",
            value: ValueDomain::None,
            group: None,
        }],
        positional: ValueDomain::Any,
    };

    #[tokio::test]
    async fn forwards_nonzero_exit_code_as_result() {
        let cmd = validate(&CandidateCommand::new(vec!["false".to_string()]), &FALSE_PROFILE)
            .expect("valid");
        let cancel = CancellationToken::new();
        let result = execute(&cmd, None, &cancel).await.expect("ran to completion");
        assert_eq!(result.exit_code, 1);
        assert!(!result.success());
    }

    static LS_PROFILE: CapabilityProfile = CapabilityProfile {
        program: "ls",
        grammar_version: "test",
        flags: &[],
        positional: ValueDomain::Any,
    };

    #[tokio::test]
    async fn captures_stderr_tail_on_failure() {
        let cmd = validate(
            &CandidateCommand::new(vec![
                "ls".to_string(),
                "/ytdlpllm-missing-dir".to_string(),
            ]),
            &LS_PROFILE,
        )
        .expect("valid");
        let cancel = CancellationToken::new();
        let result = execute(&cmd, None, &cancel).await.expect("ran to completion");
        assert_ne!(result.exit_code, 0);
        assert!(result.stderr_tail.contains("ytdlpllm-missing-dir"));
        assert!(result.duration < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn kills_child_on_timeout() {
        let cmd = validate(
            &CandidateCommand::new(vec!["sleep".to_string(), "30".to_string()]),
            &PERMISSIVE,
        )
        .expect("valid");
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let err = execute(&cmd, Some(Duration::from_millis(200)), &cancel)
            .await
            .expect_err("must time out");
        assert!(matches!(err, ExecutionError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        static MISSING: CapabilityProfile = CapabilityProfile {
            program: "ytdlpllm-no-such-binary",
            grammar_version: "test",
            flags: &[],
            positional: ValueDomain::Any,
        };
        let cmd = validate(
            &CandidateCommand::new(vec!["ytdlpllm-no-such-binary".to_string()]),
            &MISSING,
        )
        .expect("valid");
        let cancel = CancellationToken::new();
        let err = execute(&cmd, None, &cancel).await.expect_err("cannot spawn");
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[test]
    fn locate_program_finds_shell_utilities() {
        assert!(locate_program("sh").is_some());
        assert!(locate_program("ytdlpllm-no-such-binary").is_none());
    }
}
