//! Hermetic end-to-end pipeline tests with scripted model providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use ytdlpllm::exec::ExecutionError;
use ytdlpllm::llm::{LlmError, Message, ModelProvider};
use ytdlpllm::pipeline::{Pipeline, PipelineError};
use ytdlpllm::profile::{CapabilityProfile, ValueDomain, YTDLP};
use ytdlpllm::prompt::PromptError;
use ytdlpllm::synth::SynthError;

/// Provider that replays a fixed reply sequence and counts requests.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| (*r).to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .expect("reply script lock")
            .pop_front()
            .ok_or_else(|| LlmError::Api("reply script exhausted".to_string()))
    }
}

/// Provider whose transport always fails.
struct UnreachableProvider {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ModelProvider for UnreachableProvider {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LlmError::Network("connection refused".to_string()))
    }
}

// Execution-capable profiles pointing at ubiquitous POSIX utilities, so the
// child-process path can be exercised without a yt-dlp install.
static TRUE_PROFILE: CapabilityProfile = CapabilityProfile {
    program: "true",
    grammar_version: "test",
    flags: &[],
    positional: ValueDomain::Url,
};

static FALSE_PROFILE: CapabilityProfile = CapabilityProfile {
    program: "false",
    grammar_version: "test",
    flags: &[],
    positional: ValueDomain::Url,
};

static SLEEP_PROFILE: CapabilityProfile = CapabilityProfile {
    program: "sleep",
    grammar_version: "test",
    flags: &[],
    positional: ValueDomain::Any,
};

#[tokio::test]
async fn empty_instruction_fails_without_any_network_request() {
    let provider = ScriptedProvider::new(&["yt-dlp https://x/y"]);
    let pipeline = Pipeline::new(&provider, &YTDLP, 3, None, None);
    let cancel = CancellationToken::new();

    let err = pipeline
        .run("   \t ", &cancel)
        .await
        .expect_err("empty instruction");
    assert!(matches!(
        err,
        PipelineError::Prompt(PromptError::EmptyInstruction)
    ));
    assert_eq!(provider.calls(), 0, "no provider request may be issued");
}

#[tokio::test]
async fn audio_instruction_round_trips_to_a_validated_command() {
    let provider = ScriptedProvider::new(&["yt-dlp -x --audio-format mp3 https://x/y"]);
    let pipeline = Pipeline::new(&provider, &YTDLP, 3, None, None);
    let cancel = CancellationToken::new();

    let command = pipeline
        .synthesize("download the audio from this video: https://x/y", &cancel)
        .await
        .expect("valid reply");
    assert_eq!(command.display(), "yt-dlp -x --audio-format mp3 https://x/y");
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn exit_code_of_the_target_tool_is_forwarded() {
    let ok = ScriptedProvider::new(&["true https://x/y"]);
    let pipeline = Pipeline::new(&ok, &TRUE_PROFILE, 3, None, None);
    let cancel = CancellationToken::new();
    let result = pipeline
        .run("whatever https://x/y", &cancel)
        .await
        .expect("runs");
    assert_eq!(result.exit_code, 0);
    assert!(result.success());

    let failing = ScriptedProvider::new(&["false https://x/y"]);
    let pipeline = Pipeline::new(&failing, &FALSE_PROFILE, 3, None, None);
    let result = pipeline
        .run("whatever https://x/y", &cancel)
        .await
        .expect("runs");
    // A non-zero exit from the target tool is a result, not a pipeline error.
    assert_eq!(result.exit_code, 1);
    assert!(!result.success());
}

#[tokio::test]
async fn injection_attempt_exhausts_repair_and_nothing_executes() {
    let provider = ScriptedProvider::new(&[
        "yt-dlp https://x/y; rm -rf /",
        "yt-dlp https://x/y; rm -rf /",
        "yt-dlp https://x/y; rm -rf /",
    ]);
    let pipeline = Pipeline::new(&provider, &YTDLP, 3, None, None);
    let cancel = CancellationToken::new();

    let err = pipeline
        .run("download https://x/y", &cancel)
        .await
        .expect_err("must never execute");
    match err {
        PipelineError::Synthesis(SynthError::Exhausted {
            attempts,
            last_reply,
            ..
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_reply.contains("rm -rf"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provider.calls(), 3, "requests are bounded by the repair limit");
}

#[tokio::test]
async fn repair_loop_recovers_within_the_bound() {
    let provider = ScriptedProvider::new(&[
        "Sure, I can help with that!\nTry this command.",
        "youtube-dl https://x/y",
        "yt-dlp --playlist-items 1-5 https://x/y",
    ]);
    let pipeline = Pipeline::new(&provider, &YTDLP, 3, None, None);
    let cancel = CancellationToken::new();

    let command = pipeline
        .synthesize("first five of https://x/y", &cancel)
        .await
        .expect("third reply is valid");
    assert_eq!(command.display(), "yt-dlp --playlist-items 1-5 https://x/y");
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn synthesis_is_idempotent_for_a_fixed_reply_sequence() {
    let mut renderings = Vec::new();
    for _ in 0..2 {
        let provider = ScriptedProvider::new(&[
            "some prose\nmore prose",
            "yt-dlp -f \"bestvideo[height<=720]+bestaudio\" https://x/y",
        ]);
        let pipeline = Pipeline::new(&provider, &YTDLP, 3, None, None);
        let cancel = CancellationToken::new();
        let command = pipeline
            .synthesize("720p please https://x/y", &cancel)
            .await
            .expect("second reply is valid");
        renderings.push(command.display());
    }
    assert_eq!(renderings[0], renderings[1]);
}

#[tokio::test]
async fn transport_failure_propagates_after_a_single_request() {
    let provider = UnreachableProvider {
        calls: AtomicUsize::new(0),
    };
    let pipeline = Pipeline::new(&provider, &YTDLP, 3, None, None);
    let cancel = CancellationToken::new();

    let err = pipeline
        .run("download https://x/y", &cancel)
        .await
        .expect_err("transport is down");
    assert!(matches!(
        err,
        PipelineError::Synthesis(SynthError::Provider(LlmError::Network(_)))
    ));
    assert_eq!(
        provider.calls.load(Ordering::SeqCst),
        1,
        "transport failures are not retried by the repair loop"
    );
}

#[tokio::test]
async fn overrunning_target_process_is_terminated() {
    let provider = ScriptedProvider::new(&["sleep 30"]);
    let pipeline = Pipeline::new(
        &provider,
        &SLEEP_PROFILE,
        3,
        Some(Duration::from_millis(300)),
        None,
    );
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let err = pipeline
        .run("wait forever", &cancel)
        .await
        .expect_err("must time out");
    assert!(matches!(
        err,
        PipelineError::Execution(ExecutionError::TimedOut(_))
    ));
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the child must be killed promptly, not waited out"
    );
}
