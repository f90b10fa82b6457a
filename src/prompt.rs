//! Prompt construction for command synthesis.
//!
//! Builds the grounded request payload: role preamble, capability summary
//! derived from the profile, fixed exemplars, output contract, and the user's
//! verbatim instruction. Pure data transformation; deterministic for a given
//! profile and instruction.

use crate::profile::CapabilityProfile;
use thiserror::Error;

/// Errors raised while building a prompt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    /// The instruction was empty or whitespace-only.
    #[error("instruction is empty")]
    EmptyInstruction,
}

/// Composed request for one synthesis round: system grounding plus the user
/// instruction. Owned by the synthesizer for the duration of one request.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    /// System grounding text.
    pub system: String,
    /// Verbatim user instruction.
    pub user: String,
}

/// Fixed instruction→command exemplars, one per representative category:
/// format selection, playlist slicing, filename templating, post-processing.
/// Anchors the model on real flag syntax instead of invented spellings.
const EXEMPLARS: &[(&str, &str)] = &[
    (
        "download this at 720p: https://youtube.com/watch?v=abc",
        "yt-dlp -f \"bestvideo[height<=720]+bestaudio/best[height<=720]\" https://youtube.com/watch?v=abc",
    ),
    (
        "grab the first five videos of this playlist: https://youtube.com/playlist?list=xyz",
        "yt-dlp --playlist-items 1-5 https://youtube.com/playlist?list=xyz",
    ),
    (
        "save it as channel dash title: https://youtube.com/watch?v=abc",
        "yt-dlp -o \"%(channel)s - %(title)s.%(ext)s\" https://youtube.com/watch?v=abc",
    ),
    (
        "just the audio as mp3: https://youtube.com/watch?v=abc",
        "yt-dlp -x --audio-format mp3 https://youtube.com/watch?v=abc",
    ),
];

/// Build the prompt payload for one instruction.
///
/// `tool_version` is the probed `--version` output of the installed tool, if
/// available, so the model targets the right flag vintage.
///
/// # Errors
///
/// Returns [`PromptError::EmptyInstruction`] when the instruction is empty or
/// whitespace-only. No network activity happens here or after this error.
pub fn build(
    instruction: &str,
    profile: &CapabilityProfile,
    tool_version: Option<&str>,
) -> Result<PromptPayload, PromptError> {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        return Err(PromptError::EmptyInstruction);
    }

    let mut system = format!(
        "You write {program} command lines. Your sole job is to translate the \
         user's request into exactly one valid {program} invocation. You never \
         emit any other program and never chain commands.\n",
        program = profile.program
    );
    if let Some(version) = tool_version {
        system.push_str(&format!(
            "\nInstalled {} version: {}\n",
            profile.program,
            version.trim()
        ));
    }
    system.push_str(&format!(
        "\nFlags you may use (grammar snapshot {}):\n{}",
        profile.grammar_version,
        profile.summary()
    ));

    system.push_str("\nExamples:\n");
    for (request, command) in EXEMPLARS {
        system.push_str(&format!("  request: {request}\n  command: {command}\n"));
    }

    system.push_str(&format!(
        "\nRespond with exactly one line containing only the {} command. \
         No explanation, no markdown fencing, no shell prompt prefix.\n",
        profile.program
    ));

    Ok(PromptPayload {
        system,
        user: instruction.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::YTDLP;

    #[test]
    fn empty_instruction_is_rejected() {
        let result = build("", &YTDLP, None);
        assert!(matches!(result, Err(PromptError::EmptyInstruction)));
    }

    #[test]
    fn whitespace_instruction_is_rejected() {
        let result = build("   \n\t ", &YTDLP, None);
        assert!(matches!(result, Err(PromptError::EmptyInstruction)));
    }

    #[test]
    fn payload_carries_instruction_verbatim() {
        let payload =
            build("download the audio from this video: https://x/y", &YTDLP, None)
                .expect("non-empty instruction");
        assert_eq!(payload.user, "download the audio from this video: https://x/y");
    }

    #[test]
    fn grounding_contains_summary_contract_and_exemplars() {
        let payload = build("anything", &YTDLP, Some("2025.06.09")).expect("valid");
        assert!(payload.system.contains("--audio-format"));
        assert!(payload.system.contains("exactly one line"));
        assert!(payload.system.contains("yt-dlp -x --audio-format mp3"));
        assert!(payload.system.contains("Installed yt-dlp version: 2025.06.09"));
    }

    #[test]
    fn building_twice_is_deterministic() {
        let a = build("slice the playlist", &YTDLP, None).expect("valid");
        let b = build("slice the playlist", &YTDLP, None).expect("valid");
        assert_eq!(a.system, b.system);
        assert_eq!(a.user, b.user);
    }
}
