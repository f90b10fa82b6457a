//! Static capability profile for the yt-dlp flag grammar.
//!
//! One table drives both the prompt grounding summary and the executor's
//! allow-list validation. Keeping them on the same data is what prevents the
//! two from drifting apart.

use lazy_regex::regex_is_match;
use std::fmt::Write as _;

/// Value domain for a flag argument or positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDomain {
    /// Flag takes no argument.
    None,
    /// Integer within an inclusive range.
    Integer { min: u64, max: u64 },
    /// One of a fixed keyword set.
    Keyword(&'static [&'static str]),
    /// Playlist item selection such as `1-5`, `1,3,7` or `::2`.
    ItemSpec,
    /// Output template such as `%(title)s.%(ext)s`.
    Template,
    /// Format selector such as `bestvideo[height<=720]+bestaudio/best`.
    FormatSelector,
    /// Comma-separated subtitle language codes such as `en,de` or `en.*`.
    LangList,
    /// Size or byte rate with optional suffix, e.g. `50K`, `4.2M`, `1GiB`.
    SizeSpec,
    /// Media section such as `*0:30-1:00` or `*10-inf`.
    SectionSpec,
    /// `YYYYMMDD` or a relative date such as `today-2weeks`.
    DateSpec,
    /// Filesystem path.
    Path,
    /// URL-shaped token.
    Url,
    /// Unconstrained single token (metacharacter screening still applies).
    Any,
}

impl ValueDomain {
    /// Whether `value` lies in this domain.
    #[must_use]
    pub fn accepts(self, value: &str) -> bool {
        match self {
            Self::None => false,
            Self::Integer { min, max } => {
                value.parse::<u64>().is_ok_and(|n| n >= min && n <= max)
            }
            Self::Keyword(options) => options.contains(&value),
            Self::ItemSpec => regex_is_match!(r"^[0-9][0-9:,\-]*$|^:[0-9:,\-]+$", value),
            Self::Template => !value.trim().is_empty(),
            Self::FormatSelector => {
                regex_is_match!(r"^[A-Za-z0-9_.,*?:+/<>=\[\] \-]+$", value)
            }
            Self::LangList => regex_is_match!(r"^[A-Za-z0-9.*,\-]+$", value),
            Self::SizeSpec => regex_is_match!(r"^[0-9]+(\.[0-9]+)?([KkMmGgTt]i?[Bb]?)?$", value),
            Self::SectionSpec => regex_is_match!(r"^\*[0-9:.\-]*(inf)?[0-9:.\-]*$", value),
            Self::DateSpec => {
                regex_is_match!(
                    r"^([0-9]{8}|(now|today|yesterday)([+-][0-9]+(day|week|month|year)s?)?)$",
                    value
                )
            }
            Self::Path => !value.is_empty() && !value.starts_with('-'),
            Self::Url => regex_is_match!(r"^https?://[^\s'`\x22]+$", value),
            Self::Any => !value.is_empty(),
        }
    }

    /// Short description used in the capability summary and in rejection
    /// feedback sent back to the model.
    #[must_use]
    pub fn describe(self) -> String {
        match self {
            Self::None => "no argument".to_string(),
            Self::Integer { min, max } if max == u64::MAX => format!("an integer >= {min}"),
            Self::Integer { min, max } => format!("an integer between {min} and {max}"),
            Self::Keyword(options) => format!("one of: {}", options.join(", ")),
            Self::ItemSpec => "a playlist item selection like 1-5 or 1,3,7".to_string(),
            Self::Template => "an output template like %(title)s.%(ext)s".to_string(),
            Self::FormatSelector => {
                "a format selector like bestvideo[height<=720]+bestaudio".to_string()
            }
            Self::LangList => "comma-separated language codes like en,de".to_string(),
            Self::SizeSpec => "a size or rate like 50K or 4.2M".to_string(),
            Self::SectionSpec => "a section like *0:30-1:00".to_string(),
            Self::DateSpec => "a date like 20240101 or today-2weeks".to_string(),
            Self::Path => "a filesystem path".to_string(),
            Self::Url => "an http(s) URL".to_string(),
            Self::Any => "a single value".to_string(),
        }
    }
}

/// One legal flag of the target tool.
#[derive(Debug)]
pub struct FlagSpec {
    /// Canonical long name, e.g. `--format`.
    pub name: &'static str,
    /// Short or alternate spellings, e.g. `-f`.
    pub aliases: &'static [&'static str],
    /// One-line semantics shown to the model.
    pub summary: &'static str,
    /// Domain of the flag's argument (`None` for boolean switches).
    pub value: ValueDomain,
    /// Mutual-exclusion group; flags sharing a group must not co-occur.
    pub group: Option<&'static str>,
}

impl FlagSpec {
    /// Whether `token` spells this flag (canonical name or alias).
    #[must_use]
    pub fn matches(&self, token: &str) -> bool {
        self.name == token || self.aliases.contains(&token)
    }
}

/// Static description of the target tool's flag grammar.
///
/// Process-wide and read-only. The prompt builder renders its summary and the
/// executor validates against it, so there is exactly one place where "what
/// the model is told" and "what is allowed to run" are defined.
#[derive(Debug)]
pub struct CapabilityProfile {
    /// Fixed program name; the first token of every validated command.
    pub program: &'static str,
    /// Flag grammar snapshot version this table was transcribed from.
    pub grammar_version: &'static str,
    /// Legal flags.
    pub flags: &'static [FlagSpec],
    /// Domain for positional (non-flag) arguments.
    pub positional: ValueDomain,
}

impl CapabilityProfile {
    /// Look up the flag spec matching `token`, if any.
    #[must_use]
    pub fn find_flag(&self, token: &str) -> Option<&'static FlagSpec> {
        self.flags.iter().find(|spec| spec.matches(token))
    }

    /// Condensed capability summary for prompt grounding: flag spellings plus
    /// one-line semantics, not the full grammar, to bound prompt size.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for spec in self.flags {
            let mut spellings: Vec<&str> = spec.aliases.to_vec();
            spellings.push(spec.name);
            let arg_hint = match spec.value {
                ValueDomain::None => String::new(),
                domain => format!(" <{}>", domain.describe()),
            };
            let _ = writeln!(out, "  {}{}  {}", spellings.join(", "), arg_hint, spec.summary);
        }
        out
    }
}

/// yt-dlp capability profile.
///
/// A curated subset of the flag grammar: the flags the exemplars teach plus
/// the ones users commonly reach for. Version skew against the installed
/// yt-dlp is an operational risk the pipeline cannot detect; keep
/// `grammar_version` in step with the tool shipped alongside this binary.
pub static YTDLP: CapabilityProfile = CapabilityProfile {
    program: "yt-dlp",
    grammar_version: "2025.06.09",
    flags: &[
        FlagSpec {
            name: "--format",
            aliases: &["-f"],
            summary: "Select the video/audio format to download",
            value: ValueDomain::FormatSelector,
            group: None,
        },
        FlagSpec {
            name: "--extract-audio",
            aliases: &["-x"],
            summary: "Download audio only, discarding the video stream",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--audio-format",
            aliases: &[],
            summary: "Convert extracted audio to this container",
            value: ValueDomain::Keyword(&[
                "best", "aac", "alac", "flac", "m4a", "mp3", "opus", "vorbis", "wav",
            ]),
            group: None,
        },
        FlagSpec {
            name: "--audio-quality",
            aliases: &[],
            summary: "Audio conversion quality, 0 (best) to 10 (worst)",
            value: ValueDomain::Integer { min: 0, max: 10 },
            group: None,
        },
        FlagSpec {
            name: "--output",
            aliases: &["-o"],
            summary: "Output filename template",
            value: ValueDomain::Template,
            group: None,
        },
        FlagSpec {
            name: "--paths",
            aliases: &["-P"],
            summary: "Directory to save downloaded files to",
            value: ValueDomain::Path,
            group: None,
        },
        FlagSpec {
            name: "--playlist-items",
            aliases: &["-I"],
            summary: "Playlist entries to download, e.g. 1-5 or 2,4,6",
            value: ValueDomain::ItemSpec,
            group: None,
        },
        FlagSpec {
            name: "--playlist-start",
            aliases: &[],
            summary: "First playlist entry to download (1-based)",
            value: ValueDomain::Integer { min: 1, max: u64::MAX },
            group: None,
        },
        FlagSpec {
            name: "--playlist-end",
            aliases: &[],
            summary: "Last playlist entry to download",
            value: ValueDomain::Integer { min: 1, max: u64::MAX },
            group: None,
        },
        FlagSpec {
            name: "--max-downloads",
            aliases: &[],
            summary: "Abort after downloading this many files",
            value: ValueDomain::Integer { min: 1, max: u64::MAX },
            group: None,
        },
        FlagSpec {
            name: "--yes-playlist",
            aliases: &[],
            summary: "Treat the URL as a playlist even if it points at a video",
            value: ValueDomain::None,
            group: Some("playlist-mode"),
        },
        FlagSpec {
            name: "--no-playlist",
            aliases: &[],
            summary: "Download only the video when the URL also names a playlist",
            value: ValueDomain::None,
            group: Some("playlist-mode"),
        },
        FlagSpec {
            name: "--write-subs",
            aliases: &[],
            summary: "Download subtitle files",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--write-auto-subs",
            aliases: &[],
            summary: "Download auto-generated subtitles",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--sub-langs",
            aliases: &[],
            summary: "Subtitle languages to download",
            value: ValueDomain::LangList,
            group: None,
        },
        FlagSpec {
            name: "--embed-subs",
            aliases: &[],
            summary: "Embed subtitles into the video file",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--embed-thumbnail",
            aliases: &[],
            summary: "Embed the thumbnail as cover art",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--embed-metadata",
            aliases: &[],
            summary: "Embed metadata into the output file",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--merge-output-format",
            aliases: &[],
            summary: "Container to merge separate video/audio streams into",
            value: ValueDomain::Keyword(&["avi", "flv", "mkv", "mov", "mp4", "webm"]),
            group: None,
        },
        FlagSpec {
            name: "--remux-video",
            aliases: &[],
            summary: "Remux the video into another container without re-encoding",
            value: ValueDomain::Keyword(&["avi", "flv", "mkv", "mov", "mp4", "webm"]),
            group: Some("post-video"),
        },
        FlagSpec {
            name: "--recode-video",
            aliases: &[],
            summary: "Re-encode the video into another container",
            value: ValueDomain::Keyword(&["avi", "flv", "mkv", "mov", "mp4", "webm"]),
            group: Some("post-video"),
        },
        FlagSpec {
            name: "--download-sections",
            aliases: &[],
            summary: "Download only a time section, e.g. *0:30-1:00",
            value: ValueDomain::SectionSpec,
            group: None,
        },
        FlagSpec {
            name: "--limit-rate",
            aliases: &["-r"],
            summary: "Maximum download rate, e.g. 50K or 4.2M",
            value: ValueDomain::SizeSpec,
            group: None,
        },
        FlagSpec {
            name: "--retries",
            aliases: &["-R"],
            summary: "Number of retries for a failing download",
            value: ValueDomain::Integer { min: 0, max: 100 },
            group: None,
        },
        FlagSpec {
            name: "--min-filesize",
            aliases: &[],
            summary: "Skip downloads smaller than this size",
            value: ValueDomain::SizeSpec,
            group: None,
        },
        FlagSpec {
            name: "--max-filesize",
            aliases: &[],
            summary: "Skip downloads larger than this size",
            value: ValueDomain::SizeSpec,
            group: None,
        },
        FlagSpec {
            name: "--dateafter",
            aliases: &[],
            summary: "Only download videos uploaded on or after this date",
            value: ValueDomain::DateSpec,
            group: None,
        },
        FlagSpec {
            name: "--datebefore",
            aliases: &[],
            summary: "Only download videos uploaded on or before this date",
            value: ValueDomain::DateSpec,
            group: None,
        },
        FlagSpec {
            name: "--match-filters",
            aliases: &[],
            summary: "Generic video filter expression",
            value: ValueDomain::Any,
            group: None,
        },
        FlagSpec {
            name: "--concurrent-fragments",
            aliases: &["-N"],
            summary: "Number of fragments to download concurrently",
            value: ValueDomain::Integer { min: 1, max: 32 },
            group: None,
        },
        FlagSpec {
            name: "--continue",
            aliases: &["-c"],
            summary: "Resume partially downloaded files",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--no-overwrites",
            aliases: &["-w"],
            summary: "Never overwrite existing files",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--ignore-errors",
            aliases: &["-i"],
            summary: "Continue with the next video on download errors",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--no-warnings",
            aliases: &[],
            summary: "Suppress warning messages",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--restrict-filenames",
            aliases: &[],
            summary: "Restrict filenames to ASCII and avoid spaces",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--quiet",
            aliases: &["-q"],
            summary: "Activate quiet mode",
            value: ValueDomain::None,
            group: Some("verbosity"),
        },
        FlagSpec {
            name: "--verbose",
            aliases: &["-v"],
            summary: "Print debugging information",
            value: ValueDomain::None,
            group: Some("verbosity"),
        },
        FlagSpec {
            name: "--progress",
            aliases: &[],
            summary: "Show a progress bar even in quiet mode",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--newline",
            aliases: &[],
            summary: "Print the progress bar as new lines",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--skip-download",
            aliases: &[],
            summary: "Do not download the media, only run selected side effects",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--list-formats",
            aliases: &["-F"],
            summary: "List available formats instead of downloading",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--dump-json",
            aliases: &["-j"],
            summary: "Print video metadata as JSON instead of downloading",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--flat-playlist",
            aliases: &[],
            summary: "List playlist entries without resolving each video",
            value: ValueDomain::None,
            group: None,
        },
        FlagSpec {
            name: "--cookies-from-browser",
            aliases: &[],
            summary: "Load cookies from an installed browser",
            value: ValueDomain::Keyword(&[
                "brave", "chrome", "chromium", "edge", "firefox", "opera", "safari", "vivaldi",
            ]),
            group: None,
        },
        FlagSpec {
            name: "--proxy",
            aliases: &[],
            summary: "HTTP/HTTPS/SOCKS proxy URL",
            value: ValueDomain::Url,
            group: None,
        },
    ],
    positional: ValueDomain::Url,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_flag_by_long_name_and_alias() {
        let by_name = YTDLP.find_flag("--format").expect("known flag");
        let by_alias = YTDLP.find_flag("-f").expect("known alias");
        assert_eq!(by_name.name, by_alias.name);
        assert!(YTDLP.find_flag("--no-such-flag").is_none());
    }

    #[test]
    fn integer_domain_accepts_range_bounds() {
        let domain = ValueDomain::Integer { min: 0, max: 10 };
        // Table-driven: every in-range value accepted, every out-of-range rejected.
        for accepted in ["0", "5", "10"] {
            assert!(domain.accepts(accepted), "{accepted} should be in range");
        }
        for rejected in ["11", "-1", "3.5", "abc", ""] {
            assert!(!domain.accepts(rejected), "{rejected} should be out of range");
        }
    }

    #[test]
    fn keyword_domain_is_exact() {
        let spec = YTDLP.find_flag("--audio-format").expect("known flag");
        assert!(spec.value.accepts("mp3"));
        assert!(!spec.value.accepts("mp4"));
        assert!(!spec.value.accepts("MP3"));
    }

    #[test]
    fn item_spec_accepts_slices() {
        for ok in ["1-5", "1,3,7", "2", "1:10:2", ":5"] {
            assert!(ValueDomain::ItemSpec.accepts(ok), "{ok}");
        }
        for bad in ["a-b", "1;2", ""] {
            assert!(!ValueDomain::ItemSpec.accepts(bad), "{bad}");
        }
    }

    #[test]
    fn url_domain_rejects_quotes_and_backticks() {
        assert!(ValueDomain::Url.accepts("https://youtube.com/watch?v=abc&list=xyz"));
        assert!(!ValueDomain::Url.accepts("ftp://example.com/file"));
        assert!(!ValueDomain::Url.accepts("https://x/`whoami`"));
        assert!(!ValueDomain::Url.accepts("not a url"));
    }

    #[test]
    fn summary_names_every_flag() {
        let summary = YTDLP.summary();
        for spec in YTDLP.flags {
            assert!(summary.contains(spec.name), "summary missing {}", spec.name);
        }
        // Condensed: one line per flag.
        assert_eq!(summary.lines().count(), YTDLP.flags.len());
    }

    #[test]
    fn exclusion_groups_are_declared_pairwise() {
        let quiet = YTDLP.find_flag("--quiet").expect("known flag");
        let verbose = YTDLP.find_flag("--verbose").expect("known flag");
        assert_eq!(quiet.group, verbose.group);
        assert!(quiet.group.is_some());
    }
}
