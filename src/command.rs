//! Candidate command representation and command-line tokenization.

use std::borrow::Cow;

/// Ordered token sequence extracted from a model reply.
///
/// Unvalidated by construction: nothing here may be executed until it has
/// passed [`crate::exec::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCommand {
    tokens: Vec<String>,
}

impl CandidateCommand {
    /// Wrap an already-tokenized command line.
    #[must_use]
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// All tokens, program name first.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The program name (first token), if any.
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Render the command the way a user would type it, quoting where needed.
    #[must_use]
    pub fn display(&self) -> String {
        render_tokens(&self.tokens)
    }
}

/// Shell-quote and join tokens for display. Display only: execution always
/// goes through an argument array, never through a rendered string.
#[must_use]
pub fn render_tokens(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| {
            if needs_quoting(t) {
                shell_escape::escape(Cow::from(t.as_str())).into_owned()
            } else {
                t.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokens made only of characters a shell passes through verbatim are shown
/// unquoted; everything else goes through shell-escape.
fn needs_quoting(token: &str) -> bool {
    token.is_empty()
        || !token.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '-' | '_' | '=' | '/' | ',' | '.' | '+' | ':' | '%' | '@')
        })
}

/// Split a command line into tokens, honoring single quotes, double quotes
/// and backslash escapes (outside single quotes).
///
/// Returns `None` when a quote is left unbalanced.
#[must_use]
pub fn split_command_line(line: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    #[derive(PartialEq)]
    enum Quote {
        No,
        Single,
        Double,
    }
    let mut quote = Quote::No;

    while let Some(ch) = chars.next() {
        match quote {
            Quote::Single => {
                if ch == '\'' {
                    quote = Quote::No;
                } else {
                    current.push(ch);
                }
            }
            Quote::Double => match ch {
                '"' => quote = Quote::No,
                '\\' => {
                    let escaped = chars.next()?;
                    current.push(escaped);
                }
                _ => current.push(ch),
            },
            Quote::No => match ch {
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => {
                    let escaped = chars.next()?;
                    current.push(escaped);
                    in_token = true;
                }
                _ => {
                    current.push(ch);
                    in_token = true;
                }
            },
        }
    }

    if quote != Quote::No {
        return None;
    }
    if in_token {
        tokens.push(current);
    }
    Some(tokens)
}
