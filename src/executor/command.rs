//! Curl-style command lines.
//!
//! Action commands describe a request the way one would type it for curl:
//!
//! ```text
//! -X POST -H 'Accept: application/json' -F cmd=activate /bin/replicate.json
//! ```
//!
//! Supported flags: `-X/--request`, `-H/--header`, `-d/--data`, `-F/--form`,
//! `-u/--user`. Exactly one bare token is the URL.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command is empty")]
    Empty,
    #[error("unterminated quote in command")]
    UnterminatedQuote,
    #[error("flag '{0}' expects a value")]
    MissingValue(String),
    #[error("unsupported flag '{0}'")]
    UnknownFlag(String),
    #[error("malformed header '{0}' (expected 'Name: value')")]
    InvalidHeader(String),
    #[error("malformed form field '{0}' (expected 'name=value')")]
    InvalidForm(String),
    #[error("command has no URL")]
    MissingUrl,
    #[error("command has more than one URL ('{0}' and '{1}')")]
    MultipleUrls(String, String),
    #[error("command mixes --data and --form bodies")]
    ConflictingBody,
}

/// A request described by a command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub method: Option<String>,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub data: Option<String>,
    pub form: Vec<(String, String)>,
    pub user: Option<(String, String)>,
}

impl CommandSpec {
    /// Explicit method, or GET / POST depending on whether a body is present.
    pub fn method(&self) -> String {
        match &self.method {
            Some(m) => m.to_uppercase(),
            None if self.data.is_some() || !self.form.is_empty() => "POST".to_string(),
            None => "GET".to_string(),
        }
    }

    pub fn parse(command: &str) -> Result<Self, CommandError> {
        let tokens = lex(command)?;
        if tokens.is_empty() {
            return Err(CommandError::Empty);
        }

        let mut spec = CommandSpec::default();
        let mut url: Option<String> = None;
        let mut iter = tokens.into_iter();

        while let Some(token) = iter.next() {
            if !token.starts_with('-') || token == "-" {
                if let Some(existing) = url.take() {
                    return Err(CommandError::MultipleUrls(existing, token));
                }
                url = Some(token);
                continue;
            }

            let (flag, inline) = split_flag(&token);
            let mut value = || -> Result<String, CommandError> {
                match &inline {
                    Some(v) => Ok(v.clone()),
                    None => iter
                        .next()
                        .ok_or_else(|| CommandError::MissingValue(flag.clone())),
                }
            };

            match flag.as_str() {
                "-X" | "--request" => spec.method = Some(value()?),
                "-H" | "--header" => {
                    let raw = value()?;
                    let (name, val) = raw
                        .split_once(':')
                        .ok_or_else(|| CommandError::InvalidHeader(raw.clone()))?;
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(CommandError::InvalidHeader(raw.clone()));
                    }
                    spec.headers.push((name.to_string(), val.trim().to_string()));
                }
                "-d" | "--data" => {
                    let raw = value()?;
                    spec.data = Some(match spec.data.take() {
                        Some(prev) => format!("{prev}&{raw}"),
                        None => raw,
                    });
                }
                "-F" | "--form" => {
                    let raw = value()?;
                    let (name, val) = raw
                        .split_once('=')
                        .ok_or_else(|| CommandError::InvalidForm(raw.clone()))?;
                    spec.form.push((name.to_string(), val.to_string()));
                }
                "-u" | "--user" => {
                    let raw = value()?;
                    let (user, pass) = raw.split_once(':').unwrap_or((raw.as_str(), ""));
                    spec.user = Some((user.to_string(), pass.to_string()));
                }
                _ => return Err(CommandError::UnknownFlag(flag.clone())),
            }
        }

        if spec.data.is_some() && !spec.form.is_empty() {
            return Err(CommandError::ConflictingBody);
        }
        spec.url = url.ok_or(CommandError::MissingUrl)?;
        Ok(spec)
    }
}

/// `-XPOST` and `--request=POST` carry their value inline.
fn split_flag(token: &str) -> (String, Option<String>) {
    if let Some(long) = token.strip_prefix("--") {
        return match long.split_once('=') {
            Some((name, v)) => (format!("--{name}"), Some(v.to_string())),
            None => (token.to_string(), None),
        };
    }
    if token.len() > 2 && token.is_char_boundary(2) {
        return (token[..2].to_string(), Some(token[2..].to_string()));
    }
    (token.to_string(), None)
}

/// Split on whitespace, honoring single quotes, double quotes and backslash escapes.
pub(crate) fn lex(input: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(CommandError::UnterminatedQuote),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '\\' => {
                // a trailing backslash-newline is a line continuation
                if let Some(ch) = chars.next().filter(|ch| *ch != '\n') {
                    in_token = true;
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Render `token` so that [`lex`] reads it back as exactly one token.
pub(crate) fn quote(token: &str) -> String {
    let bare = !token.is_empty()
        && !token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\'));
    if bare {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', r"'\''"))
}
