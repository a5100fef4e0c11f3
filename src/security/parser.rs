//! Shell-free command parsing.
//!
//! Turns a raw command line into a tokenized structural form without ever
//! invoking a shell interpreter. Tokenization follows POSIX word-splitting
//! and quoting rules: single and double quotes preserve literal content,
//! backslash escapes outside single quotes are honoured. No variable or glob
//! expansion happens here; anything that would require shell interpretation
//! to run as authored raises `has_shell_metachars` instead, so downstream
//! stages reject on the flag rather than guessing intent.
//!
//! `parse` never fails. Malformed input (unbalanced quotes, trailing escape)
//! yields a best-effort tokenization with the metachar flag set.

/// One word of the tokenized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// True if any part of the word came from inside quotes. Structural
    /// matchers ignore quoted tokens: a command that merely *mentions* a
    /// dangerous shape in a string argument is not that shape.
    pub quoted: bool,
}

/// Structural decomposition of one raw command line. Derived fresh per
/// validation pass and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub raw: String,
    pub tokens: Vec<Token>,
    /// True if executing the raw text as authored would require shell
    /// interpretation: pipes, separators, background `&`, backticks,
    /// `$`-expansion, redirection, subshells, globs, or unbalanced quoting.
    pub has_shell_metachars: bool,
}

impl ParsedCommand {
    /// The argv the execution engine would spawn, in order.
    pub fn argv(&self) -> Vec<&str> {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    /// First word, if any.
    pub fn program(&self) -> Option<&str> {
        self.tokens.first().map(|t| t.text.as_str())
    }

    /// The command words with leading environment assignments (`FOO=bar`)
    /// and a `sudo` prefix (plus its option flags) stripped, so matchers see
    /// the command that actually acts.
    pub fn command_words(&self) -> &[Token] {
        let mut idx = 0;
        while idx < self.tokens.len() {
            let token = &self.tokens[idx];
            if !token.quoted && is_env_assignment(&token.text) {
                idx += 1;
            } else {
                break;
            }
        }
        if self
            .tokens
            .get(idx)
            .is_some_and(|t| !t.quoted && t.text == "sudo")
        {
            idx += 1;
            while self.tokens.get(idx).is_some_and(|t| t.text.starts_with('-')) {
                idx += 1;
            }
        }
        &self.tokens[idx..]
    }

    /// The acting program: first word after env assignments and sudo, with
    /// any path prefix dropped (`/usr/bin/rm` acts as `rm`).
    pub fn effective_program(&self) -> Option<&str> {
        let words = self.command_words();
        let first = words.first()?;
        if first.quoted {
            return Some(first.text.as_str());
        }
        Some(first.text.rsplit('/').next().unwrap_or(&first.text))
    }

    /// Space-joined argv. For input without quoting or metacharacters this
    /// reconstructs an equivalent, re-parseable command.
    pub fn reconstruct(&self) -> String {
        self.argv().join(" ")
    }
}

/// Leading `NAME=value` word, as a shell would treat it.
fn is_env_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Characters that, unquoted, require shell interpretation.
fn is_metachar(c: char) -> bool {
    matches!(
        c,
        '|' | ';' | '&' | '`' | '$' | '<' | '>' | '(' | ')' | '*' | '?' | '[' | '\n'
    )
}

/// Parse a raw command line. Never fails; see module docs.
pub fn parse(raw: &str) -> ParsedCommand {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_quoted = false;
    let mut in_word = false;
    let mut has_metachars = false;

    let mut in_single = false;
    let mut in_double = false;
    let mut chars = raw.chars().peekable();

    let flush = |current: &mut String,
                     current_quoted: &mut bool,
                     in_word: &mut bool,
                     tokens: &mut Vec<Token>| {
        if *in_word {
            tokens.push(Token {
                text: std::mem::take(current),
                quoted: *current_quoted,
            });
            *current_quoted = false;
            *in_word = false;
        }
    };

    while let Some(c) = chars.next() {
        if in_single {
            if c == '\'' {
                in_single = false;
            } else {
                current.push(c);
            }
            continue;
        }
        if c == '\\' && !in_single {
            // Escape: next char is literal. A trailing backslash is
            // malformed; keep it and flag.
            match chars.next() {
                Some(next) => {
                    current.push(next);
                    in_word = true;
                    if in_double {
                        current_quoted = true;
                    }
                }
                None => {
                    current.push('\\');
                    in_word = true;
                    has_metachars = true;
                }
            }
            continue;
        }
        if in_double {
            match c {
                '"' => in_double = false,
                // `$` and backticks expand even inside double quotes; we do
                // not expand, we flag.
                '$' | '`' => {
                    has_metachars = true;
                    current.push(c);
                }
                _ => current.push(c),
            }
            continue;
        }
        match c {
            '\'' => {
                in_single = true;
                in_word = true;
                current_quoted = true;
            }
            '"' => {
                in_double = true;
                in_word = true;
                current_quoted = true;
            }
            c if c.is_whitespace() && c != '\n' => {
                flush(&mut current, &mut current_quoted, &mut in_word, &mut tokens);
            }
            c if is_metachar(c) => {
                has_metachars = true;
                // Metacharacters end the current word and become their own
                // literal token (operator runs like `&&` stay together), so
                // matchers can still see them but nothing re-interprets them.
                flush(&mut current, &mut current_quoted, &mut in_word, &mut tokens);
                current.push(c);
                in_word = true;
                while let Some(&next) = chars.peek() {
                    if !is_metachar(next) {
                        break;
                    }
                    current.push(next);
                    chars.next();
                }
                flush(&mut current, &mut current_quoted, &mut in_word, &mut tokens);
            }
            _ => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_single || in_double {
        // Unbalanced quote: best-effort token, flagged.
        has_metachars = true;
    }
    flush(&mut current, &mut current_quoted, &mut in_word, &mut tokens);

    ParsedCommand {
        raw: raw.to_string(),
        tokens,
        has_shell_metachars: has_metachars,
    }
}

/// Split a raw command line into its chained segments (`;`, `|`, `&`, `&&`,
/// `||`, newlines), respecting quotes. Used by the classifier to scan each
/// clause of a chain; the step itself is never split for execution.
pub fn split_segments(raw: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '\\' if !in_single => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ';' | '\n' if !in_single && !in_double => {
                push_segment(&mut segments, &mut current);
            }
            '|' | '&' if !in_single && !in_double => {
                if chars.peek() == Some(&c) {
                    chars.next();
                }
                push_segment(&mut segments, &mut current);
            }
            _ => current.push(c),
        }
    }
    push_segment(&mut segments, &mut current);
    segments
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    let segment = current.trim();
    if !segment.is_empty() {
        segments.push(segment.to_string());
    }
    current.clear();
}
