// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Diagnostics for configuration failures.
//!
//! Figment errors are turned into [`ConfigError`] values that miette renders
//! with the offending TOML line highlighted and, for misspelled keys, a
//! "did you mean" hint ranked by Jaro-Winkler similarity.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use figment::error::Kind;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Similarity a candidate key must exceed before it is offered as a fix.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration error with enough context for a readable report.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(memoria::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Closest valid key, if any is close enough.
        suggestion: Option<String>,
        /// Comma-separated keys accepted by the enclosing section.
        valid_keys: String,
        #[label("not a recognized key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong TOML type, e.g. a string for `batch.batch_size`.
    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(memoria::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// Dotted path of the key, e.g. `batch.batch_size`.
        key: String,
        detail: String,
        expected: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(memoria::config::missing_key),
        help("add `{key} = <value>` to your memoria.toml")
    )]
    MissingKey { key: String },

    /// A value that parsed but violates a semantic constraint.
    #[error("validation error: {message}")]
    #[diagnostic(code(memoria::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(memoria::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// TOML texts the configuration was read from, keyed by display path.
struct Sources<'a>(&'a [(String, String)]);

impl<'a> Sources<'a> {
    /// Pick the text an error came from.
    ///
    /// Falls back to the only source when figment recorded no file origin,
    /// which is the case for configuration loaded from a string.
    fn origin_of(&self, error: &figment::Error) -> Option<&'a (String, String)> {
        let origin = error
            .metadata
            .as_ref()
            .and_then(|m| m.source.as_ref())
            .and_then(|source| match source {
                figment::Source::File(path) => Some(path.display().to_string()),
                _ => None,
            });
        match origin {
            Some(path) => self.0.iter().find(|(p, _)| *p == path),
            None if self.0.len() == 1 => self.0.first(),
            None => None,
        }
    }

    /// Span of `key` inside the table at `section`, with its source.
    fn locate(
        &self,
        error: &figment::Error,
        section: &[String],
        key: &str,
    ) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
        let Some((path, content)) = self.origin_of(error) else {
            return (None, None);
        };
        match find_key_offset(content, section, key) {
            Some(offset) => (
                Some(SourceSpan::new(offset.into(), key.len())),
                Some(NamedSource::new(path, content.clone())),
            ),
            None => (None, None),
        }
    }
}

impl ConfigError {
    fn from_figment(error: &figment::Error, sources: &Sources<'_>) -> Self {
        let path: Vec<String> = error.path.iter().map(|s| s.to_string()).collect();
        match &error.kind {
            Kind::UnknownField(field, expected) => {
                let (span, src) = sources.locate(error, enclosing(&path, field), field);
                ConfigError::UnknownKey {
                    key: field.clone(),
                    suggestion: suggest_key(field, expected),
                    valid_keys: expected.join(", "),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => ConfigError::MissingKey {
                key: dotted(enclosing(&path, field), field),
            },
            Kind::InvalidType(actual, expected) => {
                // The error path ends with the key itself.
                let (span, src) = match path.split_last() {
                    Some((key, section)) => sources.locate(error, section, key),
                    None => (None, None),
                };
                ConfigError::InvalidType {
                    key: path.join("."),
                    detail: format!("found {actual}, expected {expected}"),
                    expected: expected.to_string(),
                    span,
                    src,
                }
            }
            _ => ConfigError::Other(error.to_string()),
        }
    }
}

/// The table holding `key`, given an error path that may already end with it.
fn enclosing<'p>(path: &'p [String], key: &str) -> &'p [String] {
    match path.split_last() {
        Some((last, section)) if last == key => section,
        _ => path,
    }
}

fn dotted(section: &[String], key: &str) -> String {
    if section.is_empty() {
        key.to_string()
    } else {
        format!("{}.{key}", section.join("."))
    }
}

/// Convert a `figment::Error` (which may carry several failures) into diagnostics.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    let sources = Sources(toml_sources);
    err.into_iter()
        .map(|error| ConfigError::from_figment(&error, &sources))
        .collect()
}

/// Byte offset of `key` at the start of a line inside the `[section]` table.
///
/// Nested sections are matched by their dotted header (`[a.b]`). The scan
/// stops at the next table header, so a key of the same name in a later
/// section is not reported.
pub fn find_key_offset(content: &str, section: &[String], key: &str) -> Option<usize> {
    let mut in_section = section.is_empty();
    let header = format!("[{}]", section.join("."));
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') {
            if in_section && !section.is_empty() {
                return None;
            }
            in_section = trimmed.trim_end() == header;
        } else if in_section {
            if let Some(rest) = trimmed.strip_prefix(key) {
                if rest.trim_start().starts_with('=') {
                    return Some(offset + (line.len() - trimmed.len()));
                }
            }
        }
        offset += line.len();
    }
    None
}

/// Suggest the valid key closest to `unknown`.
///
/// Dashes are read as underscores first, so `expiry-secs` maps straight to
/// `expiry_secs`; otherwise the best Jaro-Winkler match above the
/// threshold wins.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    let normalized = unknown.to_ascii_lowercase().replace('-', "_");
    if let Some(exact) = valid_keys.iter().find(|k| **k == normalized) {
        return Some(exact.to_string());
    }

    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(&normalized, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Render a list of `ConfigError`s to stderr using miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}
