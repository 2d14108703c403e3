// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing model replies into extraction results.
//!
//! Each [`RepairStrategy`] is a separate function. [`parse_reply`] tries
//! them in order and stops at the first that yields a value; the keyword
//! fallback at the end cannot fail.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::category::CategoryRegistry;
use crate::text::{content_words, split_sentences, truncate_chars};
use crate::types::{DEFAULT_IMPORTANCE, ExtractedMemory, RepairStrategy, clamp_importance};

use super::fallback;

/// Confidence assumed when a parsed reply omits it.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const EXCERPT_CHARS: usize = 200;

static REASONING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""reasoning"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static CONFIDENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""confidence"\s*:\s*"?(-?\d+(?:\.\d+)?)"#).unwrap());

/// A reply turned into memories by one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub memories: Vec<ExtractedMemory>,
    pub reasoning: String,
    pub confidence: f64,
    pub strategy: RepairStrategy,
}

/// Run the strategies in order over `reply`. `source` is the text the
/// model was shown; it feeds excerpts and the keyword fallback.
pub fn parse_reply(reply: &str, source: &str) -> ParsedReply {
    if let Some(value) = direct(reply) {
        if let Some(parsed) = interpret(value, source, RepairStrategy::Direct) {
            return parsed;
        }
    }
    if let Some(value) = structural(reply) {
        if let Some(parsed) = interpret(value, source, RepairStrategy::Structural) {
            debug!("extraction reply needed structural repair");
            return parsed;
        }
    }
    if let Some(parsed) = salvage(reply) {
        debug!("extraction reply salvaged without memories");
        return parsed;
    }
    debug!("extraction reply unusable, running keyword fallback");
    fallback::keyword_fallback(source)
}

/// Strip code fences, then parse. Prose around a single top-level object
/// is tolerated.
pub fn direct(reply: &str) -> Option<Value> {
    let body = strip_code_fences(reply);
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Some(value);
    }
    let start = body.find(['{', '['])?;
    let close = if body[start..].starts_with('{') { '}' } else { ']' };
    let end = body.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

struct Frame {
    open: char,
    start: usize,
    /// Byte offset just past the last complete member of this container.
    last_safe: usize,
    expect_key: bool,
}

/// Lexical repair of truncated or unbalanced JSON.
///
/// Scans once, tracking open containers. For truncated input: an
/// incomplete element of an array is cut whole; otherwise an open value
/// string is closed, a dangling key gets a default (`[]` for list-valued
/// keys, `null` otherwise) or a partial member is dropped. Trailing commas
/// are removed and open containers closed in stack order.
pub fn structural(reply: &str) -> Option<Value> {
    let body = strip_code_fences(reply);
    let start = body.find(['{', '['])?;
    let text = &body[start..];

    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut string_is_key = false;
    let mut string_start = 0;
    let mut after_colon = false;
    let mut last_key = String::new();
    let mut complete_at = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if let Some(top) = stack.last_mut() {
                    if string_is_key {
                        last_key = text[string_start + 1..i].to_string();
                        top.expect_key = false;
                    } else {
                        top.last_safe = i + 1;
                    }
                }
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                string_is_key = stack.last().is_some_and(|f| f.open == '{' && f.expect_key);
                string_start = i;
                after_colon = false;
            }
            '{' | '[' => {
                after_colon = false;
                stack.push(Frame {
                    open: c,
                    start: i,
                    last_safe: i + 1,
                    expect_key: c == '{',
                });
            }
            '}' | ']' => {
                let frame = stack.pop()?;
                let expected = if frame.open == '{' { '}' } else { ']' };
                if c != expected {
                    return None;
                }
                match stack.last_mut() {
                    Some(parent) => parent.last_safe = i + 1,
                    None => {
                        complete_at = Some(i + 1);
                        break;
                    }
                }
            }
            ',' => {
                after_colon = false;
                if let Some(top) = stack.last_mut() {
                    top.last_safe = i;
                    top.expect_key = top.open == '{';
                }
            }
            ':' => after_colon = true,
            c if c.is_whitespace() => {}
            _ => after_colon = false,
        }
    }

    if let Some(end) = complete_at {
        return serde_json::from_str(&strip_trailing_commas(&text[..end])).ok();
    }

    // Truncated. Cut the outermost incomplete array element, if any.
    if let Some(cut) = (1..stack.len()).find(|&i| stack[i - 1].open == '[') {
        let cut_at = stack[cut].start;
        stack.truncate(cut);
        let candidate = close_stack(&text[..cut_at], &stack);
        return serde_json::from_str(&strip_trailing_commas(&candidate)).ok();
    }

    let innermost_safe = stack.last().map_or(0, |f| f.last_safe);
    let mut patched = text.to_string();
    if in_string {
        if string_is_key {
            patched.truncate(innermost_safe);
        } else {
            patched.push('"');
        }
    } else if after_colon {
        patched.push_str(match last_key.as_str() {
            "tags" | "memories" => "[]",
            _ => "null",
        });
    }

    let candidates = [
        close_stack(&patched, &stack),
        close_stack(&text[..innermost_safe], &stack),
    ];
    candidates
        .iter()
        .find_map(|candidate| serde_json::from_str(&strip_trailing_commas(candidate)).ok())
}

fn close_stack(body: &str, stack: &[Frame]) -> String {
    let mut out = body.trim_end().to_string();
    while out.ends_with(',') {
        out.pop();
        out.truncate(out.trim_end().len());
    }
    for frame in stack.iter().rev() {
        out.push(if frame.open == '{' { '}' } else { ']' });
    }
    out
}

/// Remove commas that directly precede a closing bracket, outside strings.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Recover `reasoning` and `confidence` by pattern; memories are dropped.
pub fn salvage(reply: &str) -> Option<ParsedReply> {
    let reasoning = REASONING_RE
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("\\\"", "\"").replace("\\n", "\n"));
    let confidence = CONFIDENCE_RE
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    if reasoning.is_none() && confidence.is_none() {
        return None;
    }
    Some(ParsedReply {
        memories: vec![],
        reasoning: reasoning.unwrap_or_default(),
        confidence: clamp_confidence(confidence.unwrap_or(0.0)),
        strategy: RepairStrategy::Salvage,
    })
}

/// Turn a parsed JSON value into a reply. Scalars are not a usable reply.
fn interpret(value: Value, source: &str, strategy: RepairStrategy) -> Option<ParsedReply> {
    let (reasoning, confidence, items) = match value {
        Value::Object(mut map) => {
            let reasoning = map
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let confidence = map
                .get("confidence")
                .and_then(number_like)
                .unwrap_or(DEFAULT_CONFIDENCE);
            let items = match map.remove("memories") {
                Some(Value::Array(items)) => items,
                _ => vec![],
            };
            (reasoning, confidence, items)
        }
        Value::Array(items) => (String::new(), DEFAULT_CONFIDENCE, items),
        _ => return None,
    };

    let memories = items
        .iter()
        .filter_map(|item| memory_from_value(item, source))
        .collect();
    Some(ParsedReply {
        memories,
        reasoning,
        confidence: clamp_confidence(confidence),
        strategy,
    })
}

fn memory_from_value(item: &Value, source: &str) -> Option<ExtractedMemory> {
    let obj = item.as_object()?;
    let content = obj.get("content")?.as_str()?.trim();
    if content.is_empty() {
        return None;
    }
    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .map(CategoryRegistry::resolve)
        .unwrap_or_default();
    let importance = obj
        .get("importance")
        .and_then(number_like)
        .map(|n| clamp_importance(n.round() as i64))
        .unwrap_or(DEFAULT_IMPORTANCE);
    let tags = match obj.get("tags") {
        Some(Value::Array(tags)) => normalize_tags(tags.iter().filter_map(Value::as_str)),
        Some(Value::String(tags)) => normalize_tags(tags.split(',')),
        _ => vec![],
    };
    Some(ExtractedMemory {
        content: content.to_string(),
        category,
        tags,
        importance,
        source_excerpt: best_excerpt(source, content),
    })
}

/// A JSON number, or a string holding one.
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn normalize_tags<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// The sentence of `source` sharing the most content words with `content`.
pub(crate) fn best_excerpt(source: &str, content: &str) -> String {
    let wanted = content_words(content);
    let best = split_sentences(source)
        .into_iter()
        .map(|sentence| {
            let words = content_words(sentence);
            let overlap = wanted.iter().filter(|w| words.contains(w)).count();
            (overlap, sentence)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .max_by_key(|(overlap, _)| *overlap);
    let excerpt = match best {
        Some((_, sentence)) => sentence,
        None => source.trim(),
    };
    truncate_chars(excerpt, EXCERPT_CHARS).to_string()
}
