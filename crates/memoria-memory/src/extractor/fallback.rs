// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rule-based extraction used when the model is unavailable or its reply
//! cannot be parsed. Never fails.

use crate::category::Category;
use crate::domain::match_families;
use crate::text::split_sentences;
use crate::types::{ExtractedMemory, RepairStrategy};

use super::repair::ParsedReply;

/// Confidence reported for keyword-fallback results.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

const MAX_TAGS: usize = 3;

/// Scan the user's lines of `source` for domain keyword families and emit
/// at most one memory per matched family: the first sentence that hit it.
pub fn keyword_fallback(source: &str) -> ParsedReply {
    let sentences = user_sentences(source);
    let mut memories: Vec<ExtractedMemory> = Vec::new();
    let mut seen_families: Vec<&'static str> = Vec::new();

    for sentence in &sentences {
        for hit in match_families(sentence) {
            if seen_families.contains(&hit.family.name) {
                continue;
            }
            seen_families.push(hit.family.name);

            let mut tags = vec![hit.family.name.to_string()];
            tags.extend(
                hit.matched
                    .iter()
                    .filter(|kw| **kw != hit.family.name)
                    .take(MAX_TAGS)
                    .map(|kw| kw.to_string()),
            );
            memories.push(ExtractedMemory {
                content: sentence.clone(),
                category: Category::from(hit.family.category),
                tags,
                importance: hit.family.importance,
                source_excerpt: sentence.clone(),
            });
        }
    }

    ParsedReply {
        reasoning: format!(
            "keyword fallback matched {} domain famil{}",
            memories.len(),
            if memories.len() == 1 { "y" } else { "ies" }
        ),
        memories,
        confidence: FALLBACK_CONFIDENCE,
        strategy: RepairStrategy::KeywordFallback,
    }
}

/// Sentences from user turns with their `user:` prefix removed. Text
/// without role prefixes is treated as entirely user-authored.
fn user_sentences(source: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        let lower = line.to_lowercase();
        if lower.starts_with("assistant:") || lower.starts_with("system:") {
            continue;
        }
        let text = if lower.starts_with("user:") {
            line["user:".len()..].trim()
        } else {
            line
        };
        sentences.extend(
            split_sentences(text)
                .into_iter()
                .map(|s| s.to_string())
                .filter(|s| s.chars().count() > 3),
        );
    }
    sentences
}
