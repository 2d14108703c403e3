// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM-based memory extraction from conversations.
//!
//! Long input is chunked, each chunk is sent to the completion service
//! under a strict JSON contract, and replies go through the repair
//! pipeline in [`repair`]. Chunks whose call fails or times out are
//! handled by the keyword fallback. Extraction is pure: nothing is
//! persisted here.

pub mod chunking;
pub mod fallback;
pub mod repair;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use memoria_config::model::{ExtractionConfig, LlmConfig};
use memoria_core::traits::CompletionAdapter;
use memoria_core::types::CompletionRequest;
use memoria_core::MemoriaError;

use crate::category::{Category, CoreCategory};
use crate::domain::{best_family, match_families};
use crate::text::normalize_for_compare;
use crate::types::{ConversationTurn, ExtractedMemory, ExtractionResult, RepairStrategy, render_turns};

use self::repair::ParsedReply;

/// Importance floor for memories the user explicitly asked to keep.
pub const EXPLICIT_IMPORTANCE: u8 = 7;

/// System prompt for memory extraction.
const EXTRACTION_PROMPT: &str = r#"You extract durable personal facts about the user from a conversation so they can be remembered in future conversations.

Respond with exactly one JSON object and nothing else: no markdown, no code fences, no commentary.

{"reasoning": "<one sentence on what you found>",
 "confidence": <number between 0 and 1>,
 "memories": [{"content": "<the fact as a standalone statement>",
               "category": "<category>",
               "importance": <integer 1-10>,
               "tags": ["<lower-case tag>"]}]}

Preferred categories: personal_info, preference, work_context, relationship, health, device, location, goal, skill, event, other. A new short snake_case category is allowed when none fits.

Only include facts stated by the user that are likely to matter later. If there are none, return an empty "memories" array."#;

/// Extracts candidate memories from conversation turns.
pub struct Extractor {
    completer: Arc<dyn CompletionAdapter>,
    chunk_size: usize,
    dedup_similarity: f64,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl Extractor {
    /// Creates a new extractor.
    pub fn new(
        completer: Arc<dyn CompletionAdapter>,
        extraction: &ExtractionConfig,
        llm: &LlmConfig,
    ) -> Self {
        Self {
            completer,
            chunk_size: extraction.chunk_size,
            dedup_similarity: extraction.dedup_similarity,
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            timeout: Duration::from_secs(llm.timeout_secs),
        }
    }

    /// Similarity at which two candidates count as the same memory.
    pub fn dedup_similarity(&self) -> f64 {
        self.dedup_similarity
    }

    /// Extract memories from conversation turns. Never fails.
    ///
    /// Chunks are extracted concurrently, merged in chunk order and
    /// deduplicated. Confidence is the mean over chunks; the reported
    /// strategy is the weakest any chunk needed.
    pub async fn extract(&self, turns: &[ConversationTurn]) -> ExtractionResult {
        let text = render_turns(turns);
        let chunks = chunking::chunk_text(&text, self.chunk_size);
        if chunks.is_empty() {
            return ExtractionResult {
                memories: vec![],
                reasoning: "nothing to extract".to_string(),
                confidence: 0.0,
                strategy: RepairStrategy::Direct,
                chunks: 0,
            };
        }

        let replies: Vec<ParsedReply> =
            join_all(chunks.iter().map(|chunk| self.extract_chunk(chunk))).await;

        let chunk_count = replies.len();
        let confidence =
            replies.iter().map(|r| r.confidence).sum::<f64>() / chunk_count as f64;
        let strategy = replies
            .iter()
            .map(|r| r.strategy)
            .max()
            .unwrap_or(RepairStrategy::Direct);
        let reasoning = replies
            .iter()
            .map(|r| r.reasoning.trim())
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let candidates: Vec<ExtractedMemory> =
            replies.into_iter().flat_map(|r| r.memories).collect();
        let before = candidates.len();
        let memories = dedup_memories(candidates, self.dedup_similarity);

        info!(
            chunks = chunk_count,
            candidates = before,
            memories = memories.len(),
            confidence,
            strategy = %strategy,
            "extraction complete"
        );

        ExtractionResult {
            memories,
            reasoning,
            confidence,
            strategy,
            chunks: chunk_count,
        }
    }

    async fn extract_chunk(&self, chunk: &str) -> ParsedReply {
        match self.call_model(chunk).await {
            Ok(reply) => repair::parse_reply(&reply, chunk),
            Err(e) => {
                warn!(error = %e, "extraction call failed, using keyword fallback");
                crate::telemetry::record_degraded("extraction");
                fallback::keyword_fallback(chunk)
            }
        }
    }

    async fn call_model(&self, chunk: &str) -> Result<String, MemoriaError> {
        let request = CompletionRequest {
            system_prompt: EXTRACTION_PROMPT.to_string(),
            user_prompt: format!("Conversation:\n{chunk}"),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let response = tokio::time::timeout(self.timeout, self.completer.complete(request))
            .await
            .map_err(|_| MemoriaError::Timeout {
                duration: self.timeout,
            })??;
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "extraction reply received"
        );
        Ok(response.text)
    }

    /// Turn an explicit "remember this" request into a single memory.
    ///
    /// Returns `None` when nothing remains after stripping the prefix.
    pub fn extract_explicit(&self, text: &str) -> Option<ExtractedMemory> {
        explicit_memory(text)
    }
}

/// Build a manual memory from user text, guessing the category from the
/// domain keyword families.
pub fn explicit_memory(text: &str) -> Option<ExtractedMemory> {
    let content = strip_remember_prefix(text);
    if content.is_empty() {
        return None;
    }
    let (category, importance, tags) = match best_family(content) {
        Some(family) => {
            let tags = match_families(content)
                .into_iter()
                .find(|m| m.family.name == family.name)
                .map(|m| m.matched.iter().take(3).map(|k| k.to_string()).collect())
                .unwrap_or_default();
            (
                Category::from(family.category),
                family.importance.max(EXPLICIT_IMPORTANCE),
                tags,
            )
        }
        None => (
            Category::from(CoreCategory::Other),
            EXPLICIT_IMPORTANCE,
            vec![],
        ),
    };
    Some(ExtractedMemory {
        content: content.to_string(),
        category,
        tags,
        importance,
        source_excerpt: text.trim().to_string(),
    })
}

/// Strip "remember this:", "remember that", etc. prefixes from explicit memory text.
pub fn strip_remember_prefix(text: &str) -> &str {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    let prefixes = [
        "please remember this:",
        "please remember that",
        "please remember:",
        "please remember ",
        "remember this:",
        "remember that:",
        "remember:",
        "remember this ",
        "remember that ",
        "remember ",
        "记住：",
        "记住:",
        "记住",
    ];

    for prefix in &prefixes {
        if lower.starts_with(prefix) && trimmed.is_char_boundary(prefix.len()) {
            return trimmed[prefix.len()..].trim();
        }
    }

    trimmed
}

/// True if two candidates describe the same fact.
///
/// Requires the same category, then any of: equal normalized content,
/// normalized Levenshtein similarity at or above `threshold`, or one
/// containing the other with a length ratio of at most 1.5.
pub fn is_duplicate(
    a_category: &Category,
    a_content: &str,
    b_category: &Category,
    b_content: &str,
    threshold: f64,
) -> bool {
    if a_category != b_category {
        return false;
    }
    let a = normalize_for_compare(a_content);
    let b = normalize_for_compare(b_content);
    if a == b {
        return true;
    }
    if strsim::normalized_levenshtein(&a, &b) >= threshold {
        return true;
    }
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (&a, &b)
    } else {
        (&b, &a)
    };
    let shorter_len = shorter.chars().count();
    shorter_len > 0
        && longer.contains(shorter.as_str())
        && longer.chars().count() as f64 / shorter_len as f64 <= 1.5
}

/// Collapse duplicates, keeping the first occurrence. The survivor takes
/// the higher importance and the union of tags.
pub fn dedup_memories(candidates: Vec<ExtractedMemory>, threshold: f64) -> Vec<ExtractedMemory> {
    let mut kept: Vec<ExtractedMemory> = Vec::new();
    for candidate in candidates {
        let existing = kept.iter_mut().find(|k| {
            is_duplicate(
                &k.category,
                &k.content,
                &candidate.category,
                &candidate.content,
                threshold,
            )
        });
        match existing {
            Some(survivor) => {
                survivor.importance = survivor.importance.max(candidate.importance);
                for tag in candidate.tags {
                    if !survivor.tags.contains(&tag) {
                        survivor.tags.push(tag);
                    }
                }
            }
            None => kept.push(candidate),
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_test_utils::MockCompleter;

    fn extractor(completer: Arc<MockCompleter>, chunk_size: usize) -> Extractor {
        let extraction = ExtractionConfig {
            chunk_size,
            ..Default::default()
        };
        Extractor::new(completer, &extraction, &LlmConfig::default())
    }

    fn candidate(content: &str, category: &str, importance: u8) -> ExtractedMemory {
        ExtractedMemory {
            content: content.to_string(),
            category: Category::from(category),
            tags: vec![],
            importance,
            source_excerpt: String::new(),
        }
    }

    #[tokio::test]
    async fn extracts_from_model_reply() {
        let completer = Arc::new(MockCompleter::new(vec![
            r#"{"reasoning":"moved","confidence":0.9,"memories":[{"content":"The user lives in Seattle","category":"location","importance":8,"tags":["seattle"]}]}"#.to_string(),
        ]));
        let result = extractor(completer.clone(), 8000)
            .extract(&[ConversationTurn::user("I live in Seattle")])
            .await;

        assert_eq!(result.strategy, RepairStrategy::Direct);
        assert_eq!(result.chunks, 1);
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.memories[0].importance, 8);
        assert_eq!(completer.call_count(), 1);
        let request = completer.last_request().unwrap();
        assert_eq!(request.temperature, 0.0);
        assert!(request.user_prompt.contains("user: I live in Seattle"));
    }

    #[tokio::test]
    async fn failing_model_uses_keyword_fallback() {
        let completer = Arc::new(MockCompleter::failing());
        let result = extractor(completer, 8000)
            .extract(&[ConversationTurn::user("My new laptop is a ThinkPad")])
            .await;

        assert_eq!(result.strategy, RepairStrategy::KeywordFallback);
        assert_eq!(result.confidence, fallback::FALLBACK_CONFIDENCE);
        assert_eq!(result.memories[0].category.as_str(), "device");
    }

    #[tokio::test]
    async fn chunks_are_merged_and_deduplicated() {
        let reply = r#"{"reasoning":"r","confidence":0.8,"memories":[{"content":"Has a dog named Max","category":"relationship"}]}"#;
        let truncated = r#"{"reasoning":"r2","confidence":0.4,"memories":[{"content":"has a dog named max.","category":"relationship","importance":9},{"content":"Lik"#;
        let completer = Arc::new(MockCompleter::new(vec![
            reply.to_string(),
            truncated.to_string(),
        ]));
        let turns = vec![
            ConversationTurn::user("My dog is named Max and he is great."),
            ConversationTurn::user("Max the dog loves long walks by the lake."),
        ];
        let result = extractor(completer.clone(), 60).extract(&turns).await;

        assert_eq!(result.chunks, 2);
        assert_eq!(completer.call_count(), 2);
        assert_eq!(result.strategy, RepairStrategy::Structural);
        assert!((result.confidence - 0.6).abs() < 1e-9);
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.memories[0].importance, 9);
    }

    #[tokio::test]
    async fn empty_conversation_makes_no_call() {
        let completer = Arc::new(MockCompleter::new(vec![]));
        let result = extractor(completer.clone(), 8000).extract(&[]).await;
        assert_eq!(result.chunks, 0);
        assert_eq!(completer.call_count(), 0);
    }

    #[test]
    fn duplicate_rules() {
        let location = Category::from("location");
        let other = Category::from("other");
        assert!(is_duplicate(&location, "I live in Seattle", &location, "i live in seattle.", 0.85));
        assert!(is_duplicate(&location, "I live in Seattle", &location, "I live in Seattle, WA", 0.85));
        assert!(!is_duplicate(&location, "I live in Seattle", &other, "I live in Seattle", 0.85));
        assert!(!is_duplicate(&location, "Seattle", &location, "Grew up far away from Seattle", 0.85));
        assert!(!is_duplicate(&location, "I live in Seattle", &location, "I live in Portland", 0.85));
    }

    #[test]
    fn dedup_keeps_first_and_merges() {
        let mut a = candidate("Likes green tea", "preference", 4);
        a.tags = vec!["tea".to_string()];
        let mut b = candidate("likes green tea!", "preference", 6);
        b.tags = vec!["drinks".to_string()];
        let c = candidate("Likes green tea", "health", 3);

        let kept = dedup_memories(vec![a, b, c], 0.85);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "Likes green tea");
        assert_eq!(kept[0].importance, 6);
        assert_eq!(kept[0].tags, vec!["tea", "drinks"]);
    }

    #[test]
    fn explicit_memory_strips_prefix_and_guesses_category() {
        let memory = explicit_memory("Remember this: I am allergic to peanuts").unwrap();
        assert_eq!(memory.content, "I am allergic to peanuts");
        assert_eq!(memory.category.as_str(), "health");
        assert_eq!(memory.importance, 8);
        assert_eq!(memory.tags, vec!["allergic"]);

        let memory = explicit_memory("remember that the wifi password is on the fridge").unwrap();
        assert_eq!(memory.category.as_str(), "other");
        assert_eq!(memory.importance, EXPLICIT_IMPORTANCE);

        assert!(explicit_memory("remember:   ").is_none());
    }

    #[test]
    fn strip_remember_prefix_variants() {
        assert_eq!(strip_remember_prefix("remember this: my dog is Max"), "my dog is Max");
        assert_eq!(strip_remember_prefix("Remember that I use vim"), "I use vim");
        assert_eq!(strip_remember_prefix("记住：我喜欢茶"), "我喜欢茶");
        assert_eq!(strip_remember_prefix("my dog is Max"), "my dog is Max");
    }
}
