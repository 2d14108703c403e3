// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory domain types for the long-term memory system.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::category::Category;

/// Lowest importance a stored memory can carry.
pub const MIN_IMPORTANCE: u8 = 1;
/// Highest importance a stored memory can carry.
pub const MAX_IMPORTANCE: u8 = 10;
/// Importance assigned when the model omits one.
pub const DEFAULT_IMPORTANCE: u8 = 5;

/// A single memory fact stored by the memory system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Store-assigned identifier (UUID v4).
    pub id: String,
    /// Owner; every query is scoped to this.
    pub user_id: String,
    /// The fact itself.
    pub content: String,
    /// Normalized category.
    pub category: Category,
    /// Importance in `1..=10`.
    pub importance: u8,
    /// Informational tags, not used for uniqueness.
    pub tags: Vec<String>,
    /// Embedding vector. `None` restricts the memory to keyword/index search.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// How this memory was created.
    pub source: MemorySource,
    /// ISO 8601 creation timestamp.
    pub timestamp: String,
    /// ISO 8601 timestamp of the last retrieval that surfaced this memory.
    pub last_accessed: Option<String>,
    /// Number of retrievals that surfaced this memory.
    pub access_count: u64,
}

/// Input to [`crate::store::MemoryStore::insert`].
///
/// Importance and category are clamped/normalized by the store regardless
/// of what the caller passes.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub content: String,
    pub category: String,
    pub importance: i64,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub source: MemorySource,
}

/// How a memory was created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemorySource {
    /// Extracted from conversation turns.
    Conversation,
    /// The user explicitly asked to remember something.
    Manual,
    /// Imported from an uploaded document.
    Upload,
}

impl MemorySource {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Conversation => "conversation",
            MemorySource::Manual => "manual",
            MemorySource::Upload => "upload",
        }
    }

    /// Parse from SQLite string. Unknown values read as `Conversation`.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "manual" => MemorySource::Manual,
            "upload" => MemorySource::Upload,
            _ => MemorySource::Conversation,
        }
    }
}

/// Filter for [`crate::store::MemoryStore::get`].
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub category: Option<Category>,
    pub source: Option<MemorySource>,
    pub min_importance: Option<u8>,
}

/// One conversation turn handed to the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Render turns as `role: content` lines, the form the extractor sees.
pub fn render_turns(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A candidate memory produced by the extractor, before dedup and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub content: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub importance: u8,
    /// The slice of input the candidate was drawn from.
    pub source_excerpt: String,
}

/// Which stage of the parse pipeline produced an extraction result.
///
/// Ordered from strongest to weakest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RepairStrategy {
    /// The response parsed after stripping code fences.
    Direct,
    /// Lexical repair of truncated or unbalanced JSON.
    Structural,
    /// Regex recovery of `reasoning` and `confidence` only.
    Salvage,
    /// Rule-based extraction over the raw input text.
    KeywordFallback,
}

/// Result of [`crate::extractor::Extractor::extract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub memories: Vec<ExtractedMemory>,
    pub reasoning: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Weakest strategy any chunk needed.
    pub strategy: RepairStrategy,
    /// Number of chunks the input was split into.
    pub chunks: usize,
}

/// Where a search hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchType {
    Vector,
    Keyword,
    Semantic,
    Index,
    /// Found by more than one stage.
    Hybrid,
}

/// A memory with its retrieval scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// Best stage score before ranking.
    pub raw_score: f64,
    /// Score after importance and recency adjustment.
    pub score: f64,
    pub match_type: MatchType,
}

/// Outcome of a hybrid search. Never an error: failures are reported inline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// `(stage, message)` for every stage that failed.
    pub stage_errors: Vec<(String, String)>,
    /// Set only when every stage failed.
    pub error: Option<String>,
}

/// Clamp an arbitrary importance to `1..=10`.
pub fn clamp_importance(value: i64) -> u8 {
    value.clamp(i64::from(MIN_IMPORTANCE), i64::from(MAX_IMPORTANCE)) as u8
}

/// Current UTC time in the ISO 8601 format used by every timestamp column.
pub fn now_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Whole days elapsed since `timestamp`, 0 for future or unparseable values.
pub fn days_since(timestamp: &str, now: chrono::DateTime<chrono::Utc>) -> f64 {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|ts| {
            let secs = (now - ts.with_timezone(&chrono::Utc)).num_seconds();
            (secs.max(0) as f64) / 86_400.0
        })
        .unwrap_or(0.0)
}

/// Convert f32 vector to bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert SQLite BLOB back to f32 vector. A trailing partial chunk is ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or a zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn importance_clamps_to_range() {
        assert_eq!(clamp_importance(15), 10);
        assert_eq!(clamp_importance(-3), 1);
        assert_eq!(clamp_importance(0), 1);
        assert_eq!(clamp_importance(7), 7);
    }

    #[test]
    fn memory_source_round_trips_through_storage_string() {
        for source in [
            MemorySource::Conversation,
            MemorySource::Manual,
            MemorySource::Upload,
        ] {
            assert_eq!(MemorySource::from_str_value(source.as_str()), source);
        }
        assert_eq!(
            MemorySource::from_str_value("bogus"),
            MemorySource::Conversation
        );
    }

    #[test]
    fn vec_blob_roundtrip() {
        let original = vec![1.0f32, -2.5, 3.25, 0.0];
        let blob = vec_to_blob(&original);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), original);
    }

    #[test]
    fn cosine_similarity_identical_vectors() {
        let v = vec![0.6f32, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_uses_norms() {
        let a = vec![2.0f32, 0.0];
        let b = vec![5.0f32, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_and_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn render_turns_uses_role_prefix() {
        let turns = vec![
            ConversationTurn::user("I moved to Seattle"),
            ConversationTurn::new("assistant", "Nice!"),
        ];
        assert_eq!(
            render_turns(&turns),
            "user: I moved to Seattle\nassistant: Nice!"
        );
    }

    #[test]
    fn days_since_handles_past_future_and_garbage() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-03-11T00:00:00.000Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert!((days_since("2026-03-01T00:00:00.000Z", now) - 10.0).abs() < 1e-9);
        assert_eq!(days_since("2026-04-01T00:00:00.000Z", now), 0.0);
        assert_eq!(days_since("yesterday", now), 0.0);
    }

    proptest! {
        #[test]
        fn clamped_importance_is_always_in_range(value in any::<i64>()) {
            let clamped = clamp_importance(value);
            prop_assert!((MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&clamped));
        }
    }
}
