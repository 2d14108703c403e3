// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Memoria memory service.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Memoria configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoriaConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// LLM completion service settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding service settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Extraction pipeline settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Hybrid search defaults.
    #[serde(default)]
    pub search: SearchConfig,

    /// In-memory inverted index settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Extraction gate settings.
    #[serde(default)]
    pub gate: GateConfig,

    /// Deferred extraction batching settings.
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("memoria").join("memoria.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("memoria.db"))
        .display()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// LLM completion service configuration (Anthropic Messages API).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// API key. `None` disables LLM extraction; the rule-based fallback is used instead.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used for memory extraction and query expansion.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Anthropic API version string.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Messages endpoint URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Maximum tokens to generate per extraction call.
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature for extraction. Near 0 for determinism.
    #[serde(default)]
    pub temperature: f32,

    /// Hard timeout per completion call, in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient network failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_llm_model(),
            api_version: default_api_version(),
            base_url: default_llm_base_url(),
            max_tokens: default_llm_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_model() -> String {
    "claude-haiku-4-5-20250901".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_llm_max_tokens() -> u32 {
    2048
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

/// Embedding service configuration (OpenAI-compatible `/v1/embeddings`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Bearer token, if the service requires one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Fixed dimensionality of returned vectors.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Hard timeout per embedding call, in seconds.
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient network failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "all-minilm".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_embedding_timeout_secs() -> u64 {
    10
}

/// Extraction pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Inputs longer than this many characters are split into chunks.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Results below this confidence are not persisted.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Normalized content similarity at which two candidates of the same
    /// category are treated as duplicates.
    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_confidence: default_min_confidence(),
            dedup_similarity: default_dedup_similarity(),
        }
    }
}

fn default_chunk_size() -> usize {
    8000
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_dedup_similarity() -> f64 {
    0.85
}

/// Hybrid search configuration.
///
/// The dynamic-threshold constants are empirical defaults, tunable per deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Minimum cosine similarity for the vector stage.
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f64,

    /// Multiplier applied to keyword-stage tier scores.
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,

    /// Multiplier applied to semantic-expansion scores.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,

    /// Share of the final score contributed by memory importance.
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,

    /// Per-day decay factor for the recency bonus (< 1 favors recent memories).
    #[serde(default = "default_temporal_decay")]
    pub temporal_decay: f64,

    /// Maximum results returned by one search.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Lower the vector threshold when the similarity distribution is compressed.
    #[serde(default = "default_true")]
    pub enable_dynamic_threshold: bool,

    /// Mean similarity below which the dynamic threshold may kick in.
    #[serde(default = "default_dynamic_mean_ceiling")]
    pub dynamic_mean_ceiling: f64,

    /// Max similarity above which the dynamic threshold may kick in.
    #[serde(default = "default_dynamic_max_floor")]
    pub dynamic_max_floor: f64,

    /// Fraction of the max similarity used as the lowered threshold.
    #[serde(default = "default_dynamic_ratio")]
    pub dynamic_ratio: f64,

    /// Absolute floor of the lowered threshold.
    #[serde(default = "default_dynamic_floor")]
    pub dynamic_floor: f64,

    /// Index-only results must cover this share of the requested limit,
    /// otherwise the full hybrid search runs.
    #[serde(default = "default_index_coverage_ratio")]
    pub index_coverage_ratio: f64,

    /// Candidates fetched per keyword-stage store query.
    #[serde(default = "default_stage_limit")]
    pub stage_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_threshold: default_vector_threshold(),
            keyword_weight: default_keyword_weight(),
            semantic_weight: default_semantic_weight(),
            importance_weight: default_importance_weight(),
            temporal_decay: default_temporal_decay(),
            max_results: default_max_results(),
            enable_dynamic_threshold: true,
            dynamic_mean_ceiling: default_dynamic_mean_ceiling(),
            dynamic_max_floor: default_dynamic_max_floor(),
            dynamic_ratio: default_dynamic_ratio(),
            dynamic_floor: default_dynamic_floor(),
            index_coverage_ratio: default_index_coverage_ratio(),
            stage_limit: default_stage_limit(),
        }
    }
}

fn default_vector_threshold() -> f64 {
    0.3
}

fn default_keyword_weight() -> f64 {
    0.8
}

fn default_semantic_weight() -> f64 {
    0.6
}

fn default_importance_weight() -> f64 {
    0.2
}

fn default_temporal_decay() -> f64 {
    0.99
}

fn default_max_results() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_dynamic_mean_ceiling() -> f64 {
    0.3
}

fn default_dynamic_max_floor() -> f64 {
    0.2
}

fn default_dynamic_ratio() -> f64 {
    0.6
}

fn default_dynamic_floor() -> f64 {
    0.15
}

fn default_index_coverage_ratio() -> f64 {
    0.7
}

fn default_stage_limit() -> usize {
    50
}

/// Memory index configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Buckets with fewer memories than this are pruned after a full rebuild.
    #[serde(default = "default_min_memory_count")]
    pub min_memory_count: usize,

    /// Topics extracted per memory.
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_memory_count: default_min_memory_count(),
            max_topics: default_max_topics(),
        }
    }
}

fn default_min_memory_count() -> usize {
    2
}

fn default_max_topics() -> usize {
    8
}

/// TTL cache configuration for search and extraction results.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Entries older than this are logically expired.
    #[serde(default = "default_cache_expiry_secs")]
    pub expiry_secs: u64,

    /// Entry count that triggers eviction.
    #[serde(default = "default_max_cache_size")]
    pub max_size: usize,

    /// Interval of the periodic expiry sweep.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_cache_expiry_secs(),
            max_size: default_max_cache_size(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_cache_expiry_secs() -> u64 {
    300
}

fn default_max_cache_size() -> usize {
    1000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

/// Extraction gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Inputs shorter than this (in characters) are skipped.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,

    /// Recent inputs remembered for duplicate detection.
    #[serde(default = "default_recent_window_size")]
    pub recent_window_size: usize,

    /// How long an input stays in the duplicate window.
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_content_length: default_min_content_length(),
            recent_window_size: default_recent_window_size(),
            recent_window_secs: default_recent_window_secs(),
        }
    }
}

fn default_min_content_length() -> usize {
    10
}

fn default_recent_window_size() -> usize {
    100
}

fn default_recent_window_secs() -> u64 {
    600
}

/// Deferred extraction batching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Seconds between queue drains.
    #[serde(default = "default_batch_interval_secs")]
    pub interval_secs: u64,

    /// Operations executed per drain.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Requests with priority above this bypass the queue.
    #[serde(default = "default_immediate_priority")]
    pub immediate_priority: u8,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_batch_interval_secs(),
            batch_size: default_batch_size(),
            immediate_priority: default_immediate_priority(),
        }
    }
}

fn default_batch_interval_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    10
}

fn default_immediate_priority() -> u8 {
    8
}
