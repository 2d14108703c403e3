// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid search: vector similarity, tiered keyword matching and semantic
//! expansion, merged and ranked by importance and recency.
//!
//! Stages run in a fixed order (vector, keyword, semantic). A failing
//! stage is logged and skipped; only when all three fail does the
//! response carry an error, and even then it is an empty result rather
//! than an `Err`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use memoria_config::model::SearchConfig;
use memoria_core::traits::NlpAdapter;
use memoria_core::MemoriaError;

use crate::embedder::EmbeddingClient;
use crate::store::MemoryStore;
use crate::text::content_words;
use crate::types::{MatchType, Memory, SearchResponse, SearchResult, cosine_similarity, days_since};

/// Keyword tier scores before `keyword_weight`.
pub const CONTENT_TIER: f64 = 1.0;
pub const CATEGORY_TIER: f64 = 0.7;
pub const TAG_TIER: f64 = 0.5;

/// Semantic-expansion base score before `semantic_weight`.
pub const SEMANTIC_BASE: f64 = 0.6;

/// Weight of the recency bonus in the final score.
pub const RECENCY_WEIGHT: f64 = 0.1;

/// Similarity threshold actually applied to a set of vector scores.
///
/// When the dynamic threshold is enabled and the distribution is
/// compressed (low mean, but some signal at the top) the threshold drops
/// to `max(dynamic_floor, max * dynamic_ratio)`.
pub fn effective_threshold(similarities: &[f64], config: &SearchConfig) -> f64 {
    if !config.enable_dynamic_threshold || similarities.is_empty() {
        return config.vector_threshold;
    }
    let mean = similarities.iter().sum::<f64>() / similarities.len() as f64;
    let max = similarities.iter().copied().fold(f64::MIN, f64::max);
    if mean < config.dynamic_mean_ceiling && max > config.dynamic_max_floor {
        let lowered = config.dynamic_floor.max(max * config.dynamic_ratio);
        debug!(mean, max, lowered, "dynamic vector threshold applied");
        lowered
    } else {
        config.vector_threshold
    }
}

/// Final score for a hit: relevance, importance and a decaying recency bonus.
pub fn final_score(raw: f64, memory: &Memory, config: &SearchConfig, now: DateTime<Utc>) -> f64 {
    let iw = config.importance_weight;
    let days = days_since(&memory.timestamp, now);
    raw * (1.0 - iw)
        + (f64::from(memory.importance) / 10.0) * iw
        + config.temporal_decay.powf(days) * RECENCY_WEIGHT
}

/// Score, sort (best first) and truncate to `max_results`.
pub fn rank(mut results: Vec<SearchResult>, config: &SearchConfig) -> Vec<SearchResult> {
    let now = Utc::now();
    for result in &mut results {
        result.score = final_score(result.raw_score, &result.memory, config, now);
    }
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.memory.timestamp.cmp(&a.memory.timestamp))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    results.truncate(config.max_results);
    results
}

/// Accumulates hits across stages.
#[derive(Default)]
struct Merged {
    hits: HashMap<String, Hit>,
    memories: HashMap<String, Memory>,
}

struct Hit {
    raw: f64,
    stages: HashSet<MatchType>,
}

impl Merged {
    fn add(&mut self, id: &str, score: f64, stage: MatchType) {
        let hit = self.hits.entry(id.to_string()).or_insert_with(|| Hit {
            raw: score,
            stages: HashSet::new(),
        });
        hit.raw = hit.raw.max(score);
        hit.stages.insert(stage);
    }

    fn add_memory(&mut self, memory: Memory, score: f64, stage: MatchType) {
        self.add(&memory.id, score, stage);
        self.memories.entry(memory.id.clone()).or_insert(memory);
    }
}

/// The three-stage search engine.
pub struct HybridSearchEngine {
    store: MemoryStore,
    embedder: EmbeddingClient,
    nlp: Arc<dyn NlpAdapter>,
}

impl HybridSearchEngine {
    pub fn new(store: MemoryStore, embedder: EmbeddingClient, nlp: Arc<dyn NlpAdapter>) -> Self {
        Self {
            store,
            embedder,
            nlp,
        }
    }

    /// Ranked search that also records an access for every surfaced memory.
    pub async fn search(&self, user_id: &str, query: &str, config: &SearchConfig) -> SearchResponse {
        let mut response = self.search_candidates(user_id, query, config).await;
        response.results = rank(response.results, config);

        let ids: Vec<String> = response.results.iter().map(|r| r.memory.id.clone()).collect();
        if let Err(e) = self.store.update_access_counts(&ids).await {
            warn!(error = %e, "failed to record memory access");
        }
        response
    }

    /// Run every stage and merge, without ranking or access bookkeeping.
    /// Result scores equal their raw scores.
    pub async fn search_candidates(
        &self,
        user_id: &str,
        query: &str,
        config: &SearchConfig,
    ) -> SearchResponse {
        let mut merged = Merged::default();
        let mut stage_errors: Vec<(String, String)> = Vec::new();
        let mut note_failure = |stage: &'static str, e: MemoriaError| {
            warn!(stage, error = %e, "search stage failed");
            crate::telemetry::record_degraded(stage);
            stage_errors.push((stage.to_string(), e.to_string()));
        };

        if let Err(e) = self.vector_stage(user_id, query, config, &mut merged).await {
            note_failure("vector", e);
        }
        let keyword_terms = match self.keyword_stage(user_id, query, config, &mut merged).await {
            Ok(terms) => terms,
            Err(e) => {
                note_failure("keyword", e);
                vec![]
            }
        };
        if let Err(e) = self
            .semantic_stage(user_id, query, &keyword_terms, config, &mut merged)
            .await
        {
            note_failure("semantic", e);
        }

        if stage_errors.len() == 3 {
            let detail = stage_errors
                .iter()
                .map(|(stage, msg)| format!("{stage}: {msg}"))
                .collect::<Vec<_>>()
                .join("; ");
            return SearchResponse {
                results: vec![],
                stage_errors,
                error: Some(format!("all search stages failed ({detail})")),
            };
        }

        // Vector hits arrive as ids only.
        let missing: Vec<String> = merged
            .hits
            .keys()
            .filter(|id| !merged.memories.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            match self.store.get_by_ids(user_id, &missing).await {
                Ok(memories) => {
                    for memory in memories {
                        merged.memories.insert(memory.id.clone(), memory);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to load vector hits");
                    stage_errors.push(("fetch".to_string(), e.to_string()));
                }
            }
        }

        let Merged { hits, mut memories } = merged;
        let results = hits
            .into_iter()
            .filter_map(|(id, hit)| {
                let memory = memories.remove(&id)?;
                let match_type = if hit.stages.len() > 1 {
                    MatchType::Hybrid
                } else {
                    hit.stages.into_iter().next().unwrap_or(MatchType::Keyword)
                };
                Some(SearchResult {
                    memory,
                    raw_score: hit.raw,
                    score: hit.raw,
                    match_type,
                })
            })
            .collect();

        SearchResponse {
            results,
            stage_errors,
            error: None,
        }
    }

    async fn vector_stage(
        &self,
        user_id: &str,
        query: &str,
        config: &SearchConfig,
        merged: &mut Merged,
    ) -> Result<(), MemoriaError> {
        let embedding = self.embedder.embed(query).await;
        if embedding.degraded {
            return Err(MemoriaError::embedding("query embedding unavailable"));
        }
        let stored = self.store.get_embeddings(user_id).await?;
        let scored: Vec<(String, f64)> = stored
            .into_iter()
            .map(|(id, vector)| {
                let sim = f64::from(cosine_similarity(&embedding.vector, &vector));
                (id, sim)
            })
            .collect();
        let sims: Vec<f64> = scored.iter().map(|(_, s)| *s).collect();
        let threshold = effective_threshold(&sims, config);

        let mut kept: Vec<(String, f64)> =
            scored.into_iter().filter(|(_, s)| *s >= threshold).collect();
        kept.sort_by(|a, b| b.1.total_cmp(&a.1));
        kept.truncate(config.stage_limit);
        debug!(hits = kept.len(), threshold, "vector stage");
        for (id, sim) in kept {
            merged.add(&id, sim, MatchType::Vector);
        }
        Ok(())
    }

    /// Returns the terms searched, for the semantic stage to skip.
    ///
    /// Hits are buffered until every tier query has succeeded, so a failure
    /// part way through leaves `merged` untouched.
    async fn keyword_stage(
        &self,
        user_id: &str,
        query: &str,
        config: &SearchConfig,
        merged: &mut Merged,
    ) -> Result<Vec<String>, MemoriaError> {
        let terms = keyword_terms(query);
        let weight = config.keyword_weight;
        let mut found: Vec<(Memory, f64)> = Vec::new();
        for term in &terms {
            let by_content = self
                .store
                .search_by_content_like(user_id, term, config.stage_limit)
                .await?;
            let by_category = self
                .store
                .search_by_category(user_id, term, config.stage_limit)
                .await?;
            let by_tag = self
                .store
                .search_by_tag(user_id, term, config.stage_limit)
                .await?;
            found.extend(by_content.into_iter().map(|m| (m, CONTENT_TIER * weight)));
            found.extend(by_category.into_iter().map(|m| (m, CATEGORY_TIER * weight)));
            found.extend(by_tag.into_iter().map(|m| (m, TAG_TIER * weight)));
        }
        debug!(terms = terms.len(), hits = found.len(), "keyword stage");
        for (memory, score) in found {
            merged.add_memory(memory, score, MatchType::Keyword);
        }
        Ok(terms)
    }

    async fn semantic_stage(
        &self,
        user_id: &str,
        query: &str,
        already_searched: &[String],
        config: &SearchConfig,
        merged: &mut Merged,
    ) -> Result<(), MemoriaError> {
        let keywords = self.nlp.extract_keywords(query).await?;
        let related = self.nlp.generate_related_terms(&keywords).await?;
        let score = SEMANTIC_BASE * config.semantic_weight;
        let mut searched = 0;
        for term in related {
            let term = term.to_lowercase();
            if keywords.contains(&term) || already_searched.contains(&term) {
                continue;
            }
            searched += 1;
            for memory in self
                .store
                .search_by_content_like(user_id, &term, config.stage_limit)
                .await?
            {
                merged.add_memory(memory, score, MatchType::Semantic);
            }
        }
        debug!(keywords = keywords.len(), searched, "semantic stage");
        Ok(())
    }
}

/// Content words of the query plus the whole phrase when it has several.
pub fn keyword_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in content_words(query) {
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    let phrase = query
        .trim()
        .trim_end_matches(['?', '？', '.', '!', '。'])
        .trim()
        .to_lowercase();
    if !phrase.is_empty() && phrase.split_whitespace().count() > 1 && !terms.contains(&phrase) {
        terms.push(phrase);
    }
    if terms.is_empty() && !query.trim().is_empty() {
        terms.push(query.trim().to_lowercase());
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use memoria_storage::Database;
    use memoria_test_utils::{FailingEmbedder, FailingNlp, MockEmbedder};

    use crate::category::Category;
    use crate::nlp::RuleBasedNlp;
    use crate::types::{MemorySource, NewMemory};

    const DIMS: usize = 64;

    fn config() -> SearchConfig {
        SearchConfig::default()
    }

    fn memory_with(importance: u8, timestamp: &str) -> Memory {
        Memory {
            id: "m".to_string(),
            user_id: "u".to_string(),
            content: "c".to_string(),
            category: Category::default(),
            importance,
            tags: vec![],
            embedding: None,
            source: MemorySource::Conversation,
            timestamp: timestamp.to_string(),
            last_accessed: None,
            access_count: 0,
        }
    }

    async fn engine_with(
        embedder: Arc<dyn memoria_core::EmbeddingAdapter>,
        nlp: Arc<dyn NlpAdapter>,
    ) -> (HybridSearchEngine, MemoryStore, EmbeddingClient) {
        let store = MemoryStore::new(Database::open_in_memory().await.unwrap());
        let client = EmbeddingClient::new(embedder, Duration::from_secs(1));
        let engine = HybridSearchEngine::new(store.clone(), client.clone(), nlp);
        (engine, store, client)
    }

    async fn insert(store: &MemoryStore, client: &EmbeddingClient, content: &str, category: &str, importance: i64) -> Memory {
        let embedding = client.embed(content).await;
        store
            .insert(NewMemory {
                user_id: "u1".to_string(),
                content: content.to_string(),
                category: category.to_string(),
                importance,
                tags: vec![],
                embedding: (!embedding.degraded).then_some(embedding.vector),
                source: MemorySource::Conversation,
            })
            .await
            .unwrap()
    }

    #[test]
    fn dynamic_threshold_lowers_for_compressed_scores() {
        let cfg = config();
        assert_eq!(effective_threshold(&[0.1, 0.05, 0.25], &cfg), 0.15);
        assert!((effective_threshold(&[0.1, 0.05, 0.28, 0.0], &cfg) - 0.168).abs() < 1e-9);
        // Mean too high: static threshold.
        assert_eq!(effective_threshold(&[0.5, 0.6], &cfg), cfg.vector_threshold);
        // No signal at the top: static threshold.
        assert_eq!(effective_threshold(&[0.1, 0.15], &cfg), cfg.vector_threshold);

        let disabled = SearchConfig {
            enable_dynamic_threshold: false,
            ..config()
        };
        assert_eq!(effective_threshold(&[0.1, 0.25], &disabled), disabled.vector_threshold);
    }

    #[test]
    fn higher_importance_ranks_higher() {
        let cfg = config();
        let now = Utc::now();
        let ts = "2026-01-01T00:00:00.000Z";
        let low = final_score(0.5, &memory_with(3, ts), &cfg, now);
        let high = final_score(0.5, &memory_with(9, ts), &cfg, now);
        assert!(high > low);
    }

    #[test]
    fn older_memories_score_lower() {
        let cfg = config();
        let now = DateTime::parse_from_rfc3339("2026-06-01T00:00:00.000Z")
            .unwrap()
            .with_timezone(&Utc);
        let recent = final_score(0.5, &memory_with(5, "2026-05-31T00:00:00.000Z"), &cfg, now);
        let old = final_score(0.5, &memory_with(5, "2025-06-01T00:00:00.000Z"), &cfg, now);
        assert!(recent > old);
    }

    #[test]
    fn keyword_terms_include_phrase() {
        assert_eq!(keyword_terms("Where do I live?"), vec!["live", "where do i live"]);
        assert_eq!(keyword_terms("Seattle"), vec!["seattle"]);
        assert_eq!(keyword_terms("ok"), vec!["ok"]);
    }

    #[tokio::test]
    async fn seattle_scenario() {
        let (engine, store, client) =
            engine_with(Arc::new(MockEmbedder::new(DIMS)), Arc::new(RuleBasedNlp::new())).await;
        let seattle = insert(&store, &client, "I live in Seattle", "location", 8).await;
        insert(&store, &client, "Enjoys sourdough baking", "preference", 4).await;

        let response = engine.search("u1", "Where do I live?", &config()).await;
        assert!(response.error.is_none());
        assert_eq!(response.results[0].memory.id, seattle.id);
        assert_eq!(response.results[0].match_type, MatchType::Hybrid);

        let stored = store.get_by_id(&seattle.id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
    }

    #[tokio::test]
    async fn failing_embedder_degrades_to_keyword_results() {
        let (engine, store, client) =
            engine_with(Arc::new(FailingEmbedder::new(DIMS)), Arc::new(RuleBasedNlp::new())).await;
        let seattle = insert(&store, &client, "I live in Seattle", "location", 8).await;
        assert!(seattle.embedding.is_none());

        let response = engine.search("u1", "Where do I live?", &config()).await;
        assert!(response.error.is_none());
        assert_eq!(response.stage_errors.len(), 1);
        assert_eq!(response.stage_errors[0].0, "vector");
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].match_type, MatchType::Keyword);
    }

    #[tokio::test]
    async fn semantic_stage_finds_related_terms() {
        let (engine, store, client) =
            engine_with(Arc::new(FailingEmbedder::new(DIMS)), Arc::new(RuleBasedNlp::new())).await;
        let work = insert(&store, &client, "Works as a nurse at the city hospital", "work_context", 6).await;

        let response = engine.search("u1", "job", &config()).await;
        let hit = response
            .results
            .iter()
            .find(|r| r.memory.id == work.id)
            .unwrap();
        assert_eq!(hit.match_type, MatchType::Semantic);
        assert!((hit.raw_score - SEMANTIC_BASE * config().semantic_weight).abs() < 1e-9);
    }

    #[tokio::test]
    async fn keyword_tiers_keep_the_best_score() {
        let (engine, store, client) =
            engine_with(Arc::new(FailingEmbedder::new(DIMS)), Arc::new(FailingNlp)).await;
        let by_content = insert(&store, &client, "Owns a red bicycle", "device", 5).await;
        let by_category = insert(&store, &client, "Rides to work daily", "bicycle", 5).await;

        let cfg = config();
        let response = engine.search_candidates("u1", "bicycle", &cfg).await;
        let score_of = |id: &str| {
            response
                .results
                .iter()
                .find(|r| r.memory.id == id)
                .map(|r| r.raw_score)
                .unwrap()
        };
        assert!((score_of(&by_content.id) - CONTENT_TIER * cfg.keyword_weight).abs() < 1e-9);
        assert!((score_of(&by_category.id) - CATEGORY_TIER * cfg.keyword_weight).abs() < 1e-9);
        assert_eq!(response.stage_errors.len(), 2);
    }

    #[tokio::test]
    async fn non_ascii_and_symbol_queries_skip_fallback_category() {
        let (engine, store, client) =
            engine_with(Arc::new(FailingEmbedder::new(DIMS)), Arc::new(FailingNlp)).await;
        insert(&store, &client, "The wifi password is on the fridge", "other", 5).await;

        for query in ["我住在哪里", "???", "北京"] {
            let response = engine.search_candidates("u1", query, &config()).await;
            assert!(response.results.is_empty(), "{query} matched: {:?}", response.results);
        }
    }

    #[tokio::test]
    async fn personal_info_memory_answers_where_do_i_live() {
        let (engine, store, client) =
            engine_with(Arc::new(MockEmbedder::new(DIMS)), Arc::new(RuleBasedNlp::new())).await;
        let seattle = insert(&store, &client, "Lives in Seattle", "personal_info", 8).await;
        insert(&store, &client, "Enjoys sourdough baking", "preference", 4).await;

        let response = engine.search("u1", "where do I live", &config()).await;
        assert!(response.error.is_none());
        assert_eq!(response.results[0].memory.id, seattle.id);
        assert_eq!(response.results[0].memory.category.as_str(), "personal_info");
    }

    #[tokio::test]
    async fn keyword_stage_failing_mid_term_adds_nothing() {
        let db = Database::open_in_memory().await.unwrap();
        let store = MemoryStore::new(db.clone());
        let client = EmbeddingClient::new(Arc::new(FailingEmbedder::new(DIMS)), Duration::from_secs(1));
        insert(&store, &client, "Owns a red bicycle", "device", 5).await;
        // Content matching still works; the tag tier chokes on the JSON.
        db.connection()
            .call(|conn| -> Result<usize, rusqlite::Error> {
                conn.execute("UPDATE memories SET tags = 'not json'", [])
            })
            .await
            .unwrap();
        assert_eq!(store.search_by_content_like("u1", "bicycle", 10).await.unwrap().len(), 1);

        let engine = HybridSearchEngine::new(store, client, Arc::new(FailingNlp));
        let response = engine.search_candidates("u1", "bicycle", &config()).await;
        assert!(response.results.is_empty());
        let stages: Vec<&str> = response.stage_errors.iter().map(|(s, _)| s.as_str()).collect();
        assert!(stages.contains(&"keyword"), "got: {stages:?}");
        assert_eq!(response.error.as_deref().map(|e| e.contains("all search stages failed")), Some(true));
    }

    #[tokio::test]
    async fn all_stages_failing_yields_empty_result_with_reason() {
        let db = Database::open_in_memory().await.unwrap();
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> { conn.execute_batch("DROP TABLE memories") })
            .await
            .unwrap();
        let client = EmbeddingClient::new(Arc::new(FailingEmbedder::new(DIMS)), Duration::from_secs(1));
        let broken = HybridSearchEngine::new(MemoryStore::new(db), client, Arc::new(FailingNlp));

        let response = broken.search("u1", "Where do I live?", &config()).await;
        assert!(response.results.is_empty());
        assert_eq!(response.stage_errors.len(), 3);
        assert!(response.error.unwrap().contains("all search stages failed"));
    }
}
