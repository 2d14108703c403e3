// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The memory manager: caching, gating and batching in front of the
//! extractor, index and hybrid search engine.
//!
//! Every public operation here is the boundary at which store and
//! upstream failures are logged and turned into neutral results. The
//! exceptions are the explicit commands (`remember`, `forget`,
//! `rebuild_index`, `stats`), which return their errors to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use memoria_config::model::{BatchConfig, ExtractionConfig, MemoriaConfig, SearchConfig};
use memoria_core::traits::{CompletionAdapter, NlpAdapter};
use memoria_core::MemoriaError;

use crate::batch::{BatchPayload, BatchQueue};
use crate::cache::TtlCache;
use crate::category::{Category, CategoryInfo, CategoryRegistry};
use crate::embedder::EmbeddingClient;
use crate::extractor::{Extractor, is_duplicate};
use crate::gate::{ExtractionGate, GateDecision, SkipReason};
use crate::index::{IndexStats, MemoryIndex, TextAnalyzer};
use crate::search::{HybridSearchEngine, rank};
use crate::store::MemoryStore;
use crate::text::content_hash;
use crate::types::{
    ConversationTurn, ExtractedMemory, MatchType, Memory, MemoryFilter, MemorySource,
    NewMemory, RepairStrategy, SearchResponse, SearchResult, render_turns,
};

/// Confidence reported when the gate skips a request.
pub const SKIP_CONFIDENCE: f64 = 0.9;

/// Index hits score between these bounds, scaled by hit count.
const INDEX_BASE_SCORE: f64 = 0.4;
const INDEX_SCORE_SPAN: f64 = 0.5;

/// How many stored memories of a category are compared against a new candidate.
const DEDUP_SCAN_LIMIT: usize = 500;

type SearchKey = (String, String, usize);
type ExtractionKey = (String, String);

/// What happened to an extraction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(tag = "status", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionStatus {
    Skipped { reason: SkipReason },
    Queued { priority: u8 },
    Completed,
}

/// Result of [`MemoryManager::smart_extraction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub status: ExtractionStatus,
    pub confidence: f64,
    /// Memories persisted by this request.
    pub stored: Vec<Memory>,
    /// Candidates dropped as duplicates of stored memories.
    pub duplicates: usize,
    pub strategy: Option<RepairStrategy>,
    pub reasoning: String,
    /// True when served from the extraction cache.
    pub cached: bool,
}

impl ExtractionOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            status: ExtractionStatus::Skipped { reason },
            confidence: SKIP_CONFIDENCE,
            stored: vec![],
            duplicates: 0,
            strategy: None,
            reasoning: format!("skipped: {reason}"),
            cached: false,
        }
    }

    fn queued(priority: u8) -> Self {
        Self {
            status: ExtractionStatus::Queued { priority },
            confidence: 0.0,
            stored: vec![],
            duplicates: 0,
            strategy: None,
            reasoning: format!("queued at priority {priority}"),
            cached: false,
        }
    }
}

/// Per-user and process-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub memories: u64,
    pub categories: Vec<(Category, u64)>,
    pub index: IndexStats,
    pub queued: usize,
    pub cached_searches: usize,
    pub cached_extractions: usize,
}

enum Stored {
    New(Memory),
    Duplicate(Memory),
}

/// Wires the store, index, extractor and search engine together.
pub struct MemoryManager {
    store: MemoryStore,
    embedder: EmbeddingClient,
    extractor: Extractor,
    engine: HybridSearchEngine,
    index: MemoryIndex,
    registry: CategoryRegistry,
    gate: ExtractionGate,
    queue: BatchQueue,
    search_cache: TtlCache<SearchKey, SearchResponse>,
    extraction_cache: TtlCache<ExtractionKey, ExtractionOutcome>,
    search: SearchConfig,
    extraction: ExtractionConfig,
    batch: BatchConfig,
    cleanup_interval: Duration,
}

impl MemoryManager {
    pub fn new(
        config: &MemoriaConfig,
        store: MemoryStore,
        embedder: EmbeddingClient,
        completer: Arc<dyn CompletionAdapter>,
        nlp: Arc<dyn NlpAdapter>,
    ) -> Self {
        let extractor = Extractor::new(completer, &config.extraction, &config.llm);
        let engine = HybridSearchEngine::new(store.clone(), embedder.clone(), nlp);
        let index = MemoryIndex::new(
            TextAnalyzer::new(config.index.max_topics),
            config.index.min_memory_count,
        );
        Self {
            store,
            embedder,
            extractor,
            engine,
            index,
            registry: CategoryRegistry::new(),
            gate: ExtractionGate::new(&config.gate, &config.batch),
            queue: BatchQueue::new(),
            search_cache: TtlCache::from_config("search", &config.cache),
            extraction_cache: TtlCache::from_config("extraction", &config.cache),
            search: config.search.clone(),
            extraction: config.extraction.clone(),
            batch: config.batch.clone(),
            cleanup_interval: Duration::from_secs(config.cache.cleanup_interval_secs.max(1)),
        }
    }

    /// Seed the category registry from the store and build the index.
    pub async fn initialize(&self) -> Result<IndexStats, MemoriaError> {
        let categories = self.store.list_categories().await?;
        self.registry.seed(categories).await;
        self.rebuild_index().await
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    // --- search ---

    /// Cached, index-first search.
    ///
    /// The index answers first; the hybrid engine runs only when the index
    /// covers less than `index_coverage_ratio` of `limit`. Clean responses
    /// are cached per `(user, query, limit)`.
    pub async fn smart_search(&self, user_id: &str, query: &str, limit: usize) -> SearchResponse {
        let limit = limit.max(1);
        let key = (
            user_id.to_string(),
            query.trim().to_lowercase(),
            limit,
        );
        if let Some(cached) = self.search_cache.get(&key).await {
            debug!(user_id, "search served from cache");
            self.record_access(&cached.results).await;
            return cached;
        }

        let config = SearchConfig {
            max_results: limit,
            ..self.search.clone()
        };
        let mut stage_errors = Vec::new();
        let mut candidates: HashMap<String, SearchResult> = HashMap::new();

        match self.index_stage(user_id, query).await {
            Ok(hits) => {
                for hit in hits {
                    candidates.insert(hit.memory.id.clone(), hit);
                }
            }
            Err(e) => {
                warn!(error = %e, "index stage failed");
                stage_errors.push(("index".to_string(), e.to_string()));
            }
        }

        let needed = (limit as f64 * config.index_coverage_ratio).ceil() as usize;
        let mut error = None;
        if candidates.len() < needed {
            debug!(
                user_id,
                index_hits = candidates.len(),
                needed,
                "escalating to hybrid search"
            );
            let escalated = self.engine.search_candidates(user_id, query, &config).await;
            stage_errors.extend(escalated.stage_errors);
            error = escalated.error;
            for hit in escalated.results {
                merge_hit(&mut candidates, hit);
            }
        }

        let results = rank(candidates.into_values().collect(), &config);
        if !results.is_empty() {
            error = None;
        }
        let response = SearchResponse {
            results,
            stage_errors,
            error,
        };
        if response.stage_errors.is_empty() {
            self.search_cache.insert(key, response.clone()).await;
        }
        self.record_access(&response.results).await;
        response
    }

    async fn index_stage(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<SearchResult>, MemoriaError> {
        let query = self.index.query_for(query);
        if query.is_empty() {
            return Ok(vec![]);
        }
        let hits = self.index.query(user_id, &query).await;
        let Some(max_hits) = hits.values().copied().max() else {
            return Ok(vec![]);
        };
        let ids: Vec<String> = hits.keys().cloned().collect();
        let memories = self.store.get_by_ids(user_id, &ids).await?;
        Ok(memories
            .into_iter()
            .map(|memory| {
                let count = hits.get(&memory.id).copied().unwrap_or(0);
                let raw = INDEX_BASE_SCORE + INDEX_SCORE_SPAN * count as f64 / max_hits as f64;
                SearchResult {
                    memory,
                    raw_score: raw,
                    score: raw,
                    match_type: MatchType::Index,
                }
            })
            .collect())
    }

    async fn record_access(&self, results: &[SearchResult]) {
        if results.is_empty() {
            return;
        }
        let ids: Vec<String> = results.iter().map(|r| r.memory.id.clone()).collect();
        if let Err(e) = self.store.update_access_counts(&ids).await {
            warn!(error = %e, "failed to record memory access");
        }
    }

    /// Render search results as a prompt section. Empty for no results.
    pub fn format_context(results: &[SearchResult]) -> String {
        if results.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Relevant Memories\n");
        for result in results {
            out.push_str("- ");
            out.push_str(&result.memory.content);
            out.push('\n');
        }
        out
    }

    // --- extraction ---

    /// Gate, then extract now or defer to the batch queue.
    ///
    /// Only the user's turns are gated. `force` skips the gate and runs
    /// immediately.
    pub async fn smart_extraction(
        &self,
        user_id: &str,
        turns: &[ConversationTurn],
        force: bool,
    ) -> ExtractionOutcome {
        let user_text = turns
            .iter()
            .filter(|t| t.role.eq_ignore_ascii_case("user"))
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        match self.gate.evaluate(user_id, &user_text, force).await {
            GateDecision::Skip(SkipReason::RecentDuplicate) => {
                match self.cached_extraction(user_id, turns).await {
                    Some(outcome) => outcome,
                    None => ExtractionOutcome::skipped(SkipReason::RecentDuplicate),
                }
            }
            GateDecision::Skip(reason) => ExtractionOutcome::skipped(reason),
            GateDecision::Process {
                immediate: true, ..
            } => self.run_extraction(user_id, turns).await,
            GateDecision::Process { priority, .. } => {
                let payload = BatchPayload::Extract {
                    user_id: user_id.to_string(),
                    turns: turns.to_vec(),
                };
                let depth = self.queue.push(payload, priority).await;
                debug!(user_id, priority, depth, "extraction queued");
                ExtractionOutcome::queued(priority)
            }
        }
    }

    /// Earlier outcome for the same user and conversation, marked as cached.
    async fn cached_extraction(
        &self,
        user_id: &str,
        turns: &[ConversationTurn],
    ) -> Option<ExtractionOutcome> {
        let key = extraction_key(user_id, turns);
        let mut cached = self.extraction_cache.get(&key).await?;
        debug!(user_id, "extraction served from cache");
        cached.cached = true;
        Some(cached)
    }

    /// Extract and persist, reusing a cached outcome for identical input.
    async fn run_extraction(&self, user_id: &str, turns: &[ConversationTurn]) -> ExtractionOutcome {
        if let Some(cached) = self.cached_extraction(user_id, turns).await {
            return cached;
        }
        let key = extraction_key(user_id, turns);

        let result = self.extractor.extract(turns).await;
        let mut outcome = ExtractionOutcome {
            status: ExtractionStatus::Completed,
            confidence: result.confidence,
            stored: vec![],
            duplicates: 0,
            strategy: Some(result.strategy),
            reasoning: result.reasoning,
            cached: false,
        };

        if result.confidence < self.extraction.min_confidence {
            info!(
                user_id,
                confidence = result.confidence,
                min = self.extraction.min_confidence,
                "extraction below confidence threshold, nothing stored"
            );
        } else {
            match self
                .persist(user_id, result.memories, MemorySource::Conversation)
                .await
            {
                Ok((stored, duplicates)) => {
                    outcome.stored = stored;
                    outcome.duplicates = duplicates;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "failed to persist extracted memories");
                    return outcome;
                }
            }
        }

        self.extraction_cache.insert(key, outcome.clone()).await;
        outcome
    }

    async fn persist(
        &self,
        user_id: &str,
        candidates: Vec<ExtractedMemory>,
        source: MemorySource,
    ) -> Result<(Vec<Memory>, usize), MemoriaError> {
        let mut stored = Vec::new();
        let mut duplicates = 0;
        for candidate in candidates {
            match self.store_candidate(user_id, candidate, source).await? {
                Stored::New(memory) => stored.push(memory),
                Stored::Duplicate(_) => duplicates += 1,
            }
        }
        if !stored.is_empty() {
            self.invalidate_searches(user_id).await;
            crate::telemetry::record_stored(stored.len());
        }
        info!(
            user_id,
            stored = stored.len(),
            duplicates,
            "memories persisted"
        );
        Ok((stored, duplicates))
    }

    async fn store_candidate(
        &self,
        user_id: &str,
        candidate: ExtractedMemory,
        source: MemorySource,
    ) -> Result<Stored, MemoriaError> {
        let filter = MemoryFilter {
            category: Some(candidate.category.clone()),
            ..MemoryFilter::default()
        };
        let existing = self.store.get(user_id, &filter, DEDUP_SCAN_LIMIT, 0).await?;
        let threshold = self.extractor.dedup_similarity();
        if let Some(dup) = existing.into_iter().find(|m| {
            is_duplicate(
                &m.category,
                &m.content,
                &candidate.category,
                &candidate.content,
                threshold,
            )
        }) {
            debug!(user_id, id = %dup.id, "candidate duplicates stored memory");
            return Ok(Stored::Duplicate(dup));
        }

        let embedding = self.embedder.embed(&candidate.content).await;
        let memory = self
            .store
            .insert(NewMemory {
                user_id: user_id.to_string(),
                content: candidate.content,
                category: candidate.category.as_str().to_string(),
                importance: i64::from(candidate.importance),
                tags: candidate.tags,
                embedding: (!embedding.degraded).then_some(embedding.vector),
                source,
            })
            .await?;

        self.registry.record(&memory.category).await;
        if let Err(e) = self.store.record_category(&memory.category).await {
            warn!(category = %memory.category, error = %e, "failed to record category usage");
        }
        self.index.index_memory(&memory).await;
        Ok(Stored::New(memory))
    }

    async fn invalidate_searches(&self, user_id: &str) {
        let dropped = self
            .search_cache
            .invalidate(|(user, _, _)| user == user_id)
            .await;
        if dropped > 0 {
            debug!(user_id, dropped, "search cache invalidated");
        }
    }

    // --- explicit commands ---

    /// Store `text` as a memory, or return the stored memory it duplicates.
    pub async fn remember(
        &self,
        user_id: &str,
        text: &str,
        source: MemorySource,
    ) -> Result<Memory, MemoriaError> {
        let candidate = self
            .extractor
            .extract_explicit(text)
            .ok_or_else(|| MemoriaError::Parse("nothing to remember".to_string()))?;
        match self.store_candidate(user_id, candidate, source).await? {
            Stored::New(memory) => {
                self.invalidate_searches(user_id).await;
                crate::telemetry::record_stored(1);
                info!(user_id, id = %memory.id, category = %memory.category, "memory stored");
                Ok(memory)
            }
            Stored::Duplicate(memory) => Ok(memory),
        }
    }

    /// Delete one of the user's memories. False if it does not exist or
    /// belongs to someone else.
    pub async fn forget(&self, user_id: &str, id: &str) -> Result<bool, MemoriaError> {
        let owned = self
            .store
            .get_by_id(id)
            .await?
            .is_some_and(|m| m.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        let deleted = self.store.delete(id).await?;
        if deleted {
            self.index.remove_memory(id).await;
            self.invalidate_searches(user_id).await;
            info!(user_id, id, "memory deleted");
        }
        Ok(deleted)
    }

    /// Rebuild the index from every stored memory.
    pub async fn rebuild_index(&self) -> Result<IndexStats, MemoriaError> {
        let memories = self.store.all_for_indexing().await?;
        self.index.rebuild(&memories).await;
        Ok(self.index.stats().await)
    }

    pub async fn categories(&self) -> Vec<CategoryInfo> {
        self.registry.snapshot().await
    }

    pub async fn stats(&self, user_id: &str) -> Result<MemoryStats, MemoriaError> {
        Ok(MemoryStats {
            memories: self.store.count(user_id).await?,
            categories: self.store.category_counts(user_id).await?,
            index: self.index.stats().await,
            queued: self.queue.len().await,
            cached_searches: self.search_cache.len().await,
            cached_extractions: self.extraction_cache.len().await,
        })
    }

    // --- batch processing ---

    /// Defer an operation.
    pub async fn enqueue(&self, payload: BatchPayload, priority: u8) -> usize {
        self.queue.push(payload, priority).await
    }

    /// Drain up to `batch_size` queued operations and run them in order.
    /// Returns how many ran.
    pub async fn process_batch(&self) -> usize {
        let ops = self.queue.drain(self.batch.batch_size.max(1)).await;
        let count = ops.len();
        for op in ops {
            let kind = op.payload.kind();
            debug!(kind = %kind, priority = op.priority, "running queued operation");
            match op.payload {
                BatchPayload::Extract { user_id, turns } => {
                    let outcome = self.run_extraction(&user_id, &turns).await;
                    debug!(user_id = %user_id, stored = outcome.stored.len(), "queued extraction done");
                }
                BatchPayload::Search {
                    user_id,
                    query,
                    limit,
                } => {
                    self.smart_search(&user_id, &query, limit).await;
                }
                BatchPayload::Index { memory_id } => match self.store.get_by_id(&memory_id).await
                {
                    Ok(Some(memory)) => self.index.index_memory(&memory).await,
                    Ok(None) => debug!(memory_id = %memory_id, "queued index target no longer exists"),
                    Err(e) => warn!(memory_id = %memory_id, error = %e, "failed to load memory for indexing"),
                },
            }
        }
        if count > 0 {
            info!(count, "batch processed");
        }
        count
    }

    /// Sweep expired cache entries and gate history.
    pub async fn cleanup(&self) {
        let searches = self.search_cache.sweep().await;
        let extractions = self.extraction_cache.sweep().await;
        let recent = self.gate.prune().await;
        debug!(searches, extractions, recent, "expired entries swept");
    }

    /// Run the batch loop and periodic cleanup until `cancel` fires.
    pub fn spawn_worker(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let batch_interval = Duration::from_secs(self.batch.interval_secs.max(1));
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut batch_tick = tokio::time::interval(batch_interval);
            let mut cleanup_tick = tokio::time::interval(cleanup_interval);
            // Skip the first immediate ticks.
            batch_tick.tick().await;
            cleanup_tick.tick().await;
            info!(
                batch_secs = batch_interval.as_secs(),
                cleanup_secs = cleanup_interval.as_secs(),
                "memory worker started"
            );

            loop {
                tokio::select! {
                    _ = batch_tick.tick() => {
                        self.process_batch().await;
                    }
                    _ = cleanup_tick.tick() => {
                        self.cleanup().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("memory worker shutting down");
                        break;
                    }
                }
            }
        })
    }
}

/// Extraction cache key: the user plus a hash of the rendered conversation.
fn extraction_key(user_id: &str, turns: &[ConversationTurn]) -> (String, String) {
    (user_id.to_string(), content_hash(&render_turns(turns)))
}

/// Keep the better raw score; a memory found by both paths becomes hybrid.
fn merge_hit(candidates: &mut HashMap<String, SearchResult>, hit: SearchResult) {
    match candidates.get_mut(&hit.memory.id) {
        Some(existing) => {
            existing.raw_score = existing.raw_score.max(hit.raw_score);
            existing.score = existing.raw_score;
            existing.match_type = MatchType::Hybrid;
        }
        None => {
            candidates.insert(hit.memory.id.clone(), hit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, content: &str, raw: f64, match_type: MatchType) -> SearchResult {
        SearchResult {
            memory: Memory {
                id: id.to_string(),
                user_id: "u1".to_string(),
                content: content.to_string(),
                category: Category::normalize("other"),
                importance: 5,
                tags: vec![],
                embedding: None,
                source: MemorySource::Manual,
                timestamp: "2026-03-01T00:00:00.000Z".to_string(),
                last_accessed: None,
                access_count: 0,
            },
            raw_score: raw,
            score: raw,
            match_type,
        }
    }

    #[test]
    fn format_context_lists_contents() {
        let results = vec![
            result("a", "Lives in Seattle", 0.9, MatchType::Vector),
            result("b", "Allergic to peanuts", 0.8, MatchType::Keyword),
        ];
        assert_eq!(
            MemoryManager::format_context(&results),
            "## Relevant Memories\n- Lives in Seattle\n- Allergic to peanuts\n"
        );
        assert_eq!(MemoryManager::format_context(&[]), "");
    }

    #[test]
    fn merge_marks_overlap_as_hybrid() {
        let mut candidates = HashMap::new();
        merge_hit(&mut candidates, result("a", "x", 0.5, MatchType::Index));
        merge_hit(&mut candidates, result("a", "x", 0.8, MatchType::Vector));
        merge_hit(&mut candidates, result("b", "y", 0.6, MatchType::Keyword));

        let a = &candidates["a"];
        assert_eq!(a.match_type, MatchType::Hybrid);
        assert!((a.raw_score - 0.8).abs() < 1e-9);
        assert_eq!(candidates["b"].match_type, MatchType::Keyword);
    }

    #[test]
    fn skipped_outcome_reports_reason() {
        let outcome = ExtractionOutcome::skipped(SkipReason::TooShort);
        assert_eq!(
            outcome.status,
            ExtractionStatus::Skipped {
                reason: SkipReason::TooShort
            }
        );
        assert_eq!(outcome.confidence, SKIP_CONFIDENCE);
        assert_eq!(outcome.reasoning, "skipped: too_short");
    }
}
