// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory inverted index over topics, entities, relations and concepts.
//!
//! The index is a fast pre-filter in front of the hybrid search engine.
//! It is rebuilt from the store on startup and kept current incrementally;
//! losing it only costs a rebuild.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::nlp::RuleBasedNlp;
use crate::text::{content_words, tokenize};
use crate::types::Memory;

/// The four analysis passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexKind {
    Topic,
    Entity,
    Relation,
    Concept,
}

/// Person, organization and location patterns, tried in that order.
static ENTITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // person
        Regex::new(r"\b(?:named|called|name is)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)").unwrap(),
        Regex::new(
            r"\b(?:[Mm]y|[Oo]ur)\s+(?:wife|husband|partner|son|daughter|brother|sister|mother|father|mom|dad|friend|boss|manager|colleague)\s+([A-Z][a-z]+)",
        )
        .unwrap(),
        // organization
        Regex::new(
            r"\b(?:work(?:s|ed|ing)?\s+(?:at|for)|joined|employed\s+by)\s+([A-Z][A-Za-z0-9&]*(?:\s+[A-Z][A-Za-z0-9&]*)*)",
        )
        .unwrap(),
        Regex::new(
            r"\b([A-Z][A-Za-z0-9&]*(?:\s+[A-Z][A-Za-z0-9&]*)*\s+(?:Inc|Corp|LLC|Ltd|Labs|University|Bank))\b",
        )
        .unwrap(),
        // location
        Regex::new(r"\b(?:in|to|from|near)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)").unwrap(),
    ]
});

/// Relation roots and the surface forms that signal them.
static RELATION_FORMS: &[(&str, &[&str])] = &[
    ("live", &["live", "lives", "lived", "living", "reside", "resides"]),
    ("work", &["work", "works", "worked", "working", "employed"]),
    ("like", &["like", "likes", "liked", "love", "loves", "loved", "enjoy", "enjoys", "prefer", "prefers"]),
    ("dislike", &["hate", "hates", "dislike", "dislikes"]),
    ("own", &["own", "owns", "bought", "use", "uses", "using"]),
    ("move", &["move", "moved", "moving", "relocated"]),
    ("study", &["study", "studies", "studied", "learn", "learning"]),
    ("marry", &["married", "engaged"]),
    ("allergic", &["allergic", "allergy"]),
    ("speak", &["speak", "speaks", "fluent"]),
    ("plan", &["plan", "plans", "planning", "hope", "hoping"]),
];

const RELATION_PREPOSITIONS: &[&str] = &["in", "at", "for", "with", "to", "from", "on"];

/// Result of analyzing one text. Also the shape of an index query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexQuery {
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub relations: Vec<String>,
    pub concepts: Vec<String>,
}

impl IndexQuery {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
            && self.entities.is_empty()
            && self.relations.is_empty()
            && self.concepts.is_empty()
    }

    fn values(&self, kind: IndexKind) -> &[String] {
        match kind {
            IndexKind::Topic => &self.topics,
            IndexKind::Entity => &self.entities,
            IndexKind::Relation => &self.relations,
            IndexKind::Concept => &self.concepts,
        }
    }
}

/// Heuristic text analyzer feeding the index.
#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    max_topics: usize,
}

impl TextAnalyzer {
    pub fn new(max_topics: usize) -> Self {
        Self { max_topics }
    }

    /// Run all four passes over `text`.
    pub fn analyze(&self, text: &str) -> IndexQuery {
        let topics = self.topics(text);
        let concepts = RuleBasedNlp::related(&topics);
        IndexQuery {
            entities: entities(text),
            relations: relations(text),
            topics,
            concepts,
        }
    }

    /// Most frequent content words.
    pub fn topics(&self, text: &str) -> Vec<String> {
        let mut topics = RuleBasedNlp::keywords(text);
        topics.truncate(self.max_topics);
        topics
    }
}

/// Named entities as lower-case strings, first occurrence order.
pub fn entities(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for pattern in ENTITY_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                let value = m.as_str().trim().to_lowercase();
                if !value.is_empty() && !found.contains(&value) {
                    found.push(value);
                }
            }
        }
    }
    found
}

/// Relation roots present in `text`, plus `root_preposition` when one follows.
pub fn relations(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let mut found: Vec<String> = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        let Some((root, _)) = RELATION_FORMS
            .iter()
            .find(|(_, forms)| forms.contains(&token.as_str()))
        else {
            continue;
        };
        let root = root.to_string();
        if !found.contains(&root) {
            found.push(root.clone());
        }
        if let Some(next) = tokens.get(i + 1) {
            if RELATION_PREPOSITIONS.contains(&next.as_str()) {
                let pair = format!("{root}_{next}");
                if !found.contains(&pair) {
                    found.push(pair);
                }
            }
        }
    }
    found
}

/// Bucket counts per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub topics: usize,
    pub entities: usize,
    pub relations: usize,
    pub concepts: usize,
    /// Memories currently indexed.
    pub memories: usize,
}

#[derive(Default)]
struct IndexState {
    buckets: HashMap<IndexKind, HashMap<String, HashSet<String>>>,
    /// memory id -> user id
    owners: HashMap<String, String>,
    /// memory id -> buckets it was filed under
    postings: HashMap<String, Vec<(IndexKind, String)>>,
}

impl IndexState {
    fn insert(&mut self, memory: &Memory, analysis: &IndexQuery) {
        self.remove(&memory.id);
        let mut postings = Vec::new();
        for kind in IndexKind::iter() {
            let bucket = self.buckets.entry(kind).or_default();
            for value in analysis.values(kind) {
                bucket
                    .entry(value.clone())
                    .or_default()
                    .insert(memory.id.clone());
                postings.push((kind, value.clone()));
            }
        }
        self.owners.insert(memory.id.clone(), memory.user_id.clone());
        self.postings.insert(memory.id.clone(), postings);
    }

    fn remove(&mut self, id: &str) -> bool {
        self.owners.remove(id);
        let Some(postings) = self.postings.remove(id) else {
            return false;
        };
        for (kind, value) in postings {
            if let Some(bucket) = self.buckets.get_mut(&kind) {
                if let Some(ids) = bucket.get_mut(&value) {
                    ids.remove(id);
                    if ids.is_empty() {
                        bucket.remove(&value);
                    }
                }
            }
        }
        true
    }

    fn prune(&mut self, min_memory_count: usize) -> usize {
        let mut pruned = 0;
        for (kind, bucket) in self.buckets.iter_mut() {
            let before = bucket.len();
            bucket.retain(|_, ids| ids.len() >= min_memory_count);
            pruned += before - bucket.len();
            for postings in self.postings.values_mut() {
                postings.retain(|(k, v)| k != kind || bucket.contains_key(v));
            }
        }
        pruned
    }

    fn bucket_count(&self, kind: IndexKind) -> usize {
        self.buckets.get(&kind).map_or(0, HashMap::len)
    }
}

/// Inverted index shared by all users; every query is scoped to one user.
pub struct MemoryIndex {
    analyzer: TextAnalyzer,
    min_memory_count: usize,
    state: RwLock<IndexState>,
}

impl MemoryIndex {
    pub fn new(analyzer: TextAnalyzer, min_memory_count: usize) -> Self {
        Self {
            analyzer,
            min_memory_count,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn analyzer(&self) -> &TextAnalyzer {
        &self.analyzer
    }

    /// Clear the index, index every memory, then prune small buckets.
    pub async fn rebuild(&self, memories: &[Memory]) {
        {
            let mut state = self.state.write().await;
            *state = IndexState::default();
            for memory in memories {
                let analysis = self.analyze_memory(memory);
                state.insert(memory, &analysis);
            }
        }
        let pruned = self.optimize().await;
        info!(memories = memories.len(), pruned, "memory index rebuilt");
    }

    /// Add or re-index one memory. Does not prune.
    pub async fn index_memory(&self, memory: &Memory) {
        let analysis = self.analyze_memory(memory);
        self.state.write().await.insert(memory, &analysis);
        debug!(id = %memory.id, "memory indexed");
    }

    /// Drop a memory from every bucket. Returns false if it was not indexed.
    pub async fn remove_memory(&self, id: &str) -> bool {
        self.state.write().await.remove(id)
    }

    /// Remove buckets referencing fewer than `min_memory_count` memories.
    /// Returns the number of buckets removed.
    pub async fn optimize(&self) -> usize {
        self.state.write().await.prune(self.min_memory_count)
    }

    /// Memory ids of `user_id` matching the query, with their bucket hit counts.
    ///
    /// Topics match by containment in either direction; the other kinds
    /// need an exact bucket.
    pub async fn query(&self, user_id: &str, query: &IndexQuery) -> HashMap<String, usize> {
        let state = self.state.read().await;
        let mut hits: HashMap<String, usize> = HashMap::new();
        let mut count = |ids: &HashSet<String>| {
            for id in ids {
                if state.owners.get(id).map(String::as_str) == Some(user_id) {
                    *hits.entry(id.clone()).or_insert(0) += 1;
                }
            }
        };

        if let Some(topics) = state.buckets.get(&IndexKind::Topic) {
            for wanted in query.topics.iter().filter(|t| !t.is_empty()) {
                for (value, ids) in topics {
                    if value.contains(wanted.as_str()) || wanted.contains(value.as_str()) {
                        count(ids);
                    }
                }
            }
        }
        for kind in [IndexKind::Entity, IndexKind::Relation, IndexKind::Concept] {
            let Some(bucket) = state.buckets.get(&kind) else {
                continue;
            };
            for wanted in query.values(kind) {
                if let Some(ids) = bucket.get(wanted) {
                    count(ids);
                }
            }
        }
        hits
    }

    /// Analyze free text into a query.
    pub fn query_for(&self, text: &str) -> IndexQuery {
        self.analyzer.analyze(text)
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        IndexStats {
            topics: state.bucket_count(IndexKind::Topic),
            entities: state.bucket_count(IndexKind::Entity),
            relations: state.bucket_count(IndexKind::Relation),
            concepts: state.bucket_count(IndexKind::Concept),
            memories: state.owners.len(),
        }
    }

    fn analyze_memory(&self, memory: &Memory) -> IndexQuery {
        let mut analysis = self.analyzer.analyze(&memory.content);
        // Tags and the category are topics too.
        for extra in memory
            .tags
            .iter()
            .flat_map(|t| content_words(t))
            .chain(std::iter::once(memory.category.as_str().to_string()))
        {
            if !analysis.topics.contains(&extra) {
                analysis.topics.push(extra);
            }
        }
        analysis
    }
}
