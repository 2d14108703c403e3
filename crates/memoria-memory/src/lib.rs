// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user long-term memory: extraction, storage, indexing and retrieval.
//!
//! ## Architecture
//!
//! - **MemoryStore**: SQLite persistence, one row per memory fact
//! - **EmbeddingClient**: never-failing embedding front end with a
//!   deterministic placeholder for degraded calls
//! - **Extractor**: LLM extraction with a staged JSON repair pipeline and a
//!   rule-based keyword fallback
//! - **MemoryIndex**: in-memory topic/entity/relation/concept buckets
//! - **HybridSearchEngine**: vector + tiered keyword + semantic expansion
//! - **MemoryManager**: TTL caches, the extraction gate and the batch queue
//!   in front of everything above

pub mod batch;
pub mod cache;
pub mod category;
pub mod domain;
pub mod embedder;
pub mod extractor;
pub mod gate;
pub mod index;
pub mod manager;
pub mod nlp;
pub mod search;
pub mod store;
pub mod telemetry;
pub mod text;
pub mod types;

pub use batch::{BatchKind, BatchOperation, BatchPayload, BatchQueue};
pub use cache::TtlCache;
pub use category::{Category, CategoryInfo, CategoryRegistry, CoreCategory};
pub use embedder::{Embedding, EmbeddingClient, HttpEmbedder};
pub use extractor::Extractor;
pub use gate::{ExtractionGate, GateDecision, SkipReason};
pub use index::{IndexKind, IndexQuery, IndexStats, MemoryIndex, TextAnalyzer};
pub use manager::{ExtractionOutcome, ExtractionStatus, MemoryManager, MemoryStats};
pub use nlp::{LlmNlp, RuleBasedNlp};
pub use search::HybridSearchEngine;
pub use store::MemoryStore;
pub use types::*;
