// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete memory stack over an in-memory
//! SQLite database with mock collaborators, so tests can drive
//! `MemoryManager` exactly as the binary does.

use std::sync::Arc;
use std::time::Duration;

use memoria_config::model::MemoriaConfig;
use memoria_core::{EmbeddingAdapter, MemoriaError, NlpAdapter};
use memoria_memory::types::{ConversationTurn, Memory, MemoryFilter};
use memoria_memory::{EmbeddingClient, MemoryManager, MemoryStore, RuleBasedNlp};
use memoria_storage::Database;

use crate::mock_completer::MockCompleter;
use crate::mock_embedder::MockEmbedder;

/// Embedding width used unless a test supplies its own embedder.
pub const TEST_DIMENSIONS: usize = 64;

/// Builder for creating test environments with configurable collaborators.
pub struct TestHarnessBuilder {
    replies: Vec<String>,
    failing_completer: bool,
    embedder: Option<Arc<dyn EmbeddingAdapter>>,
    nlp: Option<Arc<dyn NlpAdapter>>,
    config: MemoriaConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            replies: Vec::new(),
            failing_completer: false,
            embedder: None,
            nlp: None,
            config: MemoriaConfig::default(),
        }
    }

    /// Script the LLM replies, consumed one per completion call.
    pub fn with_replies(mut self, replies: Vec<String>) -> Self {
        self.replies = replies;
        self
    }

    /// Make every completion call fail.
    pub fn with_failing_completer(mut self) -> Self {
        self.failing_completer = true;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_nlp(mut self, nlp: Arc<dyn NlpAdapter>) -> Self {
        self.nlp = Some(nlp);
        self
    }

    /// Adjust the configuration before the manager is built.
    pub fn configure(mut self, f: impl FnOnce(&mut MemoriaConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Build the harness: open the database, wire the manager, initialize it.
    pub async fn build(self) -> Result<TestHarness, MemoriaError> {
        let db = Database::open_in_memory().await?;
        let store = MemoryStore::new(db);

        let completer = Arc::new(if self.failing_completer {
            MockCompleter::failing()
        } else {
            MockCompleter::new(self.replies)
        });
        let embedder: Arc<dyn EmbeddingAdapter> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(MockEmbedder::new(TEST_DIMENSIONS)),
        };
        let nlp: Arc<dyn NlpAdapter> = match self.nlp {
            Some(nlp) => nlp,
            None => Arc::new(RuleBasedNlp::new()),
        };
        let client = EmbeddingClient::new(embedder, Duration::from_secs(1));

        let manager = Arc::new(MemoryManager::new(
            &self.config,
            store.clone(),
            client,
            completer.clone(),
            nlp,
        ));
        manager.initialize().await?;

        Ok(TestHarness {
            completer,
            manager,
            store,
            config: self.config,
        })
    }
}

/// A complete test environment with mock collaborators and in-memory storage.
pub struct TestHarness {
    /// The scripted LLM.
    pub completer: Arc<MockCompleter>,
    /// The fully wired manager under test.
    pub manager: Arc<MemoryManager>,
    /// Direct store access for assertions.
    pub store: MemoryStore,
    pub config: MemoriaConfig,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with default config and the given LLM replies.
    pub async fn with_replies(replies: Vec<String>) -> Result<Self, MemoriaError> {
        Self::builder().with_replies(replies).build().await
    }

    /// Every stored memory of `user_id`, newest first.
    pub async fn memories(&self, user_id: &str) -> Result<Vec<Memory>, MemoriaError> {
        self.store
            .get(user_id, &MemoryFilter::default(), 10_000, 0)
            .await
    }

    /// Run a forced extraction of a single user turn.
    pub async fn tell(&self, user_id: &str, text: &str) -> memoria_memory::ExtractionOutcome {
        self.manager
            .smart_extraction(user_id, &[ConversationTurn::user(text)], true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_builds_with_defaults() {
        let harness = TestHarness::builder().build().await.unwrap();
        assert!(harness.memories("u1").await.unwrap().is_empty());
        assert_eq!(harness.completer.call_count(), 0);
    }
}
