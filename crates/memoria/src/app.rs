// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Startup wiring: storage, embedding service, LLM and the memory manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use memoria_anthropic::AnthropicCompleter;
use memoria_config::model::MemoriaConfig;
use memoria_core::types::{AdapterType, CompletionRequest, CompletionResponse, HealthStatus};
use memoria_core::{CompletionAdapter, MemoriaError, NlpAdapter, PluginAdapter};
use memoria_memory::telemetry::register_metrics;
use memoria_memory::{EmbeddingClient, HttpEmbedder, LlmNlp, MemoryManager, MemoryStore, RuleBasedNlp};
use memoria_storage::Database;
use tracing::{debug, info, warn};

/// Stand-in completer used when no API key is configured.
///
/// Every call fails, so extraction takes the keyword fallback path.
struct OfflineCompleter;

#[async_trait]
impl PluginAdapter for OfflineCompleter {
    fn name(&self) -> &str {
        "offline"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Degraded("no LLM configured".to_string()))
    }
}

#[async_trait]
impl CompletionAdapter for OfflineCompleter {
    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, MemoriaError> {
        Err(MemoriaError::provider("no LLM configured"))
    }
}

/// A fully wired memory service.
pub struct App {
    pub manager: Arc<MemoryManager>,
    /// True when extraction runs against a real model.
    pub llm_enabled: bool,
    db: Database,
}

impl App {
    /// Open the database, build every collaborator and warm the index.
    pub async fn build(config: &MemoriaConfig) -> Result<Self, MemoriaError> {
        register_metrics();

        let db = Database::open_with_config(&config.storage).await?;
        let store = MemoryStore::new(db.clone());

        let embedder = HttpEmbedder::new(&config.embedding)?;
        let embeddings = EmbeddingClient::new(
            Arc::new(embedder),
            Duration::from_secs(config.embedding.timeout_secs),
        );

        let (completer, llm_enabled): (Arc<dyn CompletionAdapter>, bool) =
            match AnthropicCompleter::new(&config.llm) {
                Ok(completer) => (Arc::new(completer), true),
                Err(e) => {
                    warn!(error = %e, "LLM unavailable, extraction will use keyword fallback");
                    (Arc::new(OfflineCompleter), false)
                }
            };

        let nlp: Arc<dyn NlpAdapter> = if llm_enabled {
            Arc::new(LlmNlp::new(
                completer.clone(),
                Duration::from_secs(config.llm.timeout_secs),
            ))
        } else {
            Arc::new(RuleBasedNlp::new())
        };

        let manager = Arc::new(MemoryManager::new(config, store, embeddings, completer, nlp));
        let index = manager.initialize().await?;
        info!(
            memories = index.memories,
            llm = llm_enabled,
            "memory service ready"
        );

        Ok(Self {
            manager,
            llm_enabled,
            db,
        })
    }

    /// Run every queued operation, then checkpoint and close the database.
    pub async fn shutdown(self) -> Result<(), MemoriaError> {
        let mut drained = 0;
        loop {
            let ran = self.manager.process_batch().await;
            if ran == 0 {
                break;
            }
            drained += ran;
        }
        debug!(drained, "queue drained before exit");
        self.db.close().await
    }
}
