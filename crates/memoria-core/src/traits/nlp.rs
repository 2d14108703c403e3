// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NLP collaborator trait used for query expansion.

use async_trait::async_trait;

use crate::error::MemoriaError;
use crate::traits::adapter::PluginAdapter;

/// Keyword extraction and related-term expansion.
///
/// Implementations backed by a remote service must degrade to a
/// deterministic rule-based answer when the service is unavailable.
#[async_trait]
pub trait NlpAdapter: PluginAdapter {
    /// Extracts the salient keywords of `text`, most important first.
    async fn extract_keywords(&self, text: &str) -> Result<Vec<String>, MemoriaError>;

    /// Expands keywords into related terms (synonyms, hypernyms, associated words).
    async fn generate_related_terms(
        &self,
        keywords: &[String],
    ) -> Result<Vec<String>, MemoriaError>;
}
