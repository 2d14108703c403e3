// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NLP collaborator that always fails, for exercising degraded search paths.

use async_trait::async_trait;

use memoria_core::types::{AdapterType, HealthStatus};
use memoria_core::{MemoriaError, NlpAdapter, PluginAdapter};

pub struct FailingNlp;

#[async_trait]
impl PluginAdapter for FailingNlp {
    fn name(&self) -> &str {
        "failing-nlp"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Nlp
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Unhealthy("always fails".to_string()))
    }
}

#[async_trait]
impl NlpAdapter for FailingNlp {
    async fn extract_keywords(&self, _text: &str) -> Result<Vec<String>, MemoriaError> {
        Err(MemoriaError::Nlp("keyword extraction unavailable".to_string()))
    }

    async fn generate_related_terms(
        &self,
        _keywords: &[String],
    ) -> Result<Vec<String>, MemoriaError> {
        Err(MemoriaError::Nlp("related terms unavailable".to_string()))
    }
}
