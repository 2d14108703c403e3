// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of external collaborator an adapter fronts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Completion,
    Embedding,
    Nlp,
}

// --- Completion types ---

/// A single-shot request to an LLM completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Instructions for the model.
    pub system_prompt: String,
    /// The user turn to complete.
    pub user_prompt: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature. Extraction uses values near 0.
    pub temperature: f32,
}

/// Token usage reported by the completion service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The text returned by a completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Concatenated text content of the response.
    pub text: String,
    /// Model that produced the response.
    pub model: String,
    /// Why generation stopped (e.g. `end_turn`, `max_tokens`).
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

// --- Embedding types ---

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    /// Texts to embed, one vector per entry.
    pub texts: Vec<String>,
}

/// Output from an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    /// One vector per input text, in input order.
    pub embeddings: Vec<Vec<f32>>,
    /// Dimensionality of every vector.
    pub dimensions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn adapter_type_display_roundtrip() {
        for variant in [AdapterType::Completion, AdapterType::Embedding, AdapterType::Nlp] {
            let parsed = AdapterType::from_str(&variant.to_string()).expect("should parse back");
            assert_eq!(variant, parsed);
        }
    }

    #[test]
    fn embedding_input_output_types() {
        let input = EmbeddingInput {
            texts: vec!["hello world".to_string()],
        };
        assert_eq!(input.texts.len(), 1);

        let output = EmbeddingOutput {
            embeddings: vec![vec![0.1, 0.2, 0.3]],
            dimensions: 3,
        };
        assert_eq!(output.embeddings.len(), 1);
        assert_eq!(output.dimensions, 3);
    }
}
