// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Memoria memory service.

use thiserror::Error;

/// The primary error type used across all Memoria adapter traits and core operations.
#[derive(Debug, Error)]
pub enum MemoriaError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// LLM completion service errors (API failure, bad request, network).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        /// Whether the failure belongs to a retryable network class.
        transient: bool,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding service errors (unreachable, malformed response, wrong dimensions).
    #[error("embedding error: {message}")]
    Embedding {
        message: String,
        transient: bool,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// NLP collaborator errors (keyword extraction or term expansion failed).
    #[error("nlp error: {0}")]
    Nlp(String),

    /// Malformed model output that no repair strategy could recover.
    #[error("parse error: {0}")]
    Parse(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoriaError {
    /// Build a non-transient provider error from a message.
    pub fn provider(message: impl Into<String>) -> Self {
        MemoriaError::Provider {
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    /// Build a non-transient embedding error from a message.
    pub fn embedding(message: impl Into<String>) -> Self {
        MemoriaError::Embedding {
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    /// Returns true for network-class failures worth retrying
    /// (timeouts, connection resets, DNS failures, overloaded upstreams).
    ///
    /// Application-level errors such as bad requests or malformed JSON
    /// are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            MemoriaError::Timeout { .. } => true,
            MemoriaError::Provider { transient, .. } => *transient,
            MemoriaError::Embedding { transient, .. } => *transient,
            _ => false,
        }
    }
}
