// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Memoria memory service.
//!
//! This crate provides the trait definitions for the external collaborators
//! (LLM completion, embeddings, NLP), the shared error type, request and
//! response types, and the retry policy used by every outbound client.

pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::MemoriaError;
pub use retry::{RetryPolicy, retry_transient};
pub use types::{AdapterType, HealthStatus};

pub use traits::{CompletionAdapter, EmbeddingAdapter, NlpAdapter, PluginAdapter};
