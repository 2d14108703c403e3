// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Memoria integration tests.
//!
//! Provides mock collaborators and a wiring harness for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockCompleter`] - scripted LLM completions with a call counter
//! - [`MockEmbedder`] / [`FailingEmbedder`] - deterministic or always-failing embeddings
//! - [`FailingNlp`] - an NLP collaborator whose every call fails
//! - [`TestHarness`] - in-memory database plus a fully wired `MemoryManager`

pub mod harness;
pub mod mock_completer;
pub mod mock_embedder;
pub mod mock_nlp;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_completer::MockCompleter;
pub use mock_embedder::{FailingEmbedder, MockEmbedder};
pub use mock_nlp::FailingNlp;
