// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock LLM completion adapter for deterministic testing.
//!
//! `MockCompleter` implements `CompletionAdapter` with pre-configured
//! replies, enabling fast tests without external API calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use memoria_core::types::{
    AdapterType, CompletionRequest, CompletionResponse, HealthStatus, TokenUsage,
};
use memoria_core::{CompletionAdapter, MemoriaError, PluginAdapter};

/// A mock completion service that returns scripted replies.
///
/// Replies are popped from a FIFO queue, one per call. An exhausted queue
/// (or a completer built with [`MockCompleter::failing`]) answers with a
/// provider error. Every call is counted, including failures.
pub struct MockCompleter {
    replies: Mutex<VecDeque<String>>,
    fail: bool,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl MockCompleter {
    /// A completer pre-loaded with `replies`.
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from(replies)),
            fail: false,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// A completer whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    /// Add a reply to the end of the queue.
    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(reply.into());
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request, if any call was made.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.last_request).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PluginAdapter for MockCompleter {
    fn name(&self) -> &str {
        "mock-completer"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl CompletionAdapter for MockCompleter {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, MemoriaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_request) = Some(request);

        if self.fail {
            return Err(MemoriaError::provider("mock completer configured to fail"));
        }
        let text = lock(&self.replies)
            .pop_front()
            .ok_or_else(|| MemoriaError::provider("mock completer has no scripted reply"))?;
        Ok(CompletionResponse {
            text,
            model: "mock-model".to_string(),
            stop_reason: Some("end_turn".to_string()),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        })
    }
}
