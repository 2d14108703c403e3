// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Priority queue of deferred memory operations.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::Mutex;

use crate::gate::MAX_PRIORITY;
use crate::types::ConversationTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchKind {
    Extract,
    Search,
    Index,
}

/// The work a deferred operation carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchPayload {
    Extract {
        user_id: String,
        turns: Vec<ConversationTurn>,
    },
    /// Warm the search cache for a query.
    Search {
        user_id: String,
        query: String,
        limit: usize,
    },
    /// Add a stored memory to the index.
    Index { memory_id: String },
}

impl BatchPayload {
    pub fn kind(&self) -> BatchKind {
        match self {
            BatchPayload::Extract { .. } => BatchKind::Extract,
            BatchPayload::Search { .. } => BatchKind::Search,
            BatchPayload::Index { .. } => BatchKind::Index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOperation {
    pub payload: BatchPayload,
    pub enqueued_at: DateTime<Utc>,
    /// In `0..=10`.
    pub priority: u8,
    seq: u64,
}

impl PartialEq for BatchOperation {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for BatchOperation {}

impl Ord for BatchOperation {
    // Max-heap: higher priority first, then earlier enqueue.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for BatchOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending operations, drained highest priority first (FIFO within a
/// priority). Draining is the only point where operations leave the queue.
#[derive(Default)]
pub struct BatchQueue {
    heap: Mutex<BinaryHeap<BatchOperation>>,
    next_seq: AtomicU64,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `payload`. Priority is clamped to `0..=10`. Returns the new depth.
    pub async fn push(&self, payload: BatchPayload, priority: u8) -> usize {
        let op = BatchOperation {
            payload,
            enqueued_at: Utc::now(),
            priority: priority.min(MAX_PRIORITY),
            seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
        };
        let mut heap = self.heap.lock().await;
        heap.push(op);
        let depth = heap.len();
        crate::telemetry::set_queue_depth(depth);
        depth
    }

    /// Remove and return up to `max` operations in drain order.
    pub async fn drain(&self, max: usize) -> Vec<BatchOperation> {
        let mut heap = self.heap.lock().await;
        let mut ops = Vec::with_capacity(max.min(heap.len()));
        while ops.len() < max {
            match heap.pop() {
                Some(op) => ops.push(op),
                None => break,
            }
        }
        crate::telemetry::set_queue_depth(heap.len());
        ops
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }
}
