// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder can collect these metrics.
//! Without an installed recorder every call is a no-op.

use metrics::{describe_counter, describe_gauge};

/// Register all memory metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("memoria_cache_hits_total", "Cache lookups served from cache");
    describe_counter!("memoria_cache_misses_total", "Cache lookups that missed");
    describe_counter!(
        "memoria_gate_skips_total",
        "Extraction requests skipped by the gate"
    );
    describe_counter!(
        "memoria_degraded_total",
        "Operations that fell back to a degraded path"
    );
    describe_counter!("memoria_memories_stored_total", "Memories persisted");
    describe_gauge!("memoria_batch_queue_depth", "Pending deferred operations");
}

/// Record a cache hit.
pub fn record_cache_hit(cache: &'static str) {
    metrics::counter!("memoria_cache_hits_total", "cache" => cache).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss(cache: &'static str) {
    metrics::counter!("memoria_cache_misses_total", "cache" => cache).increment(1);
}

/// Record a gate skip with its reason.
pub fn record_gate_skip(reason: &'static str) {
    metrics::counter!("memoria_gate_skips_total", "reason" => reason).increment(1);
}

/// Record a stage or call that degraded.
pub fn record_degraded(stage: &'static str) {
    metrics::counter!("memoria_degraded_total", "stage" => stage).increment(1);
}

/// Record newly persisted memories.
pub fn record_stored(count: usize) {
    metrics::counter!("memoria_memories_stored_total").increment(count as u64);
}

/// Set the batch queue depth.
pub fn set_queue_depth(depth: usize) {
    metrics::gauge!("memoria_batch_queue_depth").set(depth as f64);
}
