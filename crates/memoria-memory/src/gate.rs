// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction gate: decides whether a conversation is worth an LLM call,
//! and how urgently.
//!
//! Skips are cheap and never call the model. Text that passes gets a
//! priority in `0..=10`; anything above the configured immediate priority
//! bypasses the batch queue.

use std::collections::VecDeque;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use memoria_config::model::{BatchConfig, GateConfig};

use crate::domain::keyword_hit_count;
use crate::text::{content_hash, split_sentences};

/// Starting priority for any text that passes the gate.
pub const BASE_PRIORITY: u8 = 5;
/// Highest possible priority.
pub const MAX_PRIORITY: u8 = 10;

const MAX_KEYWORD_BONUS: usize = 3;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{4}-\d{1,2}-\d{1,2}|\d{1,2}/\d{1,2}(/\d{2,4})?|(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(st|nd|rd|th)?|today|tomorrow|yesterday|tonight|(next|last|this) (week|month|year|monday|tuesday|wednesday|thursday|friday|saturday|sunday)|birthday|anniversary)\b|\d{1,2}月\d{1,2}[日号]|今天|明天|昨天|下周|上周",
    )
    .unwrap()
});

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[$€£¥]\s?\d|\d+(\.\d+)?\s?(%|percent\b|dollars?\b|usd\b|eur\b|kg\b|lbs?\b|km\b|miles?\b|years? old\b|元|块)|\b\d{2,}\b",
    )
    .unwrap()
});

const QUESTION_OPENERS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "whom", "whose", "which", "do", "does", "did",
    "is", "are", "was", "were", "can", "could", "would", "should", "will", "shall", "may",
    "have", "has",
];

const CJK_QUESTION_OPENERS: &[&str] = &["什么", "怎么", "为什么", "哪", "谁", "几", "是否", "多少"];

/// Why the gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// Below `min_content_length` characters.
    TooShort,
    /// Same normalized content seen for this user inside the recent window.
    RecentDuplicate,
    /// Every sentence is a question.
    QuestionOnly,
}

impl SkipReason {
    /// Label used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TooShort => "too_short",
            SkipReason::RecentDuplicate => "recent_duplicate",
            SkipReason::QuestionOnly => "question_only",
        }
    }
}

/// What the gate decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Skip(SkipReason),
    Process { priority: u8, immediate: bool },
}

struct RecentEntry {
    user_id: String,
    hash: String,
    seen_at: Instant,
}

/// Cheap pre-filter in front of the extractor.
pub struct ExtractionGate {
    min_content_length: usize,
    window_size: usize,
    window: Duration,
    immediate_priority: u8,
    recent: Mutex<VecDeque<RecentEntry>>,
}

impl ExtractionGate {
    pub fn new(gate: &GateConfig, batch: &BatchConfig) -> Self {
        Self {
            min_content_length: gate.min_content_length,
            window_size: gate.recent_window_size.max(1),
            window: Duration::from_secs(gate.recent_window_secs),
            immediate_priority: batch.immediate_priority,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Decide what to do with `text` from `user_id`.
    ///
    /// `force` bypasses every skip rule and always runs immediately. Only
    /// processed text is remembered for duplicate detection.
    pub async fn evaluate(&self, user_id: &str, text: &str, force: bool) -> GateDecision {
        let hash = content_hash(text);
        let now = Instant::now();

        if !force {
            if let Some(reason) = self.skip_reason(user_id, text, &hash, now).await {
                debug!(user_id, reason = %reason, "extraction gated");
                crate::telemetry::record_gate_skip(reason.as_str());
                return GateDecision::Skip(reason);
            }
        }

        self.remember(user_id, hash, now).await;
        let priority = priority_score(text);
        GateDecision::Process {
            priority,
            immediate: force || priority > self.immediate_priority,
        }
    }

    async fn skip_reason(
        &self,
        user_id: &str,
        text: &str,
        hash: &str,
        now: Instant,
    ) -> Option<SkipReason> {
        if text.trim().chars().count() < self.min_content_length {
            return Some(SkipReason::TooShort);
        }
        {
            let mut recent = self.recent.lock().await;
            self.prune_locked(&mut recent, now);
            if recent
                .iter()
                .any(|e| e.user_id == user_id && e.hash == hash)
            {
                return Some(SkipReason::RecentDuplicate);
            }
        }
        if is_question_only(text) {
            return Some(SkipReason::QuestionOnly);
        }
        None
    }

    async fn remember(&self, user_id: &str, hash: String, now: Instant) {
        let mut recent = self.recent.lock().await;
        recent.push_back(RecentEntry {
            user_id: user_id.to_string(),
            hash,
            seen_at: now,
        });
        while recent.len() > self.window_size {
            recent.pop_front();
        }
    }

    /// Drop entries older than the window. Returns how many were dropped.
    pub async fn prune(&self) -> usize {
        let mut recent = self.recent.lock().await;
        self.prune_locked(&mut recent, Instant::now())
    }

    fn prune_locked(&self, recent: &mut VecDeque<RecentEntry>, now: Instant) -> usize {
        let before = recent.len();
        while recent
            .front()
            .is_some_and(|e| now.duration_since(e.seen_at) >= self.window)
        {
            recent.pop_front();
        }
        before - recent.len()
    }
}

/// Priority in `0..=10`: base 5, +2 past 100 chars, +2 more past 500,
/// +1 per domain keyword hit (at most 3), +1 for a date, +1 for a
/// number or amount.
pub fn priority_score(text: &str) -> u8 {
    let len = text.chars().count();
    let mut score = usize::from(BASE_PRIORITY);
    if len > 100 {
        score += 2;
    }
    if len > 500 {
        score += 2;
    }
    score += keyword_hit_count(text).min(MAX_KEYWORD_BONUS);
    if DATE_RE.is_match(text) {
        score += 1;
    }
    if NUMBER_RE.is_match(text) {
        score += 1;
    }
    score.min(usize::from(MAX_PRIORITY)) as u8
}

/// True when the text has at least one sentence and every sentence is a
/// question.
pub fn is_question_only(text: &str) -> bool {
    let sentences = split_sentences(text);
    !sentences.is_empty() && sentences.iter().all(|s| is_question(s))
}

fn is_question(sentence: &str) -> bool {
    let s = sentence.trim();
    if s.ends_with('?') || s.ends_with('？') {
        return true;
    }
    let bare = s.trim_end_matches(['.', '!', '。', '！']);
    if bare.ends_with('吗') || bare.ends_with('呢') {
        return true;
    }
    // A terminated statement is never a question.
    if bare.len() != s.len() {
        return false;
    }
    let lower = s.to_lowercase();
    let first = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    QUESTION_OPENERS.contains(&first)
        || CJK_QUESTION_OPENERS.iter().any(|q| s.starts_with(q))
}
