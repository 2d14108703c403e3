// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Open memory categories: a normalized string newtype, the closed set of
//! core categories, and a registry tracking every category in use.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::RwLock;

/// Maximum length of a normalized category.
pub const MAX_CATEGORY_LEN: usize = 30;

/// Category used when normalization leaves nothing.
pub const FALLBACK_CATEGORY: &str = "other";

/// A memory category.
///
/// Always non-empty, lower-case, `[a-z0-9_]`, at most 30 characters.
/// Construct through [`Category::normalize`] or `From`, both of which
/// enforce the invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Category(String);

impl Category {
    /// Normalize arbitrary input into a valid category.
    ///
    /// Lower-cases, maps every character outside `[a-z0-9_]` to `_`,
    /// collapses runs of `_`, trims leading/trailing `_`, caps the length
    /// and falls back to `other` when nothing remains.
    pub fn normalize(raw: &str) -> Self {
        Self::try_normalize(raw).unwrap_or_else(|| Self(FALLBACK_CATEGORY.to_string()))
    }

    /// Like [`Category::normalize`], but `None` when the input has no
    /// `[a-z0-9]` content at all (CJK text, punctuation).
    pub fn try_normalize(raw: &str) -> Option<Self> {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars().flat_map(char::to_lowercase) {
            let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            };
            if mapped == '_' && out.ends_with('_') {
                continue;
            }
            out.push(mapped);
        }

        let trimmed = out.trim_matches('_');
        let mut capped: String = trimmed.chars().take(MAX_CATEGORY_LEN).collect();
        while capped.ends_with('_') {
            capped.pop();
        }

        if capped.is_empty() { None } else { Some(Self(capped)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The core category this value names, if any.
    pub fn core(&self) -> Option<CoreCategory> {
        self.0.parse().ok()
    }

    pub fn is_core(&self) -> bool {
        self.core().is_some()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Self::normalize(&raw)
    }
}

impl From<&str> for Category {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.0
    }
}

impl From<CoreCategory> for Category {
    fn from(core: CoreCategory) -> Self {
        Self(core.as_str().to_string())
    }
}

impl Default for Category {
    fn default() -> Self {
        Self(FALLBACK_CATEGORY.to_string())
    }
}

/// Categories known ahead of time. New ones may still be minted at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CoreCategory {
    PersonalInfo,
    Preference,
    WorkContext,
    Relationship,
    Health,
    Device,
    Location,
    Goal,
    Skill,
    Event,
    Other,
}

impl CoreCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreCategory::PersonalInfo => "personal_info",
            CoreCategory::Preference => "preference",
            CoreCategory::WorkContext => "work_context",
            CoreCategory::Relationship => "relationship",
            CoreCategory::Health => "health",
            CoreCategory::Device => "device",
            CoreCategory::Location => "location",
            CoreCategory::Goal => "goal",
            CoreCategory::Skill => "skill",
            CoreCategory::Event => "event",
            CoreCategory::Other => "other",
        }
    }

    /// Common model-produced synonyms for core categories.
    fn from_alias(normalized: &str) -> Option<Self> {
        let core = match normalized {
            "personal" | "personal_information" | "profile" | "identity" => {
                CoreCategory::PersonalInfo
            }
            "preferences" | "likes" | "dislikes" => CoreCategory::Preference,
            "work" | "job" | "career" | "project" | "professional" => CoreCategory::WorkContext,
            "relationships" | "family" | "friends" | "social" => CoreCategory::Relationship,
            "medical" | "wellness" | "fitness" => CoreCategory::Health,
            "devices" | "hardware" | "tech" | "technology" => CoreCategory::Device,
            "place" | "residence" | "home" | "address" => CoreCategory::Location,
            "goals" | "plan" | "plans" | "aspiration" => CoreCategory::Goal,
            "skills" | "expertise" | "hobby" | "hobbies" => CoreCategory::Skill,
            "events" | "appointment" | "schedule" => CoreCategory::Event,
            _ => return None,
        };
        Some(core)
    }
}

/// Registry entry for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub category: Category,
    pub is_core: bool,
    pub usage_count: u64,
}

/// Tracks every category seen (core or minted) with usage counts.
///
/// Core categories are always present, starting at a count of zero.
pub struct CategoryRegistry {
    entries: RwLock<HashMap<Category, u64>>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        let entries = CoreCategory::iter().map(|c| (Category::from(c), 0)).collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Normalize `raw` and map well-known synonyms onto core categories.
    pub fn resolve(raw: &str) -> Category {
        let normalized = Category::normalize(raw);
        match CoreCategory::from_alias(normalized.as_str()) {
            Some(core) => core.into(),
            None => normalized,
        }
    }

    /// Count one more memory written under `category`.
    pub async fn record(&self, category: &Category) {
        let mut entries = self.entries.write().await;
        *entries.entry(category.clone()).or_insert(0) += 1;
    }

    /// Replace usage counts with values loaded from the store.
    pub async fn seed(&self, counts: impl IntoIterator<Item = (Category, u64)>) {
        let mut entries = self.entries.write().await;
        for count in entries.values_mut() {
            *count = 0;
        }
        for (category, count) in counts {
            entries.insert(category, count);
        }
    }

    pub async fn is_known(&self, category: &Category) -> bool {
        self.entries.read().await.contains_key(category)
    }

    /// All categories, most used first, ties broken by name.
    pub async fn snapshot(&self) -> Vec<CategoryInfo> {
        let entries = self.entries.read().await;
        let mut infos: Vec<CategoryInfo> = entries
            .iter()
            .map(|(category, count)| CategoryInfo {
                is_core: category.is_core(),
                category: category.clone(),
                usage_count: *count,
            })
            .collect();
        infos.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| a.category.cmp(&b.category))
        });
        infos
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalizes_mixed_case_and_punctuation() {
        assert_eq!(Category::normalize("Work Context!").as_str(), "work_context");
        assert_eq!(Category::normalize("  __Health__ ").as_str(), "health");
        assert_eq!(Category::normalize("a--b  c").as_str(), "a_b_c");
    }

    #[test]
    fn empty_or_symbol_only_falls_back_to_other() {
        assert_eq!(Category::normalize("").as_str(), "other");
        assert_eq!(Category::normalize("!!!").as_str(), "other");
        assert_eq!(Category::normalize("日本語").as_str(), "other");
    }

    #[test]
    fn try_normalize_rejects_text_without_ascii_content() {
        assert_eq!(Category::try_normalize("日本語"), None);
        assert_eq!(Category::try_normalize("???"), None);
        assert_eq!(Category::try_normalize("  "), None);
        assert_eq!(
            Category::try_normalize("Work Context!").unwrap().as_str(),
            "work_context"
        );
    }

    #[test]
    fn long_input_is_capped_without_trailing_underscore() {
        let raw = "a".repeat(29) + " bcdef";
        let category = Category::normalize(&raw);
        assert!(category.as_str().len() <= MAX_CATEGORY_LEN);
        assert!(!category.as_str().ends_with('_'));
    }

    #[test]
    fn deserializing_normalizes() {
        let category: Category = serde_json::from_str("\"Device Info\"").unwrap();
        assert_eq!(category.as_str(), "device_info");
    }

    #[test]
    fn core_detection() {
        assert_eq!(
            Category::from("personal_info").core(),
            Some(CoreCategory::PersonalInfo)
        );
        assert!(!Category::from("gardening").is_core());
    }

    #[test]
    fn resolve_maps_aliases_to_core() {
        assert_eq!(CategoryRegistry::resolve("Work").as_str(), "work_context");
        assert_eq!(CategoryRegistry::resolve("Family").as_str(), "relationship");
        assert_eq!(CategoryRegistry::resolve("Gardening").as_str(), "gardening");
    }

    #[tokio::test]
    async fn registry_tracks_minted_categories() {
        let registry = CategoryRegistry::new();
        let minted = Category::from("gardening");
        assert!(!registry.is_known(&minted).await);

        registry.record(&minted).await;
        registry.record(&minted).await;
        registry.record(&Category::from(CoreCategory::Health)).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].category, minted);
        assert_eq!(snapshot[0].usage_count, 2);
        assert!(!snapshot[0].is_core);
        assert_eq!(snapshot[1].category.as_str(), "health");
        assert!(snapshot[1].is_core);
        assert_eq!(snapshot.len(), CoreCategory::iter().count() + 1);
    }

    #[tokio::test]
    async fn seed_replaces_counts() {
        let registry = CategoryRegistry::new();
        registry.record(&Category::from("device")).await;
        registry
            .seed(vec![(Category::from("location"), 3)])
            .await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].category.as_str(), "location");
        assert_eq!(snapshot[0].usage_count, 3);
        let device = snapshot
            .iter()
            .find(|i| i.category.as_str() == "device")
            .unwrap();
        assert_eq!(device.usage_count, 0);
        assert!(registry.is_known(&Category::from("device")).await);
    }

    proptest! {
        #[test]
        fn normalized_category_satisfies_invariant(raw in ".{0,80}") {
            let category = Category::normalize(&raw);
            let s = category.as_str();
            prop_assert!(!s.is_empty());
            prop_assert!(s.len() <= MAX_CATEGORY_LEN);
            prop_assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            prop_assert!(!s.starts_with('_') && !s.ends_with('_'));
            prop_assert!(!s.contains("__"));
        }

        #[test]
        fn normalization_is_idempotent(raw in ".{0,80}") {
            let once = Category::normalize(&raw);
            let twice = Category::normalize(once.as_str());
            prop_assert_eq!(once, twice);
        }
    }
}
