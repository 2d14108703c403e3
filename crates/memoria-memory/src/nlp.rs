// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword extraction and related-term expansion.
//!
//! [`RuleBasedNlp`] is deterministic and offline. [`LlmNlp`] asks the
//! completion service and falls back to the rule-based implementation on
//! any failure, so callers always get an answer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use memoria_core::traits::{CompletionAdapter, NlpAdapter, PluginAdapter};
use memoria_core::types::{AdapterType, CompletionRequest, HealthStatus};
use memoria_core::MemoriaError;

use crate::text::{content_words, is_stopword};

/// Upper bound on keywords returned by either implementation.
pub const MAX_KEYWORDS: usize = 10;

/// Upper bound on related terms returned by either implementation.
pub const MAX_RELATED_TERMS: usize = 20;

/// Static related-term map used for concept expansion.
static RELATED_TERMS: &[(&str, &[&str])] = &[
    ("job", &["work", "career", "company", "office", "employer"]),
    ("work", &["job", "career", "company", "office", "colleague"]),
    ("career", &["job", "work", "profession"]),
    ("company", &["work", "employer", "office"]),
    ("live", &["lives", "living", "home", "city", "moved"]),
    ("lives", &["live", "home", "city"]),
    ("home", &["live", "house", "apartment", "city"]),
    ("city", &["live", "location", "town"]),
    ("moved", &["live", "relocated", "city"]),
    ("family", &["wife", "husband", "kids", "children", "parents"]),
    ("wife", &["married", "partner", "family"]),
    ("husband", &["married", "partner", "family"]),
    ("kids", &["children", "son", "daughter", "family"]),
    ("pet", &["dog", "cat"]),
    ("dog", &["pet", "puppy"]),
    ("cat", &["pet", "kitten"]),
    ("food", &["eat", "diet", "cooking", "restaurant"]),
    ("eat", &["food", "diet", "vegetarian"]),
    ("diet", &["food", "vegetarian", "vegan", "allergy"]),
    ("health", &["doctor", "medication", "allergy", "exercise"]),
    ("allergy", &["allergic", "health", "medication"]),
    ("exercise", &["gym", "running", "fitness"]),
    ("hobby", &["enjoy", "play", "weekend"]),
    ("music", &["guitar", "piano", "band", "song"]),
    ("computer", &["laptop", "macbook", "desktop"]),
    ("laptop", &["computer", "macbook", "notebook"]),
    ("phone", &["iphone", "android", "mobile"]),
    ("travel", &["trip", "vacation", "flight"]),
    ("trip", &["travel", "vacation", "visit"]),
    ("goal", &["plan", "want", "learning", "saving"]),
    ("learn", &["learning", "study", "course"]),
    ("birthday", &["born", "age"]),
    ("name", &["called", "named"]),
    ("language", &["speak", "fluent", "english"]),
    ("programming", &["code", "rust", "python", "developer"]),
    ("工作", &["公司", "职业", "同事"]),
    ("住", &["家", "城市", "搬"]),
];

/// Offline keyword extraction with a static related-term map.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedNlp;

impl RuleBasedNlp {
    pub fn new() -> Self {
        Self
    }

    /// Content words ranked by frequency, ties in order of first appearance.
    pub fn keywords(text: &str) -> Vec<String> {
        let words = content_words(text);
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (pos, word) in words.iter().enumerate() {
            counts.entry(word.as_str()).or_insert((0, pos)).0 += 1;
        }
        let mut ranked: Vec<(&str, usize, usize)> = counts
            .into_iter()
            .map(|(word, (count, first))| (word, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(word, _, _)| word.to_string())
            .collect()
    }

    /// Related terms for `keywords` from the static map, excluding the keywords themselves.
    pub fn related(keywords: &[String]) -> Vec<String> {
        let mut related: Vec<String> = Vec::new();
        for keyword in keywords {
            let key = keyword.to_lowercase();
            let Some((_, terms)) = RELATED_TERMS.iter().find(|(k, _)| *k == key) else {
                continue;
            };
            for term in terms.iter() {
                let term = term.to_string();
                if !keywords.iter().any(|k| k.eq_ignore_ascii_case(&term)) && !related.contains(&term)
                {
                    related.push(term);
                }
            }
        }
        related.truncate(MAX_RELATED_TERMS);
        related
    }
}

#[async_trait]
impl PluginAdapter for RuleBasedNlp {
    fn name(&self) -> &str {
        "rule-based-nlp"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Nlp
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl NlpAdapter for RuleBasedNlp {
    async fn extract_keywords(&self, text: &str) -> Result<Vec<String>, MemoriaError> {
        Ok(Self::keywords(text))
    }

    async fn generate_related_terms(
        &self,
        keywords: &[String],
    ) -> Result<Vec<String>, MemoriaError> {
        Ok(Self::related(keywords))
    }
}

const KEYWORD_PROMPT: &str = "Extract the most important search keywords from the user's text. \
Respond with a JSON array of lower-case strings and nothing else.";

const RELATED_PROMPT: &str = "Given these keywords, list closely related words a person might \
have used to state the same fact (synonyms, broader and narrower terms). Respond with a JSON \
array of lower-case strings and nothing else.";

/// NLP backed by the completion service, degrading to [`RuleBasedNlp`].
pub struct LlmNlp {
    completer: Arc<dyn CompletionAdapter>,
    timeout: Duration,
}

impl LlmNlp {
    pub fn new(completer: Arc<dyn CompletionAdapter>, timeout: Duration) -> Self {
        Self { completer, timeout }
    }

    async fn ask(&self, system_prompt: &str, user_prompt: String) -> Result<Vec<String>, MemoriaError> {
        let request = CompletionRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt,
            max_tokens: 256,
            temperature: 0.0,
        };
        let response = tokio::time::timeout(self.timeout, self.completer.complete(request))
            .await
            .map_err(|_| MemoriaError::Timeout {
                duration: self.timeout,
            })??;
        parse_term_list(&response.text)
    }
}

#[async_trait]
impl PluginAdapter for LlmNlp {
    fn name(&self) -> &str {
        "llm-nlp"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Nlp
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        self.completer.health_check().await
    }
}

#[async_trait]
impl NlpAdapter for LlmNlp {
    async fn extract_keywords(&self, text: &str) -> Result<Vec<String>, MemoriaError> {
        match self.ask(KEYWORD_PROMPT, text.to_string()).await {
            Ok(keywords) if !keywords.is_empty() => {
                debug!(count = keywords.len(), "llm keywords");
                Ok(keywords.into_iter().take(MAX_KEYWORDS).collect())
            }
            Ok(_) => Ok(RuleBasedNlp::keywords(text)),
            Err(e) => {
                warn!(error = %e, "keyword extraction via llm failed, using rules");
                crate::telemetry::record_degraded("nlp");
                Ok(RuleBasedNlp::keywords(text))
            }
        }
    }

    async fn generate_related_terms(
        &self,
        keywords: &[String],
    ) -> Result<Vec<String>, MemoriaError> {
        if keywords.is_empty() {
            return Ok(vec![]);
        }
        match self.ask(RELATED_PROMPT, keywords.join(", ")).await {
            Ok(terms) if !terms.is_empty() => Ok(terms
                .into_iter()
                .filter(|t| !keywords.contains(t))
                .take(MAX_RELATED_TERMS)
                .collect()),
            Ok(_) => Ok(RuleBasedNlp::related(keywords)),
            Err(e) => {
                warn!(error = %e, "related-term expansion via llm failed, using rules");
                crate::telemetry::record_degraded("nlp");
                Ok(RuleBasedNlp::related(keywords))
            }
        }
    }
}

/// Parse a JSON string array out of a model reply, tolerating code fences
/// and surrounding prose. Entries are trimmed, lower-cased and deduplicated.
fn parse_term_list(reply: &str) -> Result<Vec<String>, MemoriaError> {
    let start = reply
        .find('[')
        .ok_or_else(|| MemoriaError::Parse("no JSON array in reply".to_string()))?;
    let end = reply
        .rfind(']')
        .filter(|end| *end > start)
        .ok_or_else(|| MemoriaError::Parse("unterminated JSON array in reply".to_string()))?;
    let raw: Vec<String> = serde_json::from_str(&reply[start..=end])
        .map_err(|e| MemoriaError::Parse(format!("term list: {e}")))?;

    let mut terms: Vec<String> = Vec::new();
    for term in raw {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !is_stopword(&term) && !terms.contains(&term) {
            terms.push(term);
        }
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_test_utils::MockCompleter;

    #[tokio::test]
    async fn rule_based_keywords_rank_by_frequency() {
        let nlp = RuleBasedNlp::new();
        let keywords = nlp
            .extract_keywords("coffee in the morning, coffee after lunch, tea at night")
            .await
            .unwrap();
        assert_eq!(keywords[0], "coffee");
        assert!(keywords.contains(&"tea".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
    }

    #[tokio::test]
    async fn rule_based_related_terms_skip_inputs() {
        let nlp = RuleBasedNlp::new();
        let related = nlp
            .generate_related_terms(&["job".to_string(), "work".to_string()])
            .await
            .unwrap();
        assert!(related.contains(&"career".to_string()));
        assert!(!related.contains(&"work".to_string()));
        assert!(!related.contains(&"job".to_string()));
    }

    #[test]
    fn unknown_keywords_have_no_related_terms() {
        assert!(RuleBasedNlp::related(&["zeppelin".to_string()]).is_empty());
    }

    #[test]
    fn term_list_parses_through_fences() {
        let terms = parse_term_list("```json\n[\"Seattle\", \"the\", \"seattle\", \"city\"]\n```").unwrap();
        assert_eq!(terms, vec!["seattle", "city"]);
        assert!(parse_term_list("no array here").is_err());
    }

    #[tokio::test]
    async fn llm_nlp_uses_model_reply() {
        let completer = Arc::new(MockCompleter::new(vec!["[\"seattle\", \"home\"]".to_string()]));
        let nlp = LlmNlp::new(completer.clone(), Duration::from_secs(1));
        let keywords = nlp.extract_keywords("where is home").await.unwrap();
        assert_eq!(keywords, vec!["seattle", "home"]);
        assert_eq!(completer.call_count(), 1);
    }

    #[tokio::test]
    async fn llm_nlp_falls_back_on_failure() {
        let completer = Arc::new(MockCompleter::failing());
        let nlp = LlmNlp::new(completer, Duration::from_secs(1));
        let keywords = nlp.extract_keywords("my job at the bakery").await.unwrap();
        assert_eq!(keywords, vec!["job", "bakery"]);
        let related = nlp.generate_related_terms(&keywords).await.unwrap();
        assert!(related.contains(&"work".to_string()));
    }
}
