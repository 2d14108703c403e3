// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as probability-like weights in `[0, 1]`, non-zero sizes, and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::MemoriaConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn check_unit_interval(errors: &mut Vec<ConfigError>, key: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(ConfigError::Validation {
            message: format!("{key} must be between 0.0 and 1.0, got {value}"),
        });
    }
}

fn check_nonzero(errors: &mut Vec<ConfigError>, key: &str, value: u64) {
    if value == 0 {
        errors.push(ConfigError::Validation {
            message: format!("{key} must be greater than 0"),
        });
    }
}

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &MemoriaConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "logging.level `{}` is not one of: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.embedding.base_url.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "embedding.base_url must not be empty".to_string(),
        });
    }
    check_nonzero(&mut errors, "embedding.dimensions", config.embedding.dimensions as u64);
    check_nonzero(&mut errors, "embedding.timeout_secs", config.embedding.timeout_secs);
    check_nonzero(&mut errors, "llm.timeout_secs", config.llm.timeout_secs);
    check_nonzero(&mut errors, "llm.max_tokens", u64::from(config.llm.max_tokens));

    if !(0.0..=1.0).contains(&config.llm.temperature) {
        errors.push(ConfigError::Validation {
            message: format!(
                "llm.temperature must be between 0.0 and 1.0, got {}",
                config.llm.temperature
            ),
        });
    }

    check_nonzero(&mut errors, "extraction.chunk_size", config.extraction.chunk_size as u64);
    check_unit_interval(&mut errors, "extraction.min_confidence", config.extraction.min_confidence);
    check_unit_interval(
        &mut errors,
        "extraction.dedup_similarity",
        config.extraction.dedup_similarity,
    );

    let search = &config.search;
    check_unit_interval(&mut errors, "search.vector_threshold", search.vector_threshold);
    check_unit_interval(&mut errors, "search.keyword_weight", search.keyword_weight);
    check_unit_interval(&mut errors, "search.semantic_weight", search.semantic_weight);
    check_unit_interval(&mut errors, "search.importance_weight", search.importance_weight);
    check_unit_interval(&mut errors, "search.dynamic_ratio", search.dynamic_ratio);
    check_unit_interval(&mut errors, "search.dynamic_floor", search.dynamic_floor);
    check_unit_interval(
        &mut errors,
        "search.index_coverage_ratio",
        search.index_coverage_ratio,
    );
    if !(search.temporal_decay > 0.0 && search.temporal_decay <= 1.0) {
        errors.push(ConfigError::Validation {
            message: format!(
                "search.temporal_decay must be in (0.0, 1.0], got {}",
                search.temporal_decay
            ),
        });
    }
    check_nonzero(&mut errors, "search.max_results", search.max_results as u64);
    check_nonzero(&mut errors, "search.stage_limit", search.stage_limit as u64);

    check_nonzero(&mut errors, "cache.max_size", config.cache.max_size as u64);
    check_nonzero(&mut errors, "cache.expiry_secs", config.cache.expiry_secs);
    check_nonzero(
        &mut errors,
        "cache.cleanup_interval_secs",
        config.cache.cleanup_interval_secs,
    );

    check_nonzero(
        &mut errors,
        "gate.recent_window_size",
        config.gate.recent_window_size as u64,
    );

    check_nonzero(&mut errors, "batch.interval_secs", config.batch.interval_secs);
    check_nonzero(&mut errors, "batch.batch_size", config.batch.batch_size as u64);
    if config.batch.immediate_priority > 10 {
        errors.push(ConfigError::Validation {
            message: format!(
                "batch.immediate_priority must be at most 10, got {}",
                config.batch.immediate_priority
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_message(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = MemoriaConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = MemoriaConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "database_path"));
    }

    #[test]
    fn out_of_range_threshold_fails_validation() {
        let mut config = MemoriaConfig::default();
        config.search.vector_threshold = 1.5;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "search.vector_threshold"));
    }

    #[test]
    fn zero_batch_size_fails_validation() {
        let mut config = MemoriaConfig::default();
        config.batch.batch_size = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "batch.batch_size"));
    }

    #[test]
    fn errors_are_collected_not_fail_fast() {
        let mut config = MemoriaConfig::default();
        config.logging.level = "loud".to_string();
        config.search.temporal_decay = 0.0;
        config.cache.max_size = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn valid_custom_config_passes() {
        let mut config = MemoriaConfig::default();
        config.logging.level = "DEBUG".to_string();
        config.storage.database_path = "/tmp/test.db".to_string();
        config.search.vector_threshold = 0.5;
        config.batch.immediate_priority = 10;
        assert!(validate_config(&config).is_ok());
    }
}
