// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic Claude completion adapter for Memoria.
//!
//! This crate implements [`CompletionAdapter`] for the Anthropic Messages API.
//! Extraction and query expansion only need single-shot completions, so
//! responses are read whole rather than streamed.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use memoria_config::model::LlmConfig;
use memoria_core::types::{
    AdapterType, CompletionRequest, CompletionResponse, HealthStatus, TokenUsage,
};
use memoria_core::{CompletionAdapter, MemoriaError, PluginAdapter, RetryPolicy};
use tracing::{debug, info};

use crate::client::AnthropicClient;
use crate::types::{ApiMessage, MessageRequest};

/// Anthropic Claude completer implementing [`CompletionAdapter`].
///
/// API key resolution order: config -> `ANTHROPIC_API_KEY` env var -> error.
pub struct AnthropicCompleter {
    client: AnthropicClient,
    model: String,
}

impl AnthropicCompleter {
    /// Creates a new completer from the LLM section of the configuration.
    ///
    /// # API Key Resolution
    /// 1. `llm.api_key` if set and non-empty
    /// 2. `ANTHROPIC_API_KEY` environment variable
    /// 3. Returns a config error if neither is available
    pub fn new(config: &LlmConfig) -> Result<Self, MemoriaError> {
        let api_key = resolve_api_key(&config.api_key)?;
        let client = AnthropicClient::new(
            &api_key,
            &config.api_version,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?
        .with_retry_policy(RetryPolicy::with_retries(config.max_retries));

        info!(model = %config.model, "Anthropic completer initialized");

        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    /// The model every request is sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_message_request(&self, request: CompletionRequest) -> MessageRequest {
        let system = if request.system_prompt.is_empty() {
            None
        } else {
            Some(request.system_prompt)
        };
        MessageRequest {
            model: self.model.clone(),
            messages: vec![ApiMessage::user(request.user_prompt)],
            system,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

/// Resolves the API key from config or environment.
fn resolve_api_key(config_key: &Option<String>) -> Result<String, MemoriaError> {
    if let Some(key) = config_key.as_ref().filter(|k| !k.is_empty()) {
        return Ok(key.clone());
    }

    std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
        MemoriaError::Config(
            "Anthropic API key not found. Set llm.api_key in config or ANTHROPIC_API_KEY environment variable.".into(),
        )
    })
}

#[async_trait]
impl PluginAdapter for AnthropicCompleter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        // No probe request: a health check should not spend tokens.
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl CompletionAdapter for AnthropicCompleter {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, MemoriaError> {
        let api_request = self.to_message_request(request);
        let response = self.client.complete_message(&api_request).await?;

        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "completion finished"
        );

        Ok(CompletionResponse {
            text: response.text(),
            model: response.model,
            stop_reason: response.stop_reason,
            usage: TokenUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test-123".into()),
            model: "claude-test".into(),
            base_url: format!("{}/v1/messages", server.uri()),
            max_retries: 0,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn resolve_api_key_from_config() {
        let result = resolve_api_key(&Some("sk-test-123".into()));
        assert_eq!(result.unwrap(), "sk-test-123");
    }

    #[test]
    #[serial]
    fn resolve_api_key_empty_config_falls_back_to_env() {
        // SAFETY: serialized with every other test that touches the environment.
        unsafe { std::env::set_var("ANTHROPIC_API_KEY", "sk-from-env") };
        let result = resolve_api_key(&Some("".into()));
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
        assert_eq!(result.unwrap(), "sk-from-env");
    }

    #[test]
    #[serial]
    fn resolve_api_key_missing_is_config_error() {
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
        let err = resolve_api_key(&None).unwrap_err();
        assert!(matches!(err, MemoriaError::Config(_)));
    }

    #[tokio::test]
    async fn complete_maps_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-test",
                "system": "Extract memories.",
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "I live in Seattle"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "{\"memories\":[]}"}],
                "model": "claude-test",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 42, "output_tokens": 7}
            })))
            .mount(&server)
            .await;

        let completer = AnthropicCompleter::new(&config_for(&server)).unwrap();
        let response = completer
            .complete(CompletionRequest {
                system_prompt: "Extract memories.".into(),
                user_prompt: "I live in Seattle".into(),
                max_tokens: 256,
                temperature: 0.0,
            })
            .await
            .unwrap();

        assert_eq!(response.text, "{\"memories\":[]}");
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.input_tokens, 42);
        assert_eq!(response.usage.output_tokens, 7);
    }

    #[tokio::test]
    async fn empty_system_prompt_is_omitted() {
        let server = MockServer::start().await;
        let completer = AnthropicCompleter::new(&config_for(&server)).unwrap();
        let request = completer.to_message_request(CompletionRequest {
            system_prompt: String::new(),
            user_prompt: "hi".into(),
            max_tokens: 10,
            temperature: 0.0,
        });
        assert!(request.system.is_none());
        assert_eq!(request.model, "claude-test");
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
    }

    #[tokio::test]
    async fn adapter_metadata() {
        let server = MockServer::start().await;
        let completer = AnthropicCompleter::new(&config_for(&server)).unwrap();
        assert_eq!(completer.name(), "anthropic");
        assert_eq!(completer.adapter_type(), AdapterType::Completion);
        assert_eq!(completer.model(), "claude-test");
        assert_eq!(completer.health_check().await.unwrap(), HealthStatus::Healthy);
    }
}
