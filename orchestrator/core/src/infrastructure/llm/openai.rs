// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// OpenAI Cognition Adapter
//
// Anti-Corruption Layer for OpenAI API
// Also works with OpenAI-compatible APIs (LM Studio, vLLM, etc.)

use crate::domain::cognition::{Cognition, CognitionError, PromptContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{status_error, transport_error};

pub struct OpenAIAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    label: &'static str,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    total_tokens: u32,
}

impl OpenAIAdapter {
    pub fn new(endpoint: String, api_key: String, model: String, temperature: f32, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
            temperature,
            max_tokens,
            label: "openai",
        }
    }

    /// Same wire format, different label in logs.
    pub fn compatible(endpoint: String, api_key: String, model: String, temperature: f32, max_tokens: u32) -> Self {
        Self {
            label: "openai-compatible",
            ..Self::new(endpoint, api_key, model, temperature, max_tokens)
        }
    }

    pub async fn health_check(&self) -> Result<(), CognitionError> {
        let url = format!("{}/models", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response.status(), String::new()))
        }
    }
}

#[async_trait]
impl Cognition for OpenAIAdapter {
    async fn complete(&self, prompt: &PromptContext) -> Result<String, CognitionError> {
        // Instructions go in the system message, context sections in the user message
        let context = PromptContext {
            purpose: prompt.purpose,
            instructions: String::new(),
            sections: prompt.sections.clone(),
        }
        .render();

        let request = OpenAIRequest {
            model: &self.model,
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: Some(prompt.instructions.clone()),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: Some(context.trim_start().to_string()),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, error_text));
        }

        let body: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| CognitionError::Malformed(format!("Failed to parse response: {}", e)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CognitionError::Malformed("No choices in response".into()))?;

        debug!(
            provider = self.label,
            purpose = prompt.purpose.as_str(),
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            tokens = body.usage.map(|u| u.total_tokens).unwrap_or(0),
            "Chat completion received"
        );

        choice
            .message
            .content
            .ok_or_else(|| CognitionError::Malformed("Choice has no content".into()))
    }

    fn provider(&self) -> &str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cognition::PromptPurpose;

    fn adapter(url: String) -> OpenAIAdapter {
        OpenAIAdapter::new(url, "sk-test".to_string(), "gpt-4o-mini".to_string(), 0.2, 256)
    }

    fn prompt() -> PromptContext {
        PromptContext::new(PromptPurpose::SynthesizeTests, "Write assertions.")
            .section("task", "add two numbers")
    }

    #[tokio::test]
    async fn test_instructions_go_to_system_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"messages": [{"role": "system", "content": "Write assertions."}, {"role": "user", "content": "=== TASK ===\nadd two numbers"}]}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"choices": [{"message": {"role": "assistant", "content": "assert add(1, 2) == 3"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18}}"#,
            )
            .create_async()
            .await;

        let text = adapter(server.url()).complete(&prompt()).await.unwrap();
        assert_eq!(text, "assert add(1, 2) == 3");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_codes_map_to_error_kinds() {
        let mut server = mockito::Server::new_async().await;
        let _limited = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let err = adapter(server.url()).complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, CognitionError::RateLimit));

        server.reset_async().await;
        let _denied = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid key")
            .create_async()
            .await;
        let err = adapter(server.url()).complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, CognitionError::Authentication(ref body) if body == "invalid key"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let err = adapter(server.url()).complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, CognitionError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let err = adapter("http://127.0.0.1:9".to_string()).complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, CognitionError::Network(_)));
    }
}
