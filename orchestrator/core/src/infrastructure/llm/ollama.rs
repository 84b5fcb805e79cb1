// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Ollama Cognition Adapter
//
// Anti-Corruption Layer for Ollama local models
// Supports air-gapped deployments with local LLMs

use crate::domain::cognition::{Cognition, CognitionError, PromptContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{status_error, transport_error};

pub struct OllamaAdapter {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaAdapter {
    pub fn new(endpoint: String, model: String, temperature: f32, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            temperature,
            max_tokens,
        }
    }

    pub async fn health_check(&self) -> Result<(), CognitionError> {
        // Check if Ollama server is running by listing models
        let url = format!("{}/api/tags", self.endpoint.trim_end_matches('/'));
        let response = self.client.get(&url).send().await.map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CognitionError::Network(format!("HTTP {}", response.status())))
        }
    }
}

#[async_trait]
impl Cognition for OllamaAdapter {
    async fn complete(&self, prompt: &PromptContext) -> Result<String, CognitionError> {
        let request = OllamaRequest {
            model: &self.model,
            prompt: prompt.render(),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens as i32,
            },
        };

        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(if status == 404 {
                CognitionError::Provider(format!("model '{}' not found: {}", self.model, error_text))
            } else {
                status_error(status, error_text)
            });
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| CognitionError::Malformed(format!("Failed to parse response: {}", e)))?;

        debug!(
            purpose = prompt.purpose.as_str(),
            tokens = body.eval_count.unwrap_or(0),
            "Ollama completion received"
        );
        Ok(body.response)
    }

    fn provider(&self) -> &str {
        "ollama"
    }
}
