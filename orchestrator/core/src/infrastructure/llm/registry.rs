// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Cognition Provider Registry - Provider Selection and Fallback
//
// Builds provider adapters from configuration and exposes them as a single
// Cognition. Transient failures of the default provider fall through to the
// configured fallback provider; permanent ones (bad key, malformed output)
// are returned as-is.

use crate::domain::cognition::{Cognition, CognitionError, PromptContext};
use crate::domain::config::{CognitionConfig, CognitionProviderConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Cognition>>,
    default_provider: String,
    fallback_provider: Option<String>,
}

impl ProviderRegistry {
    /// Create provider registry from the cognition section of the config
    pub fn from_config(config: &CognitionConfig) -> anyhow::Result<Self> {
        Self::from_config_with(config, |key| std::env::var(key).ok())
    }

    pub fn from_config_with(
        config: &CognitionConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut providers = HashMap::new();

        info!("Initializing cognition provider registry");

        for provider_config in &config.providers {
            if !provider_config.enabled {
                info!("Provider '{}' disabled, skipping", provider_config.name);
                continue;
            }

            match Self::create_provider(provider_config, &env) {
                Ok(provider) => {
                    info!(
                        "Initialized provider '{}' ({} / {})",
                        provider_config.name, provider_config.provider_type, provider_config.model
                    );
                    providers.insert(provider_config.name.clone(), provider);
                }
                Err(e) => {
                    warn!("Failed to initialize provider '{}': {}", provider_config.name, e);
                    // Continue with other providers
                }
            }
        }

        let default_provider = match &config.default_provider {
            Some(name) => name.clone(),
            None => config
                .providers
                .iter()
                .find(|p| providers.contains_key(&p.name))
                .map(|p| p.name.clone())
                .ok_or_else(|| anyhow::anyhow!("No cognition providers available"))?,
        };
        if !providers.contains_key(&default_provider) {
            anyhow::bail!("Default provider '{}' is not available", default_provider);
        }

        let fallback_provider = match &config.fallback_provider {
            Some(name) if providers.contains_key(name) => Some(name.clone()),
            Some(name) => {
                warn!("Fallback provider '{}' is not available, continuing without it", name);
                None
            }
            None => None,
        };

        Ok(Self {
            providers,
            default_provider,
            fallback_provider,
        })
    }

    /// Registry over already-built providers. Used by tests and embedders.
    pub fn with_providers(
        providers: HashMap<String, Arc<dyn Cognition>>,
        default_provider: impl Into<String>,
        fallback_provider: Option<String>,
    ) -> Self {
        Self {
            providers,
            default_provider: default_provider.into(),
            fallback_provider,
        }
    }

    fn create_provider(
        config: &CognitionProviderConfig,
        env: &impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Arc<dyn Cognition>> {
        let api_key = Self::resolve_api_key(&config.api_key, env)?;

        let provider: Arc<dyn Cognition> = match config.provider_type.as_str() {
            "openai" => Arc::new(OpenAIAdapter::new(
                config.endpoint.clone(),
                api_key,
                config.model.clone(),
                config.temperature,
                config.max_tokens,
            )),
            // OpenAI-compatible APIs (LM Studio, vLLM, etc.)
            "openai-compatible" => Arc::new(OpenAIAdapter::compatible(
                config.endpoint.clone(),
                api_key,
                config.model.clone(),
                config.temperature,
                config.max_tokens,
            )),
            "ollama" => Arc::new(OllamaAdapter::new(
                config.endpoint.clone(),
                config.model.clone(),
                config.temperature,
                config.max_tokens,
            )),
            _ => anyhow::bail!("Unsupported provider type: {}", config.provider_type),
        };

        Ok(provider)
    }

    /// Resolve API key from config (supports "env:VAR_NAME" syntax)
    fn resolve_api_key(
        key: &Option<String>,
        env: &impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<String> {
        match key {
            Some(k) => match k.strip_prefix("env:") {
                Some(var_name) => env(var_name)
                    .ok_or_else(|| anyhow::anyhow!("Environment variable not set: {}", var_name)),
                None => Ok(k.clone()),
            },
            None => Ok(String::new()), // For local providers without auth
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn fallback_provider(&self) -> Option<&str> {
        self.fallback_provider.as_deref()
    }
}

#[async_trait]
impl Cognition for ProviderRegistry {
    async fn complete(&self, prompt: &PromptContext) -> Result<String, CognitionError> {
        let primary = self.providers.get(&self.default_provider).ok_or_else(|| {
            CognitionError::Provider(format!("Provider '{}' not found", self.default_provider))
        })?;

        let err = match primary.complete(prompt).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        let fallback = self
            .fallback_provider
            .as_ref()
            .and_then(|name| self.providers.get(name).map(|p| (name, p)));

        match fallback {
            Some((name, provider)) if err.is_transient() => {
                warn!(
                    "Provider '{}' failed ({}), trying fallback provider '{}'",
                    self.default_provider, err, name
                );
                metrics::counter!("reflexion_cognition_fallbacks_total", "provider" => name.clone())
                    .increment(1);
                provider.complete(prompt).await
            }
            _ => Err(err),
        }
    }

    fn provider(&self) -> &str {
        &self.default_provider
    }
}
