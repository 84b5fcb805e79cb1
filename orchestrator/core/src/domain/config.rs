// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Reflexion Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) covering:
// - Loop budget: iterations, generation retries, timeouts
// - Cognition providers with default/fallback selection
// - Docker sandbox image and resource limits
// - Checkpoint and lesson storage locations
// - Logging

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "reflexion.dev/v1";
pub const KIND: &str = "ReflexionConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexionConfigManifest {
    /// API version (must be "reflexion.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ReflexionConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ReflexionConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflexionConfigSpec {
    #[serde(rename = "loop", default)]
    pub loop_config: LoopConfig,

    #[serde(default)]
    pub cognition: CognitionConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Generate→Execute passes allowed per episode
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive generation failures tolerated before the episode aborts
    #[serde(default = "default_max_generation_retries")]
    pub max_generation_retries: u32,

    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    #[serde(default = "default_cognition_timeout_secs")]
    pub cognition_timeout_secs: u64,

    /// Lessons pulled from the knowledge store as extra prompt context
    #[serde(default = "default_lesson_retrieval_limit")]
    pub lesson_retrieval_limit: usize,

    #[serde(default = "default_stderr_snippet_chars")]
    pub stderr_snippet_chars: usize,
}

impl LoopConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn cognition_timeout(&self) -> Duration {
        Duration::from_secs(self.cognition_timeout_secs)
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_generation_retries: default_max_generation_retries(),
            execution_timeout_secs: default_execution_timeout_secs(),
            cognition_timeout_secs: default_cognition_timeout_secs(),
            lesson_retrieval_limit: default_lesson_retrieval_limit(),
            stderr_snippet_chars: default_stderr_snippet_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionConfig {
    #[serde(default)]
    pub providers: Vec<CognitionProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Used when the default provider is transiently unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,
}

impl Default for CognitionConfig {
    fn default() -> Self {
        Self {
            providers: vec![CognitionProviderConfig {
                name: "ollama".to_string(),
                provider_type: "ollama".to_string(),
                endpoint: "http://localhost:11434".to_string(),
                api_key: None,
                enabled: true,
                model: "qwen2.5-coder:7b".to_string(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
            }],
            default_provider: Some("ollama".to_string()),
            fallback_provider: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionProviderConfig {
    /// Unique provider name (e.g., "ollama-local", "openai")
    pub name: String,

    /// "ollama", "openai" or "openai-compatible"
    #[serde(rename = "type")]
    pub provider_type: String,

    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_image")]
    pub image: String,

    /// Docker socket path; platform default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,

    /// Pull the image on first use if it is missing locally
    #[serde(default = "default_true")]
    pub autopull: bool,

    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: i64,

    #[serde(default = "default_cpu_millis")]
    pub cpu_millis: i64,

    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,

    /// "none" keeps generated code off the network
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            docker_socket: None,
            autopull: true,
            memory_bytes: default_memory_bytes(),
            cpu_millis: default_cpu_millis(),
            pids_limit: default_pids_limit(),
            network_mode: default_network_mode(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for episode checkpoints; in-memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,

    /// JSONL journal of lessons; in-memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_journal: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_generation_retries() -> u32 {
    3
}

fn default_execution_timeout_secs() -> u64 {
    30
}

fn default_cognition_timeout_secs() -> u64 {
    120
}

fn default_lesson_retrieval_limit() -> usize {
    3
}

fn default_stderr_snippet_chars() -> usize {
    400
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_memory_bytes() -> i64 {
    256 * 1024 * 1024
}

fn default_cpu_millis() -> i64 {
    1000
}

fn default_pids_limit() -> i64 {
    64
}

fn default_network_mode() -> String {
    "none".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ReflexionConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "reflexion".to_string(),
                labels: None,
            },
            spec: ReflexionConfigSpec::default(),
        }
    }
}

impl ReflexionConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. REFLEXION_CONFIG_PATH environment variable
    /// 2. ./reflexion-config.yaml (working directory)
    /// 3. ~/.reflexion/config.yaml (user home)
    /// 4. /etc/reflexion/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("REFLEXION_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./reflexion-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".reflexion").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/reflexion/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("REFLEXION_MAX_ITERATIONS") {
            match val.trim().parse::<u32>() {
                Ok(n) => {
                    tracing::info!("Environment override: REFLEXION_MAX_ITERATIONS={}", n);
                    self.spec.loop_config.max_iterations = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for REFLEXION_MAX_ITERATIONS: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("REFLEXION_EXECUTION_TIMEOUT_SECS") {
            match val.trim().parse::<u64>() {
                Ok(n) => {
                    tracing::info!("Environment override: REFLEXION_EXECUTION_TIMEOUT_SECS={}", n);
                    self.spec.loop_config.execution_timeout_secs = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for REFLEXION_EXECUTION_TIMEOUT_SECS: '{}'. Expected seconds. Ignoring.",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let lp = &self.spec.loop_config;
        if lp.max_iterations == 0 {
            anyhow::bail!("spec.loop.max_iterations must be at least 1");
        }
        if lp.execution_timeout_secs == 0 {
            anyhow::bail!("spec.loop.execution_timeout_secs must be greater than 0");
        }
        if lp.cognition_timeout_secs == 0 {
            anyhow::bail!("spec.loop.cognition_timeout_secs must be greater than 0");
        }

        let cognition = &self.spec.cognition;
        for provider in &cognition.providers {
            if provider.name.is_empty() {
                anyhow::bail!("Cognition provider name cannot be empty");
            }
            if provider.endpoint.is_empty() {
                anyhow::bail!("Cognition provider endpoint cannot be empty for: {}", provider.name);
            }
            if provider.model.is_empty() {
                anyhow::bail!("Cognition provider must declare a model: {}", provider.name);
            }
            if !matches!(provider.provider_type.as_str(), "ollama" | "openai" | "openai-compatible") {
                anyhow::bail!(
                    "Unsupported cognition provider type '{}' for: {}",
                    provider.provider_type,
                    provider.name
                );
            }
        }

        if let Some(default_provider) = &cognition.default_provider {
            if !cognition.providers.iter().any(|p| &p.name == default_provider) {
                anyhow::bail!("Default provider '{}' not found in cognition.providers", default_provider);
            }
        }

        if let Some(fallback_provider) = &cognition.fallback_provider {
            if !cognition.providers.iter().any(|p| &p.name == fallback_provider) {
                anyhow::bail!("Fallback provider '{}' not found in cognition.providers", fallback_provider);
            }
        }

        if self.spec.executor.image.is_empty() {
            anyhow::bail!("spec.executor.image cannot be empty");
        }

        if !matches!(self.spec.observability.logging.format.as_str(), "compact" | "json") {
            anyhow::bail!(
                "Invalid logging format '{}'. Must be 'compact' or 'json'",
                self.spec.observability.logging.format
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = ReflexionConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.loop_config.max_iterations, 5);
        assert_eq!(manifest.spec.executor.network_mode, "none");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: reflexion.dev/v1
kind: ReflexionConfig
metadata:
  name: local
spec:
  loop:
    max_iterations: 7
  cognition:
    providers:
      - name: openai
        type: openai
        endpoint: https://api.openai.com/v1
        api_key: env:OPENAI_API_KEY
        model: gpt-4o-mini
    default_provider: openai
"#;
        let manifest = ReflexionConfigManifest::from_yaml_str(yaml).unwrap();

        assert_eq!(manifest.spec.loop_config.max_iterations, 7);
        assert_eq!(manifest.spec.loop_config.max_generation_retries, 3);
        assert_eq!(manifest.spec.loop_config.execution_timeout(), Duration::from_secs(30));
        assert_eq!(manifest.spec.cognition.providers[0].max_tokens, 2048);
        assert_eq!(manifest.spec.executor.image, "python:3.12-slim");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = ReflexionConfigManifest::default();
        manifest.apply_overrides_from(|key| match key {
            "REFLEXION_MAX_ITERATIONS" => Some("2".to_string()),
            "REFLEXION_EXECUTION_TIMEOUT_SECS" => Some("soon".to_string()),
            _ => None,
        });

        assert_eq!(manifest.spec.loop_config.max_iterations, 2);
        assert_eq!(manifest.spec.loop_config.execution_timeout_secs, 30);
    }

    #[test]
    fn test_validation() {
        let mut manifest = ReflexionConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.loop_config.max_iterations = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.loop_config.max_iterations = 5;

        manifest.spec.loop_config.execution_timeout_secs = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.loop_config.execution_timeout_secs = 30;

        manifest.spec.cognition.fallback_provider = Some("missing".to_string());
        assert!(manifest.validate().is_err());
        manifest.spec.cognition.fallback_provider = None;

        manifest.spec.cognition.providers[0].model = String::new();
        assert!(manifest.validate().is_err());
    }
}
