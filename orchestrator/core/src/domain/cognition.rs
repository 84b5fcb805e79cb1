// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cognition
//!
//! Domain interface to the language model collaborator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anti-Corruption Layer between the loop and vendor LLM APIs

// Implementations live in infrastructure/llm/. Callers never see vendor types,
// only rendered prompt text in and completion text out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a completion is being asked for. Carried into provider logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPurpose {
    SynthesizeTests,
    GenerateCode,
    Reflect,
    SummarizeLesson,
}

impl PromptPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptPurpose::SynthesizeTests => "synthesize_tests",
            PromptPurpose::GenerateCode => "generate_code",
            PromptPurpose::Reflect => "reflect",
            PromptPurpose::SummarizeLesson => "summarize_lesson",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSection {
    pub title: String,
    pub body: String,
}

/// Structured prompt handed to [`Cognition::complete`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContext {
    pub purpose: PromptPurpose,
    pub instructions: String,
    pub sections: Vec<PromptSection>,
}

impl PromptContext {
    pub fn new(purpose: PromptPurpose, instructions: impl Into<String>) -> Self {
        Self {
            purpose,
            instructions: instructions.into(),
            sections: Vec::new(),
        }
    }

    /// Append a titled section. Empty bodies are skipped so optional context
    /// (e.g. no past lessons yet) does not leave dangling headers.
    pub fn section(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        if !body.trim().is_empty() {
            self.sections.push(PromptSection { title: title.into(), body });
        }
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.instructions.len() + self.sections.iter().map(|s| s.body.len() + 32).sum::<usize>(),
        );
        out.push_str(&self.instructions);
        for section in &self.sections {
            out.push_str("\n\n=== ");
            out.push_str(&section.title.to_uppercase());
            out.push_str(" ===\n");
            out.push_str(&section.body);
        }
        out
    }
}

#[async_trait]
pub trait Cognition: Send + Sync {
    /// Produce a completion for the given prompt context.
    async fn complete(&self, prompt: &PromptContext) -> Result<String, CognitionError>;

    /// Provider label used in logs (e.g. "ollama", "openai").
    fn provider(&self) -> &str;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CognitionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl CognitionError {
    /// Transient unavailability: worth retrying or falling back to another provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CognitionError::Network(_)
                | CognitionError::RateLimit
                | CognitionError::Timeout(_)
                | CognitionError::Provider(_)
        )
    }
}
