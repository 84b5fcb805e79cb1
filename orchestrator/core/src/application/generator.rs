// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Generator
//!
//! Produces one candidate solution per call, conditioned on the task, the
//! verification pack and the full reflection history so far.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::application::prompting;
use crate::domain::artifact::{CodeArtifact, GenerationError};
use crate::domain::cognition::{Cognition, PromptContext, PromptPurpose};
use crate::domain::lesson::KnowledgeStore;
use crate::domain::reflection::ReflectionLog;
use crate::domain::task::Task;
use crate::domain::verification::VerificationPack;

const INSTRUCTIONS: &str = "\
Write a complete, self-contained Python module that solves the task below.
Use only the standard library. Do not read input, do not print, and do not include tests:
the assertions listed below will be executed against your module as-is.
If earlier attempts failed, their diagnoses are listed; your answer must address every one of them
and must differ materially from the failing approach.
Reply with a single ```python fenced block.";

#[async_trait]
pub trait Generator: Send + Sync {
    /// `reflections` is the complete history for the episode, empty on the
    /// first call. The artifact's generation index equals its length.
    async fn generate(
        &self,
        task: &Task,
        pack: &VerificationPack,
        reflections: ReflectionLog,
    ) -> Result<CodeArtifact, GenerationError>;
}

pub struct StandardGenerator {
    cognition: Arc<dyn Cognition>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    lesson_limit: usize,
    timeout: Duration,
}

impl StandardGenerator {
    pub fn new(cognition: Arc<dyn Cognition>, timeout: Duration) -> Self {
        Self {
            cognition,
            knowledge: None,
            lesson_limit: 0,
            timeout,
        }
    }

    pub fn with_knowledge(mut self, store: Arc<dyn KnowledgeStore>, lesson_limit: usize) -> Self {
        self.knowledge = Some(store);
        self.lesson_limit = lesson_limit;
        self
    }
}

#[async_trait]
impl Generator for StandardGenerator {
    async fn generate(
        &self,
        task: &Task,
        pack: &VerificationPack,
        reflections: ReflectionLog,
    ) -> Result<CodeArtifact, GenerationError> {
        let generation = reflections.len() as u32;
        let lessons =
            prompting::past_lessons(self.knowledge.as_ref(), task.description(), self.lesson_limit).await;

        let files = task
            .reference_files()
            .iter()
            .map(|f| format!("--- {} ---\n{}", f.name, f.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = PromptContext::new(PromptPurpose::GenerateCode, INSTRUCTIONS)
            .section("task", task.description())
            .section("reference files", files)
            .section("assertions", pack.sources().join("\n"))
            .section("previous attempts", reflections.render())
            .section("past lessons", lessons);

        debug!(generation, reflections = reflections.len(), "Generating candidate");
        let response = prompting::complete_within(self.cognition.as_ref(), &prompt, self.timeout).await?;

        let source = prompting::extract_code(&response)
            .ok_or_else(|| GenerationError::Malformed("completion contained no code".to_string()))?;

        info!(generation, bytes = source.len(), "Candidate generated");
        Ok(CodeArtifact::new(generation, source, reflections.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cognition::CognitionError;
    use crate::domain::reflection::{ErrorClass, Reflection};
    use tokio::sync::Mutex;

    struct ScriptedCognition {
        responses: Mutex<Vec<Result<String, CognitionError>>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Cognition for ScriptedCognition {
        async fn complete(&self, prompt: &PromptContext) -> Result<String, CognitionError> {
            self.prompts.lock().await.push(prompt.render());
            self.responses.lock().await.remove(0)
        }

        fn provider(&self) -> &str {
            "scripted"
        }
    }

    fn scripted(responses: Vec<Result<String, CognitionError>>) -> Arc<ScriptedCognition> {
        Arc::new(ScriptedCognition {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn pack(task: &Task) -> VerificationPack {
        VerificationPack::new(task.id(), vec!["assert reverse('ab') == 'ba'"]).unwrap()
    }

    #[tokio::test]
    async fn test_generation_conditions_on_full_history() {
        let cognition = scripted(vec![Ok("```python\ndef reverse(s):\n    return s[::-1]\n```".to_string())]);
        let generator = StandardGenerator::new(cognition.clone(), Duration::from_secs(5));
        let task = Task::new("reverse a string");

        let history = ReflectionLog::new()
            .appended(Reflection {
                iteration: 0,
                error_class: ErrorClass::Syntax,
                diagnosis: "SyntaxError at solution.py line 1: expected ':'".to_string(),
                suggested_fix: "add the colon".to_string(),
            })
            .appended(Reflection {
                iteration: 1,
                error_class: ErrorClass::AssertionFailure,
                diagnosis: "assertion 0 failed".to_string(),
                suggested_fix: "reverse, do not sort".to_string(),
            });

        let artifact = generator.generate(&task, &pack(&task), history).await.unwrap();

        assert_eq!(artifact.generation, 2);
        assert_eq!(artifact.conditioned_on, 2);
        assert_eq!(artifact.source, "def reverse(s):\n    return s[::-1]");

        let prompt = &cognition.prompts.lock().await[0];
        assert!(prompt.contains("expected ':'"));
        assert!(prompt.contains("reverse, do not sort"));
        assert!(prompt.contains("assert reverse('ab') == 'ba'"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_malformed() {
        let cognition = scripted(vec![Ok("```python\n```".to_string())]);
        let generator = StandardGenerator::new(cognition, Duration::from_secs(5));
        let task = Task::new("reverse a string");

        let err = generator
            .generate(&task, &pack(&task), ReflectionLog::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_unavailable_cognition_maps_to_unavailable() {
        let cognition = scripted(vec![Err(CognitionError::Network("connection refused".to_string()))]);
        let generator = StandardGenerator::new(cognition, Duration::from_secs(5));
        let task = Task::new("reverse a string");

        let err = generator
            .generate(&task, &pack(&task), ReflectionLog::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }
}
