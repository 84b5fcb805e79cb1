// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Test Synthesizer
//!
//! Derives the verification pack for a task. Runs once per episode and
//! never touches episode state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::prompting::{self, ParsedAssertions};
use crate::domain::cognition::{Cognition, PromptContext, PromptPurpose};
use crate::domain::lesson::KnowledgeStore;
use crate::domain::task::Task;
use crate::domain::verification::{SynthesisError, VerificationPack};

const INSTRUCTIONS: &str = "\
You write executable Python assertions that decide whether a solution to the task below is correct.
Return a JSON array of strings, each a single self-contained `assert` statement that calls the
solution's public functions. Cover normal cases and edge cases. Assertions must be deterministic
and must not use the network, the clock, randomness or files.
If the task has no deterministic, checkable outcome, reply with exactly `UNVERIFIABLE: <reason>`.";

#[async_trait]
pub trait TestSynthesizer: Send + Sync {
    async fn synthesize(&self, task: &Task) -> Result<VerificationPack, SynthesisError>;
}

pub struct StandardTestSynthesizer {
    cognition: Arc<dyn Cognition>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    lesson_limit: usize,
    timeout: Duration,
}

impl StandardTestSynthesizer {
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

    fn build_prompt(task: &Task, lessons: String) -> PromptContext {
        let files = task
            .reference_files()
            .iter()
            .map(|f| format!("--- {} ---\n{}", f.name, f.content))
            .collect::<Vec<_>>()
            .join("\n");

        PromptContext::new(PromptPurpose::SynthesizeTests, INSTRUCTIONS)
            .section("task", task.description())
            .section("reference files", files)
            .section("past lessons", lessons)
    }
}

#[async_trait]
impl TestSynthesizer for StandardTestSynthesizer {
    async fn synthesize(&self, task: &Task) -> Result<VerificationPack, SynthesisError> {
        let lessons =
            prompting::past_lessons(self.knowledge.as_ref(), task.description(), self.lesson_limit).await;
        let prompt = Self::build_prompt(task, lessons);

        let response = prompting::complete_within(self.cognition.as_ref(), &prompt, self.timeout).await?;

        match prompting::parse_assertions(&response) {
            ParsedAssertions::Unverifiable(reason) => {
                warn!(task_id = %task.id(), "Task judged unverifiable: {}", reason);
                Err(SynthesisError::Unverifiable(reason))
            }
            ParsedAssertions::Assertions(sources) => {
                let offered = sources.len();
                let pack = VerificationPack::new(task.id(), sources)?;
                if pack.len() < offered {
                    warn!(
                        task_id = %task.id(),
                        offered,
                        kept = pack.len(),
                        "Dropped blank, duplicate or non-assert entries from the verification pack"
                    );
                }
                info!(task_id = %task.id(), assertions = pack.len(), "Verification pack synthesized");
                Ok(pack)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cognition::CognitionError;
    use tokio::sync::Mutex;

    struct ScriptedCognition {
        responses: Mutex<Vec<Result<String, CognitionError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCognition {
        fn new(responses: Vec<Result<String, CognitionError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                prompts: Mutex::new(Vec::new()),
            }
        }
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

    #[tokio::test]
    async fn test_synthesize_builds_pack() {
        let cognition = Arc::new(ScriptedCognition::new(vec![Ok(
            "[\"assert reverse('ab') == 'ba'\", \"assert reverse('') == ''\"]".to_string(),
        )]));
        let synthesizer = StandardTestSynthesizer::new(cognition.clone(), Duration::from_secs(5));

        let task = Task::new("reverse a string");
        let pack = synthesizer.synthesize(&task).await.unwrap();

        assert_eq!(pack.len(), 2);
        assert_eq!(pack.task_id(), task.id());
        assert!(cognition.prompts.lock().await[0].contains("=== TASK ===\nreverse a string"));
    }

    #[tokio::test]
    async fn test_unverifiable_and_empty_are_errors() {
        let cognition = Arc::new(ScriptedCognition::new(vec![
            Ok("UNVERIFIABLE: depends on user taste".to_string()),
            Ok("I am not sure what to test here.".to_string()),
        ]));
        let synthesizer = StandardTestSynthesizer::new(cognition, Duration::from_secs(5));
        let task = Task::new("make it nicer");

        assert!(matches!(
            synthesizer.synthesize(&task).await,
            Err(SynthesisError::Unverifiable(reason)) if reason == "depends on user taste"
        ));
        assert!(matches!(synthesizer.synthesize(&task).await, Err(SynthesisError::Empty)));
    }

    #[tokio::test]
    async fn test_bare_expressions_cannot_form_a_pack() {
        let cognition = Arc::new(ScriptedCognition::new(vec![
            Ok("[\"reverse('ab') == 'ba'\", \"reverse('') == ''\"]".to_string()),
            Ok("```json\n[\"reverse('ab') == 'ba'\", \"assert reverse('') == ''\"]\n```".to_string()),
        ]));
        let synthesizer = StandardTestSynthesizer::new(cognition, Duration::from_secs(5));
        let task = Task::new("reverse a string");

        assert!(matches!(synthesizer.synthesize(&task).await, Err(SynthesisError::Empty)));

        let pack = synthesizer.synthesize(&task).await.unwrap();
        assert_eq!(pack.sources(), vec!["assert reverse('') == ''"]);
    }

    #[tokio::test]
    async fn test_cognition_failure_propagates() {
        let cognition = Arc::new(ScriptedCognition::new(vec![Err(CognitionError::RateLimit)]));
        let synthesizer = StandardTestSynthesizer::new(cognition, Duration::from_secs(5));

        assert!(matches!(
            synthesizer.synthesize(&Task::new("x")).await,
            Err(SynthesisError::Cognition(CognitionError::RateLimit))
        ));
    }
}
