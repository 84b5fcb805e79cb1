// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lesson Extractor
//!
//! Condenses a terminated episode into a [`Lesson`] and forwards it to the
//! knowledge store. Delivery is best-effort: a failed write is logged,
//! counted and announced on the event bus, and never changes the episode's
//! outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::prompting;
use crate::domain::cognition::{Cognition, PromptContext, PromptPurpose};
use crate::domain::episode::{Episode, EpisodeState};
use crate::domain::events::LessonEvent;
use crate::domain::execution::tail_chars;
use crate::domain::lesson::{KnowledgeStore, KnowledgeStoreError, Lesson};
use crate::domain::reflection::ErrorClass;
use crate::infrastructure::event_bus::EventBus;

const MAX_APPROACH_CHARS: usize = 4000;
const MAX_SUMMARY_CHARS: usize = 800;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no lesson can be drawn from an episode in state {0}")]
    NotExtractable(EpisodeState),
}

#[async_trait]
pub trait LessonExtractor: Send + Sync {
    /// Build the lesson for a `Succeeded` or `Exhausted` episode and hand it
    /// to the knowledge store.
    async fn extract(&self, episode: &Episode) -> Result<Lesson, ExtractionError>;
}

pub struct StandardLessonExtractor {
    store: Arc<dyn KnowledgeStore>,
    cognition: Option<Arc<dyn Cognition>>,
    timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl StandardLessonExtractor {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            cognition: None,
            timeout: Duration::from_secs(60),
            event_bus: None,
        }
    }

    pub fn with_cognition(mut self, cognition: Arc<dyn Cognition>, timeout: Duration) -> Self {
        self.cognition = Some(cognition);
        self.timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn class_list(classes: &[ErrorClass]) -> String {
        classes.iter().map(ErrorClass::as_str).collect::<Vec<_>>().join(", ")
    }

    /// Summary built from the episode alone, used when no model is
    /// configured or the model call fails.
    pub fn fallback_summary(episode: &Episode) -> String {
        let attempts = episode.attempts().len();
        let reflections = episode.reflections();
        match episode.state() {
            EpisodeState::Succeeded if reflections.is_empty() => {
                "Solved on the first attempt.".to_string()
            }
            EpisodeState::Succeeded => format!(
                "Solved on attempt {} of {} after overcoming {}. First pitfall: {}",
                attempts,
                episode.max_iterations(),
                Self::class_list(&episode.error_classes()),
                reflections.iter().next().map(|r| r.diagnosis.as_str()).unwrap_or("none recorded")
            ),
            _ => format!(
                "Not solved in {} attempt(s); unresolved: {}. Last diagnosis: {}",
                attempts,
                Self::class_list(&episode.error_classes()),
                reflections.last().map(|r| r.diagnosis.as_str()).unwrap_or("none recorded")
            ),
        }
    }

    async fn summarize(&self, episode: &Episode) -> String {
        let fallback = Self::fallback_summary(episode);
        let Some(cognition) = self.cognition.as_ref() else {
            return fallback;
        };

        let prompt = PromptContext::new(
            PromptPurpose::SummarizeLesson,
            "Summarize, in one short paragraph addressed to a future attempt at a similar task, \
             what to do and what to avoid. Mention concrete pitfalls.",
        )
        .section("task", episode.task().description())
        .section("outcome", episode.state().as_str())
        .section("attempt history", episode.reflections().render());

        match prompting::complete_within(cognition.as_ref(), &prompt, self.timeout).await {
            Ok(text) if !text.trim().is_empty() => text.trim().chars().take(MAX_SUMMARY_CHARS).collect(),
            Ok(_) => fallback,
            Err(e) => {
                warn!("Lesson summarization failed, using fallback summary: {}", e);
                fallback
            }
        }
    }

    async fn deliver(&self, episode: &Episode, lesson: &Lesson) {
        match self.store.write(lesson.clone()).await {
            Ok(()) => {
                info!(episode_id = %episode.id, lesson_id = %lesson.id(), "Lesson stored");
                if let Some(bus) = &self.event_bus {
                    bus.publish_lesson_event(LessonEvent::LessonStored {
                        episode_id: episode.id,
                        lesson_id: lesson.id(),
                        stored_at: Utc::now(),
                    });
                }
            }
            // an earlier run stored it before its checkpoint was lost
            Err(KnowledgeStoreError::Duplicate(lesson_id)) => {
                info!(episode_id = %episode.id, lesson_id = %lesson_id, "Lesson already stored");
            }
            Err(e) => {
                warn!(episode_id = %episode.id, "Lesson delivery failed: {}", e);
                metrics::counter!("reflexion_lesson_delivery_failures_total").increment(1);
                if let Some(bus) = &self.event_bus {
                    bus.publish_lesson_event(LessonEvent::LessonDeliveryFailed {
                        episode_id: episode.id,
                        lesson_id: lesson.id(),
                        reason: e.to_string(),
                        failed_at: Utc::now(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl LessonExtractor for StandardLessonExtractor {
    async fn extract(&self, episode: &Episode) -> Result<Lesson, ExtractionError> {
        let summary = match episode.state() {
            EpisodeState::Succeeded | EpisodeState::Exhausted => self.summarize(episode).await,
            other => return Err(ExtractionError::NotExtractable(other)),
        };

        let lesson = if episode.state() == EpisodeState::Succeeded {
            let approach = episode
                .last_artifact()
                .map(|a| tail_chars(&a.source, MAX_APPROACH_CHARS))
                .unwrap_or_default();
            Lesson::succeeded(
                episode.id,
                episode.task().description(),
                approach,
                episode.error_classes(),
                summary,
            )
        } else {
            Lesson::exhausted(
                episode.id,
                episode.task().description(),
                episode.error_classes(),
                episode.reflections().iter().map(|r| r.diagnosis.clone()).collect(),
                summary,
            )
        };

        self.deliver(episode, &lesson).await;
        Ok(lesson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::CodeArtifact;
    use crate::domain::execution::{ExecutionResult, ExecutionStatus};
    use crate::domain::lesson::LessonOutcome;
    use crate::domain::reflection::Reflection;
    use crate::domain::task::Task;
    use crate::domain::verification::VerificationPack;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        written: Mutex<Vec<Lesson>>,
        fail: bool,
    }

    #[async_trait]
    impl KnowledgeStore for RecordingStore {
        async fn write(&self, lesson: Lesson) -> Result<(), KnowledgeStoreError> {
            if self.fail {
                return Err(KnowledgeStoreError::Unavailable("journal offline".to_string()));
            }
            self.written.lock().await.push(lesson);
            Ok(())
        }

        async fn query(&self, _task: &str, _k: usize) -> Result<Vec<Lesson>, KnowledgeStoreError> {
            Ok(Vec::new())
        }
    }

    fn result(status: ExecutionStatus) -> ExecutionResult {
        ExecutionResult {
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 30_000,
        }
    }

    fn exhausted_by_timeouts(max: u32) -> Episode {
        let task = Task::new("download a page and count links");
        let pack = VerificationPack::new(task.id(), vec!["assert count_links() > 0"]).unwrap();
        let mut episode = Episode::new(task, max).unwrap();
        episode.begin_synthesis().unwrap();
        episode.attach_pack(pack).unwrap();
        for i in 0..max {
            episode.record_artifact(CodeArtifact::new(i, "import urllib.request", i as usize)).unwrap();
            episode
                .record_failure(
                    result(ExecutionStatus::Timeout),
                    Reflection {
                        iteration: i,
                        error_class: ErrorClass::Timeout,
                        diagnosis: format!("attempt {i} hung on network"),
                        suggested_fix: "avoid network".to_string(),
                    },
                )
                .unwrap();
            if i + 1 < max {
                episode.begin_next_attempt().unwrap();
            }
        }
        episode
    }

    #[tokio::test]
    async fn test_exhausted_lesson_records_unresolved_classes() {
        let store = Arc::new(RecordingStore::default());
        let extractor = StandardLessonExtractor::new(store.clone());
        let episode = exhausted_by_timeouts(3);

        let lesson = extractor.extract(&episode).await.unwrap();

        assert_eq!(lesson.outcome(), LessonOutcome::Exhausted);
        assert_eq!(lesson.unresolved_error_classes(), &[ErrorClass::Timeout]);
        assert_eq!(lesson.partial_diagnoses().len(), 3);
        assert!(lesson.summary().contains("attempt 2 hung on network"));
        assert_eq!(store.written.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_reported_not_raised() {
        let store = Arc::new(RecordingStore { fail: true, ..Default::default() });
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();
        let extractor = StandardLessonExtractor::new(store).with_event_bus(bus);

        let episode = exhausted_by_timeouts(1);
        let lesson = extractor.extract(&episode).await.unwrap();
        assert_eq!(lesson.episode_id(), episode.id);

        match events.recv().await.unwrap() {
            crate::infrastructure::event_bus::DomainEvent::Lesson(LessonEvent::LessonDeliveryFailed {
                reason, ..
            }) => assert!(reason.contains("journal offline")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeated_extraction_keeps_one_lesson() {
        let store = Arc::new(crate::infrastructure::InMemoryKnowledgeStore::new());
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();
        let extractor = StandardLessonExtractor::new(store.clone()).with_event_bus(bus);
        let episode = exhausted_by_timeouts(2);

        let first = extractor.extract(&episode).await.unwrap();
        let second = extractor.extract(&episode).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(store.len(), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            crate::infrastructure::event_bus::DomainEvent::Lesson(LessonEvent::LessonStored { .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_running_or_aborted_episode_is_rejected() {
        let extractor = StandardLessonExtractor::new(Arc::new(RecordingStore::default()));
        let mut episode = Episode::new(Task::new("x"), 2).unwrap();
        assert_eq!(
            extractor.extract(&episode).await,
            Err(ExtractionError::NotExtractable(EpisodeState::Init))
        );

        episode.abort("sandbox down").unwrap();
        assert_eq!(
            extractor.extract(&episode).await,
            Err(ExtractionError::NotExtractable(EpisodeState::Aborted))
        );
    }
}
