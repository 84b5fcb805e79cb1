// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lessons and the Knowledge Store
//!
//! A [`Lesson`] is the durable summary of one terminated episode. It is
//! assembled once by the lesson extractor, handed to a [`KnowledgeStore`],
//! and from then on only read, by future unrelated episodes that retrieve it
//! as extra prompt context.
//!
//! | Episode ended | Lesson carries |
//! |---------------|----------------|
//! | `Succeeded` | the working approach and the error classes that were overcome |
//! | `Exhausted` | the unresolved error classes and the partial diagnoses |
//!
//! Aborted episodes produce no lesson.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::episode::EpisodeId;
use crate::domain::reflection::ErrorClass;

/// An episode yields at most one lesson, so the lesson shares its
/// episode's id. Re-extracting after a crash lands on the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LessonId(pub Uuid);

impl LessonId {
    pub fn for_episode(episode_id: EpisodeId) -> Self {
        Self(episode_id.0)
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonOutcome {
    Succeeded,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    id: LessonId,
    episode_id: EpisodeId,
    task_description: String,
    outcome: LessonOutcome,
    #[serde(default)]
    overcome_error_classes: Vec<ErrorClass>,
    #[serde(default)]
    unresolved_error_classes: Vec<ErrorClass>,
    #[serde(default)]
    working_approach: Option<String>,
    #[serde(default)]
    partial_diagnoses: Vec<String>,
    summary: String,
    created_at: DateTime<Utc>,
}

impl Lesson {
    /// Lesson for an episode that reached `Succeeded`.
    pub fn succeeded(
        episode_id: EpisodeId,
        task_description: impl Into<String>,
        working_approach: impl Into<String>,
        overcome_error_classes: Vec<ErrorClass>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: LessonId::for_episode(episode_id),
            episode_id,
            task_description: task_description.into(),
            outcome: LessonOutcome::Succeeded,
            overcome_error_classes,
            unresolved_error_classes: Vec::new(),
            working_approach: Some(working_approach.into()),
            partial_diagnoses: Vec::new(),
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }

    /// Lesson for an episode that ran out of iterations.
    pub fn exhausted(
        episode_id: EpisodeId,
        task_description: impl Into<String>,
        unresolved_error_classes: Vec<ErrorClass>,
        partial_diagnoses: Vec<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: LessonId::for_episode(episode_id),
            episode_id,
            task_description: task_description.into(),
            outcome: LessonOutcome::Exhausted,
            overcome_error_classes: Vec::new(),
            unresolved_error_classes,
            working_approach: None,
            partial_diagnoses,
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> LessonId {
        self.id
    }

    pub fn episode_id(&self) -> EpisodeId {
        self.episode_id
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    pub fn outcome(&self) -> LessonOutcome {
        self.outcome
    }

    pub fn overcome_error_classes(&self) -> &[ErrorClass] {
        &self.overcome_error_classes
    }

    pub fn unresolved_error_classes(&self) -> &[ErrorClass] {
        &self.unresolved_error_classes
    }

    pub fn working_approach(&self) -> Option<&str> {
        self.working_approach.as_deref()
    }

    pub fn partial_diagnoses(&self) -> &[String] {
        &self.partial_diagnoses
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Compact form used when a lesson is fed back into a prompt.
    pub fn render(&self) -> String {
        let classes = |list: &[ErrorClass]| {
            list.iter().map(ErrorClass::as_str).collect::<Vec<_>>().join(", ")
        };
        match self.outcome {
            LessonOutcome::Succeeded => format!(
                "[worked] {} (overcame: {})\n{}",
                self.task_description,
                if self.overcome_error_classes.is_empty() {
                    "nothing".to_string()
                } else {
                    classes(&self.overcome_error_classes)
                },
                self.summary
            ),
            LessonOutcome::Exhausted => format!(
                "[avoid] {} (unresolved: {})\n{}",
                self.task_description,
                classes(&self.unresolved_error_classes),
                self.summary
            ),
        }
    }
}

/// Append-only store of lessons. Writes are serialized by the
/// implementation; reads need no coordination.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn write(&self, lesson: Lesson) -> Result<(), KnowledgeStoreError>;

    /// Up to `k` lessons relevant to `task_description`, most relevant first.
    async fn query(&self, task_description: &str, k: usize) -> Result<Vec<Lesson>, KnowledgeStoreError>;
}

#[derive(Debug, Error)]
pub enum KnowledgeStoreError {
    #[error("lesson {0} already stored")]
    Duplicate(LessonId),
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal entry could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("knowledge store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_distinguishes_outcomes() {
        let worked = Lesson::succeeded(
            EpisodeId::new(),
            "reverse a string",
            "slice with [::-1]",
            vec![ErrorClass::Syntax],
            "Check colons after def.",
        );
        assert!(worked.render().starts_with("[worked] reverse a string (overcame: syntax)"));

        let failed = Lesson::exhausted(
            EpisodeId::new(),
            "fetch a url",
            vec![ErrorClass::Timeout],
            vec!["request hung".to_string()],
            "No network in the sandbox.",
        );
        assert!(failed.render().starts_with("[avoid] fetch a url (unresolved: timeout)"));
        assert_eq!(failed.working_approach(), None);
    }

    #[test]
    fn test_lesson_id_follows_episode() {
        let episode_id = EpisodeId::new();
        let a = Lesson::exhausted(episode_id, "t", vec![], vec![], "first");
        let b = Lesson::exhausted(episode_id, "t", vec![], vec![], "second");
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), LessonId::for_episode(episode_id));
        assert_ne!(a.id(), Lesson::exhausted(EpisodeId::new(), "t", vec![], vec![], "x").id());
    }
}
