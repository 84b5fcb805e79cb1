// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::episode::{Episode, EpisodeId, EpisodeOutcome, EpisodeState};
use crate::domain::lesson::LessonId;
use crate::domain::task::TaskId;

/// Emitted after every episode transition. Write-only: nothing in the loop
/// ever reads these back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeEvent {
    pub episode_id: EpisodeId,
    pub task_id: TaskId,
    pub state: EpisodeState,
    pub iteration: u32,
    pub last_stderr_snippet: Option<String>,
    /// Set only on the event that enters a terminal state.
    pub outcome: Option<EpisodeOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl EpisodeEvent {
    pub fn from_episode(episode: &Episode, snippet_chars: usize) -> Self {
        let last_stderr_snippet = episode
            .last_result()
            .map(|r| r.stderr_snippet(snippet_chars))
            .filter(|s| !s.is_empty());

        Self {
            episode_id: episode.id,
            task_id: episode.task().id(),
            state: episode.state(),
            iteration: episode.iteration(),
            last_stderr_snippet,
            outcome: episode.outcome().cloned(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LessonEvent {
    LessonStored {
        episode_id: EpisodeId,
        lesson_id: LessonId,
        stored_at: DateTime<Utc>,
    },
    LessonDeliveryFailed {
        episode_id: EpisodeId,
        lesson_id: LessonId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl LessonEvent {
    pub fn episode_id(&self) -> EpisodeId {
        match self {
            LessonEvent::LessonStored { episode_id, .. }
            | LessonEvent::LessonDeliveryFailed { episode_id, .. } => *episode_id,
        }
    }
}
