// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Recovery accounting.
//!
//! Process-scoped aggregate of how often a failing first attempt was turned
//! into a success. The tracker remembers which episodes it has already
//! counted, so replaying terminations after a crash-resume is a no-op.
//!
//! That memory holds one id per counted episode (only those whose first
//! attempt failed) until [`RecoveryTracker::reset`] closes the window.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::episode::{Episode, EpisodeId, EpisodeState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryMetric {
    pub initial_failures: u64,
    pub recovered: u64,
}

impl RecoveryMetric {
    /// `recovered / initial_failures`, or `None` before any first attempt has failed.
    pub fn rate(&self) -> Option<f64> {
        if self.initial_failures == 0 {
            None
        } else {
            Some(self.recovered as f64 / self.initial_failures as f64)
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    metric: RecoveryMetric,
    counted: HashSet<EpisodeId>,
}

#[derive(Debug, Default)]
pub struct RecoveryTracker {
    inner: Mutex<TrackerState>,
}

impl RecoveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a terminated episode. Returns `false` when nothing changed:
    /// the episode is not terminal, was aborted, never failed its first
    /// attempt, or has been counted before.
    pub fn record(&self, episode: &Episode) -> bool {
        if !episode.is_terminal() || episode.state() == EpisodeState::Aborted {
            return false;
        }
        if episode.first_attempt_failed() != Some(true) {
            return false;
        }

        let mut state = self.inner.lock();
        if !state.counted.insert(episode.id) {
            return false;
        }
        state.metric.initial_failures += 1;
        if episode.state() == EpisodeState::Succeeded {
            state.metric.recovered += 1;
        }
        true
    }

    pub fn snapshot(&self) -> RecoveryMetric {
        self.inner.lock().metric
    }

    /// Number of episode ids held for replay detection.
    pub fn counted_episodes(&self) -> usize {
        self.inner.lock().counted.len()
    }

    /// Close the accounting window: return the final metric and forget both
    /// the counters and the counted ids. An episode replayed after a reset is
    /// counted again, in the new window.
    pub fn reset(&self) -> RecoveryMetric {
        std::mem::take(&mut *self.inner.lock()).metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::CodeArtifact;
    use crate::domain::execution::{ExecutionResult, ExecutionStatus};
    use crate::domain::reflection::{ErrorClass, Reflection};
    use crate::domain::task::Task;
    use crate::domain::verification::VerificationPack;

    fn recovered_episode() -> Episode {
        let task = Task::new("reverse a string");
        let pack = VerificationPack::new(task.id(), vec!["assert True"]).unwrap();
        let mut episode = Episode::new(task, 3).unwrap();
        episode.begin_synthesis().unwrap();
        episode.attach_pack(pack).unwrap();
        episode.record_artifact(CodeArtifact::new(0, "def", 0)).unwrap();
        episode
            .record_failure(
                ExecutionResult {
                    status: ExecutionStatus::Failure,
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "SyntaxError".into(),
                    duration_ms: 1,
                },
                Reflection {
                    iteration: 0,
                    error_class: ErrorClass::Syntax,
                    diagnosis: "bad def".into(),
                    suggested_fix: "add colon".into(),
                },
            )
            .unwrap();
        episode.begin_next_attempt().unwrap();
        episode.record_artifact(CodeArtifact::new(1, "ok", 1)).unwrap();
        episode
            .record_success(ExecutionResult {
                status: ExecutionStatus::Success,
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 1,
            })
            .unwrap();
        episode
    }

    #[test]
    fn test_replay_is_idempotent() {
        let tracker = RecoveryTracker::new();
        let episode = recovered_episode();

        assert!(tracker.record(&episode));
        assert!(!tracker.record(&episode));
        assert_eq!(
            tracker.snapshot(),
            RecoveryMetric { initial_failures: 1, recovered: 1 }
        );
        assert_eq!(tracker.snapshot().rate(), Some(1.0));
    }

    #[test]
    fn test_reset_closes_the_window() {
        let tracker = RecoveryTracker::new();
        let episode = recovered_episode();
        tracker.record(&episode);
        tracker.record(&recovered_episode());
        assert_eq!(tracker.counted_episodes(), 2);

        let closed = tracker.reset();
        assert_eq!(closed, RecoveryMetric { initial_failures: 2, recovered: 2 });
        assert_eq!(tracker.counted_episodes(), 0);
        assert_eq!(tracker.snapshot(), RecoveryMetric::default());

        assert!(tracker.record(&episode));
        assert_eq!(tracker.snapshot().initial_failures, 1);
    }

    #[test]
    fn test_aborted_and_running_episodes_ignored() {
        let tracker = RecoveryTracker::new();
        let mut episode = Episode::new(Task::new("ambiguous"), 3).unwrap();
        assert!(!tracker.record(&episode));

        episode.abort("no assertions").unwrap();
        assert!(!tracker.record(&episode));
        assert_eq!(tracker.snapshot(), RecoveryMetric::default());
        assert_eq!(tracker.snapshot().rate(), None);
    }
}
