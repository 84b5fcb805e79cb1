// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Episode Aggregate
//!
//! The complete, checkpointable record of one [`Task`]'s run through the
//! reflexion loop. Every state change goes through a transition method that
//! checks the source state, so the aggregate itself enforces the loop's
//! state graph:
//!
//! ```text
//! Init ─▶ SynthesizingTests ─▶ Generating ─▶ Executing ─┬▶ Succeeded
//!                │                  ▲    │              ├▶ Reflecting ─┐
//!                ▼                  │    ▼              └▶ Exhausted   │
//!             Aborted               │  Aborted                         │
//!                                   └──────────────────────────────────┘
//! ```
//!
//! `Succeeded`, `Exhausted` and `Aborted` are terminal. Any transition
//! attempted on a terminal episode returns [`EpisodeError::Terminal`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::artifact::CodeArtifact;
use crate::domain::execution::ExecutionResult;
use crate::domain::lesson::LessonId;
use crate::domain::reflection::{ErrorClass, Reflection, ReflectionLog};
use crate::domain::task::Task;
use crate::domain::verification::VerificationPack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeId(pub Uuid);

impl EpisodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }
}

impl Default for EpisodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeState {
    Init,
    SynthesizingTests,
    Generating,
    Executing,
    Reflecting,
    Succeeded,
    Exhausted,
    Aborted,
}

impl EpisodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EpisodeState::Succeeded | EpisodeState::Exhausted | EpisodeState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeState::Init => "INIT",
            EpisodeState::SynthesizingTests => "SYNTHESIZING_TESTS",
            EpisodeState::Generating => "GENERATING",
            EpisodeState::Executing => "EXECUTING",
            EpisodeState::Reflecting => "REFLECTING",
            EpisodeState::Succeeded => "SUCCEEDED",
            EpisodeState::Exhausted => "EXHAUSTED",
            EpisodeState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one user-visible verdict every terminated episode carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Succeeded,
    Exhausted { last_diagnosis: String },
    Aborted { reason: String },
}

impl EpisodeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EpisodeOutcome::Succeeded => "succeeded",
            EpisodeOutcome::Exhausted { .. } => "exhausted",
            EpisodeOutcome::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for EpisodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeOutcome::Succeeded => write!(f, "succeeded"),
            EpisodeOutcome::Exhausted { last_diagnosis } => write!(f, "exhausted({last_diagnosis})"),
            EpisodeOutcome::Aborted { reason } => write!(f, "aborted({reason})"),
        }
    }
}

/// One Generator → Executor pass. Artifacts are kept for audit and lesson
/// extraction, never overwritten by later attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub artifact: CodeArtifact,
    pub result: Option<ExecutionResult>,
    pub reflection: Option<Reflection>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EpisodeError {
    #[error("episode is already terminal ({0})")]
    Terminal(EpisodeState),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: EpisodeState, to: EpisodeState },
    #[error("verification pack is already set")]
    PackAlreadySet,
    #[error("artifact generation {actual} does not match iteration {expected}")]
    IterationMismatch { expected: u32, actual: u32 },
    #[error("max_iterations must be at least 1")]
    ZeroBudget,
    #[error("lesson already recorded for this episode")]
    LessonAlreadyRecorded,
    #[error("episode in state {0} yields no lesson")]
    NoLesson(EpisodeState),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    task: Task,
    pack: Option<VerificationPack>,
    attempts: Vec<Attempt>,
    reflections: ReflectionLog,
    iteration: u32,
    max_iterations: u32,
    generation_failures: u32,
    /// Failures since the last artifact was recorded.
    #[serde(default)]
    consecutive_generation_failures: u32,
    state: EpisodeState,
    outcome: Option<EpisodeOutcome>,
    #[serde(default)]
    lesson_id: Option<LessonId>,
    /// Bumped on every transition; checkpoints carry it so a resumed run can
    /// tell which boundary it restarted from.
    revision: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Episode {
    pub fn new(task: Task, max_iterations: u32) -> Result<Self, EpisodeError> {
        if max_iterations == 0 {
            return Err(EpisodeError::ZeroBudget);
        }
        let now = Utc::now();
        Ok(Self {
            id: EpisodeId::new(),
            task,
            pack: None,
            attempts: Vec::new(),
            reflections: ReflectionLog::new(),
            iteration: 0,
            max_iterations,
            generation_failures: 0,
            consecutive_generation_failures: 0,
            state: EpisodeState::Init,
            outcome: None,
            lesson_id: None,
            revision: 0,
            started_at: now,
            updated_at: now,
            ended_at: None,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn pack(&self) -> Option<&VerificationPack> {
        self.pack.as_ref()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Snapshot of the reflection history. Cheap: the log is persistent.
    pub fn reflections(&self) -> ReflectionLog {
        self.reflections.clone()
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn generation_failures(&self) -> u32 {
        self.generation_failures
    }

    pub fn consecutive_generation_failures(&self) -> u32 {
        self.consecutive_generation_failures
    }

    pub fn lesson_id(&self) -> Option<LessonId> {
        self.lesson_id
    }

    /// Terminal episode that should yield a lesson but has none recorded yet.
    pub fn awaits_lesson(&self) -> bool {
        matches!(self.state, EpisodeState::Succeeded | EpisodeState::Exhausted) && self.lesson_id.is_none()
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn outcome(&self) -> Option<&EpisodeOutcome> {
        self.outcome.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn last_result(&self) -> Option<&ExecutionResult> {
        self.attempts.iter().rev().find_map(|a| a.result.as_ref())
    }

    pub fn last_artifact(&self) -> Option<&CodeArtifact> {
        self.attempts.last().map(|a| &a.artifact)
    }

    /// Artifact produced for the current iteration but not yet executed.
    /// Present only while in `Executing`.
    pub fn pending_artifact(&self) -> Option<&CodeArtifact> {
        match self.state {
            EpisodeState::Executing => self
                .attempts
                .last()
                .filter(|a| a.result.is_none())
                .map(|a| &a.artifact),
            _ => None,
        }
    }

    pub fn failed_results(&self) -> usize {
        self.attempts
            .iter()
            .filter_map(|a| a.result.as_ref())
            .filter(|r| !r.is_success())
            .count()
    }

    /// `Some(true)` if iteration 0 was executed and failed, `None` if it
    /// never produced a result.
    pub fn first_attempt_failed(&self) -> Option<bool> {
        self.attempts
            .first()
            .and_then(|a| a.result.as_ref())
            .map(|r| !r.is_success())
    }

    /// Error classes of every reflection, distinct, in first-seen order.
    pub fn error_classes(&self) -> Vec<ErrorClass> {
        self.reflections.error_classes()
    }

    fn guard(&self, expected: EpisodeState, to: EpisodeState) -> Result<(), EpisodeError> {
        if self.state.is_terminal() {
            return Err(EpisodeError::Terminal(self.state));
        }
        if self.state != expected {
            return Err(EpisodeError::InvalidTransition { from: self.state, to });
        }
        Ok(())
    }

    fn enter(&mut self, to: EpisodeState) {
        self.state = to;
        self.revision += 1;
        self.updated_at = Utc::now();
        if to.is_terminal() {
            self.ended_at = Some(self.updated_at);
        }
    }

    pub fn begin_synthesis(&mut self) -> Result<(), EpisodeError> {
        self.guard(EpisodeState::Init, EpisodeState::SynthesizingTests)?;
        self.enter(EpisodeState::SynthesizingTests);
        Ok(())
    }

    /// Attach the one verification pack this episode will ever have.
    pub fn attach_pack(&mut self, pack: VerificationPack) -> Result<(), EpisodeError> {
        self.guard(EpisodeState::SynthesizingTests, EpisodeState::Generating)?;
        if self.pack.is_some() {
            return Err(EpisodeError::PackAlreadySet);
        }
        self.pack = Some(pack);
        self.enter(EpisodeState::Generating);
        Ok(())
    }

    /// Count a transient generation failure. Stays in `Generating`; the
    /// iteration is not advanced. Returns the failures since the last
    /// recorded artifact.
    pub fn record_generation_failure(&mut self) -> Result<u32, EpisodeError> {
        self.guard(EpisodeState::Generating, EpisodeState::Generating)?;
        self.generation_failures += 1;
        self.consecutive_generation_failures += 1;
        self.updated_at = Utc::now();
        Ok(self.consecutive_generation_failures)
    }

    pub fn record_artifact(&mut self, artifact: CodeArtifact) -> Result<(), EpisodeError> {
        self.guard(EpisodeState::Generating, EpisodeState::Executing)?;
        if artifact.generation != self.iteration {
            return Err(EpisodeError::IterationMismatch {
                expected: self.iteration,
                actual: artifact.generation,
            });
        }
        self.attempts.push(Attempt { artifact, result: None, reflection: None });
        self.consecutive_generation_failures = 0;
        self.enter(EpisodeState::Executing);
        Ok(())
    }

    pub fn record_success(&mut self, result: ExecutionResult) -> Result<(), EpisodeError> {
        self.guard(EpisodeState::Executing, EpisodeState::Succeeded)?;
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.result = Some(result);
        }
        self.outcome = Some(EpisodeOutcome::Succeeded);
        self.enter(EpisodeState::Succeeded);
        Ok(())
    }

    /// Record a failed execution together with its reflection.
    ///
    /// Moves to `Reflecting` while budget remains, or to `Exhausted` when
    /// this was attempt number `max_iterations`. The reflection is appended
    /// in both cases so the log always has one entry per failed result.
    pub fn record_failure(
        &mut self,
        result: ExecutionResult,
        reflection: Reflection,
    ) -> Result<EpisodeState, EpisodeError> {
        let exhausted = self.iteration + 1 >= self.max_iterations;
        let to = if exhausted {
            EpisodeState::Exhausted
        } else {
            EpisodeState::Reflecting
        };
        self.guard(EpisodeState::Executing, to)?;

        if let Some(attempt) = self.attempts.last_mut() {
            attempt.result = Some(result);
            attempt.reflection = Some(reflection.clone());
        }
        if exhausted {
            self.outcome = Some(EpisodeOutcome::Exhausted {
                last_diagnosis: reflection.diagnosis.clone(),
            });
        }
        self.reflections = self.reflections.appended(reflection);
        self.enter(to);
        Ok(to)
    }

    /// `Reflecting → Generating`, advancing the iteration by exactly one.
    pub fn begin_next_attempt(&mut self) -> Result<(), EpisodeError> {
        self.guard(EpisodeState::Reflecting, EpisodeState::Generating)?;
        self.iteration += 1;
        self.enter(EpisodeState::Generating);
        Ok(())
    }

    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), EpisodeError> {
        if self.state.is_terminal() {
            return Err(EpisodeError::Terminal(self.state));
        }
        self.outcome = Some(EpisodeOutcome::Aborted { reason: reason.into() });
        self.enter(EpisodeState::Aborted);
        Ok(())
    }

    /// Note that the lesson for this episode has been extracted. The only
    /// change a terminal episode accepts; it does not alter state or outcome.
    pub fn record_lesson(&mut self, lesson_id: LessonId) -> Result<(), EpisodeError> {
        if !matches!(self.state, EpisodeState::Succeeded | EpisodeState::Exhausted) {
            return Err(EpisodeError::NoLesson(self.state));
        }
        if self.lesson_id.is_some() {
            return Err(EpisodeError::LessonAlreadyRecorded);
        }
        self.lesson_id = Some(lesson_id);
        self.revision += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}
