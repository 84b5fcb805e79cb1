// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator
//!
//! Drives one [`Episode`] through the reflexion loop:
//!
//! ```text
//! synthesize once ─▶ [ generate ─▶ execute ─▶ (success | reflect) ] × max_iterations
//! ```
//!
//! After every transition the episode is checkpointed and an
//! [`EpisodeEvent`] is published. Because the loop is a pure function of
//! the persisted state, [`Orchestrator::resume`] just reloads the last
//! checkpoint and keeps driving.
//!
//! ## Failure policy
//! | Failure | Effect |
//! |---------|--------|
//! | `SynthesisError` | `Aborted`, no generation attempted |
//! | `GenerationError` | retried up to `max_generation_retries` times in place, then `Aborted` |
//! | `AdapterError` | `Aborted` |
//! | code-level failure | reflection appended, next iteration or `Exhausted` |
//! | `CheckpointError` | returned to the caller; the episode stays resumable from the last save |

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::execution_adapter::ExecutionAdapter;
use crate::application::generator::Generator;
use crate::application::lesson_extractor::LessonExtractor;
use crate::application::reflector::Reflector;
use crate::application::test_synthesizer::TestSynthesizer;
use crate::domain::checkpoint::{CheckpointError, Checkpointer};
use crate::domain::config::LoopConfig;
use crate::domain::episode::{Episode, EpisodeError, EpisodeId, EpisodeState};
use crate::domain::events::EpisodeEvent;
use crate::domain::recovery::{RecoveryMetric, RecoveryTracker};
use crate::domain::task::Task;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub max_generation_retries: u32,
    pub execution_timeout: Duration,
    pub stderr_snippet_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&LoopConfig::default())
    }
}

impl From<&LoopConfig> for OrchestratorConfig {
    fn from(config: &LoopConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_generation_retries: config.max_generation_retries,
            execution_timeout: config.execution_timeout(),
            stderr_snippet_chars: config.stderr_snippet_chars,
        }
    }
}

/// The five loop components the orchestrator sequences.
#[derive(Clone)]
pub struct LoopServices {
    pub synthesizer: Arc<dyn TestSynthesizer>,
    pub generator: Arc<dyn Generator>,
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub reflector: Arc<dyn Reflector>,
    pub lessons: Arc<dyn LessonExtractor>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Episode(#[from] EpisodeError),

    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("no checkpoint found for episode {0}")]
    NotFound(EpisodeId),
}

pub struct Orchestrator {
    services: LoopServices,
    checkpointer: Arc<dyn Checkpointer>,
    recovery: Arc<RecoveryTracker>,
    event_bus: Arc<EventBus>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        services: LoopServices,
        checkpointer: Arc<dyn Checkpointer>,
        recovery: Arc<RecoveryTracker>,
        event_bus: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            services,
            checkpointer,
            recovery,
            event_bus,
            config,
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn recovery(&self) -> RecoveryMetric {
        self.recovery.snapshot()
    }

    /// Final recovery metric for this run; the tracker starts over empty.
    pub fn close_recovery_window(&self) -> RecoveryMetric {
        let metric = self.recovery.reset();
        info!(
            initial_failures = metric.initial_failures,
            recovered = metric.recovered,
            "Recovery window closed"
        );
        metric
    }

    /// Create the episode and checkpoint it in `Init` without driving it.
    /// Lets a caller subscribe to the episode's events before they start.
    pub async fn start(&self, task: Task) -> Result<Episode, OrchestratorError> {
        let episode = Episode::new(task, self.config.max_iterations)?;
        info!(episode_id = %episode.id, task_id = %episode.task().id(), "Episode created");
        self.commit(&episode).await?;
        Ok(episode)
    }

    /// Run a new episode for `task` to a terminal state.
    pub async fn run(&self, task: Task) -> Result<Episode, OrchestratorError> {
        let episode = self.start(task).await?;
        self.drive(episode).await
    }

    /// Continue an episode from its last checkpoint. A terminal checkpoint
    /// is only finalized (lesson, recovery) if that had not completed.
    pub async fn resume(&self, id: EpisodeId) -> Result<Episode, OrchestratorError> {
        let episode = self
            .checkpointer
            .load(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))?;
        info!(
            episode_id = %id,
            state = %episode.state(),
            iteration = episode.iteration(),
            "Resuming episode from checkpoint"
        );
        self.drive(episode).await
    }

    pub async fn drive(&self, mut episode: Episode) -> Result<Episode, OrchestratorError> {
        loop {
            match episode.state() {
                EpisodeState::Init => {
                    episode.begin_synthesis()?;
                    self.commit(&episode).await?;
                }
                EpisodeState::SynthesizingTests => self.synthesize(&mut episode).await?,
                EpisodeState::Generating => self.generate(&mut episode).await?,
                EpisodeState::Executing => self.execute(&mut episode).await?,
                EpisodeState::Reflecting => {
                    episode.begin_next_attempt()?;
                    self.commit(&episode).await?;
                }
                EpisodeState::Succeeded | EpisodeState::Exhausted | EpisodeState::Aborted => {
                    self.finalize(&mut episode).await?;
                    return Ok(episode);
                }
            }
        }
    }

    async fn synthesize(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        match self.services.synthesizer.synthesize(episode.task()).await {
            Ok(pack) => {
                info!(episode_id = %episode.id, assertions = pack.len(), "Verification pack ready");
                episode.attach_pack(pack)?;
            }
            Err(e) => {
                warn!(episode_id = %episode.id, "Test synthesis failed: {}", e);
                episode.abort(format!("test synthesis failed: {e}"))?;
            }
        }
        self.commit(episode).await
    }

    async fn generate(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let Some(pack) = episode.pack().cloned() else {
            episode.abort("verification pack missing from checkpoint")?;
            return self.commit(episode).await;
        };

        let attempt = self
            .services
            .generator
            .generate(episode.task(), &pack, episode.reflections())
            .await;

        match attempt {
            Ok(artifact) => {
                episode.record_artifact(artifact)?;
                self.commit(episode).await
            }
            Err(e) => {
                let failures = episode.record_generation_failure()?;
                metrics::counter!("reflexion_generation_retries_total").increment(1);
                if failures > self.config.max_generation_retries {
                    error!(
                        episode_id = %episode.id,
                        failures,
                        "Generation failed past the retry cap: {}", e
                    );
                    episode.abort(format!("generation failed {failures} times in a row: {e}"))?;
                    self.commit(episode).await
                } else {
                    warn!(
                        episode_id = %episode.id,
                        failures,
                        cap = self.config.max_generation_retries,
                        "Generation failed, retrying: {}", e
                    );
                    // not a transition: persist the count without an event
                    self.checkpointer.save(episode).await?;
                    Ok(())
                }
            }
        }
    }

    async fn execute(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let (Some(artifact), Some(pack)) = (episode.pending_artifact().cloned(), episode.pack().cloned())
        else {
            episode.abort("no pending artifact to execute")?;
            return self.commit(episode).await;
        };

        let result = match self
            .services
            .adapter
            .run(&artifact, &pack, self.config.execution_timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(episode_id = %episode.id, "Sandbox unavailable: {}", e);
                episode.abort(e.to_string())?;
                return self.commit(episode).await;
            }
        };
        metrics::counter!("reflexion_iterations_total").increment(1);

        if result.is_success() {
            info!(episode_id = %episode.id, iteration = episode.iteration(), "All assertions passed");
            episode.record_success(result)?;
        } else {
            let reflection = self.services.reflector.reflect(&artifact, &result).await;
            info!(
                episode_id = %episode.id,
                iteration = episode.iteration(),
                error_class = %reflection.error_class,
                "Attempt failed: {}", reflection.diagnosis
            );
            episode.record_failure(result, reflection)?;
        }
        self.commit(episode).await
    }

    /// Lesson extraction and recovery accounting. Safe to repeat: a recorded
    /// lesson is not extracted again and the tracker ignores known episodes.
    async fn finalize(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        if episode.awaits_lesson() {
            match self.services.lessons.extract(episode).await {
                Ok(lesson) => {
                    episode.record_lesson(lesson.id())?;
                    self.checkpointer.save(episode).await?;
                }
                Err(e) => warn!(episode_id = %episode.id, "Lesson extraction skipped: {}", e),
            }
        }

        if self.recovery.record(episode) {
            let metric = self.recovery.snapshot();
            info!(
                episode_id = %episode.id,
                initial_failures = metric.initial_failures,
                recovered = metric.recovered,
                "Recovery metric updated"
            );
        }
        Ok(())
    }

    async fn commit(&self, episode: &Episode) -> Result<(), OrchestratorError> {
        self.checkpointer.save(episode).await?;
        debug!(
            episode_id = %episode.id,
            state = %episode.state(),
            iteration = episode.iteration(),
            revision = episode.revision(),
            "Checkpointed"
        );
        // terminal states are entered once, so this counts each episode once
        if let Some(outcome) = episode.outcome() {
            metrics::counter!("reflexion_episodes_total", "outcome" => outcome.label()).increment(1);
            info!(episode_id = %episode.id, iteration = episode.iteration(), "Episode {}", outcome);
        }
        self.event_bus
            .publish_episode_event(EpisodeEvent::from_episode(episode, self.config.stderr_snippet_chars));
        Ok(())
    }
}
