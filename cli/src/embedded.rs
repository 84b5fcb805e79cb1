// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded mode execution
//!
//! Creates every service in-process from a loaded manifest and hands back a
//! ready [`Orchestrator`].

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use reflexion_core::application::{
    HeuristicClassifier, LoopServices, Orchestrator, OrchestratorConfig, StandardExecutionAdapter,
    StandardGenerator, StandardLessonExtractor, StandardReflector, StandardTestSynthesizer,
};
use reflexion_core::domain::checkpoint::Checkpointer;
use reflexion_core::domain::cognition::Cognition;
use reflexion_core::domain::config::ReflexionConfigManifest;
use reflexion_core::domain::execution::Executor;
use reflexion_core::domain::lesson::KnowledgeStore;
use reflexion_core::domain::recovery::{RecoveryMetric, RecoveryTracker};
use reflexion_core::infrastructure::{
    DockerExecutor, EventBus, FileCheckpointer, InMemoryCheckpointer, InMemoryKnowledgeStore,
    ProviderRegistry,
};

pub struct EmbeddedLoop {
    orchestrator: Orchestrator,
    event_bus: Arc<EventBus>,
    knowledge: Arc<InMemoryKnowledgeStore>,
    persistent_checkpoints: bool,
}

impl EmbeddedLoop {
    /// Wire the loop against the configured cognition providers and the
    /// Docker sandbox.
    pub async fn new(config: &ReflexionConfigManifest) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&config.spec.cognition)
            .context("Failed to initialize cognition providers")?;
        info!(
            providers = ?registry.provider_names(),
            default = registry.default_provider(),
            "Cognition providers ready"
        );

        let executor = DockerExecutor::new(config.spec.executor.clone())
            .context("Failed to initialize Docker sandbox")?;
        if let Err(e) = executor.healthcheck().await {
            // not fatal: the episode aborts with the sandbox error instead
            warn!("Docker healthcheck failed: {}", e);
        }

        Self::with_collaborators(config, Arc::new(registry), Arc::new(executor)).await
    }

    /// Wire the loop around caller-supplied cognition and executor; storage
    /// still follows the manifest.
    pub async fn with_collaborators(
        config: &ReflexionConfigManifest,
        cognition: Arc<dyn Cognition>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self> {
        let storage = &config.spec.storage;

        let (checkpointer, persistent_checkpoints): (Arc<dyn Checkpointer>, bool) =
            match &storage.checkpoint_dir {
                Some(dir) => (
                    Arc::new(
                        FileCheckpointer::open(dir)
                            .await
                            .with_context(|| format!("Failed to open checkpoint directory {:?}", dir))?,
                    ),
                    true,
                ),
                None => (Arc::new(InMemoryCheckpointer::new()), false),
            };

        let knowledge = Arc::new(match &storage.lesson_journal {
            Some(path) => InMemoryKnowledgeStore::open(path)
                .await
                .with_context(|| format!("Failed to open lesson journal {:?}", path))?,
            None => InMemoryKnowledgeStore::new(),
        });
        let store: Arc<dyn KnowledgeStore> = knowledge.clone();

        let loop_config = &config.spec.loop_config;
        let timeout = loop_config.cognition_timeout();
        let limit = loop_config.lesson_retrieval_limit;
        let event_bus = Arc::new(EventBus::with_default_capacity());

        let services = LoopServices {
            synthesizer: Arc::new(
                StandardTestSynthesizer::new(cognition.clone(), timeout).with_knowledge(store.clone(), limit),
            ),
            generator: Arc::new(
                StandardGenerator::new(cognition.clone(), timeout).with_knowledge(store.clone(), limit),
            ),
            adapter: Arc::new(StandardExecutionAdapter::new(executor)),
            reflector: Arc::new(
                StandardReflector::new(Arc::new(HeuristicClassifier)).with_cognition(cognition.clone(), timeout),
            ),
            lessons: Arc::new(
                StandardLessonExtractor::new(store)
                    .with_cognition(cognition, timeout)
                    .with_event_bus(event_bus.clone()),
            ),
        };

        let orchestrator = Orchestrator::new(
            services,
            checkpointer,
            Arc::new(RecoveryTracker::new()),
            event_bus.clone(),
            OrchestratorConfig::from(loop_config),
        );

        Ok(Self {
            orchestrator,
            event_bus,
            knowledge,
            persistent_checkpoints,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn knowledge(&self) -> &InMemoryKnowledgeStore {
        &self.knowledge
    }

    /// Whether checkpoints outlive this process, i.e. `resume` can find them.
    pub fn persistent_checkpoints(&self) -> bool {
        self.persistent_checkpoints
    }

    /// Tear the loop down: close the recovery window and drop every event
    /// sender, so subscribers drain what was published and then stop.
    pub fn shutdown(self) -> RecoveryMetric {
        self.orchestrator.close_recovery_window()
    }
}
