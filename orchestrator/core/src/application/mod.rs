// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod prompting;
pub mod test_synthesizer;
pub mod generator;
pub mod execution_adapter;
pub mod reflector;
pub mod lesson_extractor;
pub mod orchestrator;

// Re-export loop components for convenience
pub use test_synthesizer::{StandardTestSynthesizer, TestSynthesizer};
pub use generator::{Generator, StandardGenerator};
pub use execution_adapter::{ExecutionAdapter, StandardExecutionAdapter};
pub use reflector::{ErrorClassifier, HeuristicClassifier, Reflector, StandardReflector};
pub use lesson_extractor::{ExtractionError, LessonExtractor, StandardLessonExtractor};
pub use orchestrator::{LoopServices, Orchestrator, OrchestratorConfig, OrchestratorError};
