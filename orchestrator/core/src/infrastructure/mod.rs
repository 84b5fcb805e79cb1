// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod checkpoint;
pub mod docker_executor;
pub mod event_bus;
pub mod harness;
pub mod knowledge_store;
pub mod llm;

pub use checkpoint::{FileCheckpointer, InMemoryCheckpointer};
pub use docker_executor::DockerExecutor;
pub use event_bus::{DomainEvent, EventBus};
pub use knowledge_store::InMemoryKnowledgeStore;
pub use llm::ProviderRegistry;
