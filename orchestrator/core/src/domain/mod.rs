// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model of the reflexion loop: aggregates, value objects and the
//! ports (`Cognition`, `Executor`, `KnowledgeStore`, `Checkpointer`) that
//! infrastructure implements.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

pub mod artifact;
pub mod checkpoint;
pub mod cognition;
pub mod config;
pub mod episode;
pub mod events;
pub mod execution;
pub mod lesson;
pub mod recovery;
pub mod reflection;
pub mod task;
pub mod verification;
