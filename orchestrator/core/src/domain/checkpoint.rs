// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Checkpointer Port
//!
//! Persistence contract for [`Episode`] snapshots. The orchestrator saves
//! after every transition and `load` returns the last saved boundary, so a
//! crash between a save and the next transition resumes exactly there.
//!
//! Implementations live in `crate::infrastructure::checkpoint`:
//! `InMemoryCheckpointer` for tests and single-process runs,
//! `FileCheckpointer` for durable local state.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::episode::{Episode, EpisodeId};

#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist the full episode state. A save must either fully replace the
    /// previous checkpoint or leave it untouched.
    async fn save(&self, episode: &Episode) -> Result<(), CheckpointError>;

    async fn load(&self, id: EpisodeId) -> Result<Option<Episode>, CheckpointError>;

    async fn list(&self) -> Result<Vec<EpisodeId>, CheckpointError>;
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A save carried an older revision than the one already stored.
    #[error("stale checkpoint for episode {id}: stored revision {stored}, attempted {attempted}")]
    Stale { id: EpisodeId, stored: u64, attempted: u64 },
}
