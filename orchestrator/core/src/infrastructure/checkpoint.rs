// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Checkpoint stores
//
// Both stores reject a save whose revision is older than the stored one, so
// a late writer can never roll an episode back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::checkpoint::{CheckpointError, Checkpointer};
use crate::domain::episode::{Episode, EpisodeId};

fn check_revision(id: EpisodeId, stored: Option<u64>, attempted: u64) -> Result<(), CheckpointError> {
    match stored {
        Some(stored) if attempted < stored => Err(CheckpointError::Stale { id, stored, attempted }),
        _ => Ok(()),
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCheckpointer {
    episodes: Arc<RwLock<HashMap<EpisodeId, Episode>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.episodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.read().is_empty()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, episode: &Episode) -> Result<(), CheckpointError> {
        let mut episodes = self.episodes.write();
        check_revision(
            episode.id,
            episodes.get(&episode.id).map(Episode::revision),
            episode.revision(),
        )?;
        episodes.insert(episode.id, episode.clone());
        Ok(())
    }

    async fn load(&self, id: EpisodeId) -> Result<Option<Episode>, CheckpointError> {
        Ok(self.episodes.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<EpisodeId>, CheckpointError> {
        Ok(self.episodes.read().keys().copied().collect())
    }
}

/// One pretty-printed JSON file per episode under `dir`. Each save writes a
/// temp file and renames it over the previous checkpoint.
pub struct FileCheckpointer {
    dir: PathBuf,
    // last revision written per episode; the lock also serializes writers
    revisions: Mutex<HashMap<EpisodeId, u64>>,
}

impl FileCheckpointer {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Checkpoint directory: {:?}", dir);
        Ok(Self {
            dir,
            revisions: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: EpisodeId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read(&self, id: EpisodeId) -> Result<Option<Episode>, CheckpointError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, episode: &Episode) -> Result<(), CheckpointError> {
        let mut revisions = self.revisions.lock().await;

        let stored = match revisions.get(&episode.id) {
            Some(revision) => Some(*revision),
            // first save from this process: another process may have left one
            None => self.read(episode.id).await?.map(|e| e.revision()),
        };
        check_revision(episode.id, stored, episode.revision())?;

        let path = self.path_for(episode.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(episode)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        revisions.insert(episode.id, episode.revision());
        Ok(())
    }

    async fn load(&self, id: EpisodeId) -> Result<Option<Episode>, CheckpointError> {
        self.read(id).await
    }

    async fn list(&self) -> Result<Vec<EpisodeId>, CheckpointError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match EpisodeId::parse(stem) {
                Ok(id) => ids.push(id),
                Err(_) => warn!("Ignoring unrecognized checkpoint file {:?}", path),
            }
        }
        Ok(ids)
    }
}
