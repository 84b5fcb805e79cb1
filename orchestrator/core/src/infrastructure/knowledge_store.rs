// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Knowledge Store - append-only lesson memory
//
// Lessons are kept in memory and ranked lexically against a task
// description. With a journal path every write is also appended to a JSONL
// file, which is replayed when the store is opened again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::lesson::{KnowledgeStore, KnowledgeStoreError, Lesson};

const MIN_TOKEN_CHARS: usize = 3;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .collect()
}

/// Share of query tokens found in the lesson's task and summary.
fn relevance(query: &HashSet<String>, lesson: &Lesson) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let mut haystack = tokens(lesson.task_description());
    haystack.extend(tokens(lesson.summary()));
    query.intersection(&haystack).count() as f64 / query.len() as f64
}

#[derive(Clone, Default)]
pub struct InMemoryKnowledgeStore {
    lessons: Arc<RwLock<Vec<Lesson>>>,
    // single writer: held across the journal append and the in-memory push
    journal: Arc<Mutex<Option<PathBuf>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journal-backed store, replaying every lesson already in the
    /// journal. A missing file starts empty; unreadable lines are skipped.
    /// A torn final line (no trailing newline) is cut off so the next append
    /// starts on a line of its own.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, KnowledgeStoreError> {
        let path = path.into();
        let mut lessons: Vec<Lesson> = Vec::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let complete = match content.rfind('\n') {
                    Some(last) => last + 1,
                    None => 0,
                };
                for (line_no, line) in content[..complete].lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Lesson>(line) {
                        Ok(lesson) if lessons.iter().any(|l| l.episode_id() == lesson.episode_id()) => {
                            debug!("Skipping repeated lesson for episode {} in {:?}", lesson.episode_id(), path);
                        }
                        Ok(lesson) => lessons.push(lesson),
                        Err(e) => warn!("Skipping journal line {} in {:?}: {}", line_no + 1, path, e),
                    }
                }
                if complete < content.len() {
                    warn!(
                        "Truncating {} bytes of torn trailing entry in {:?}",
                        content.len() - complete,
                        path
                    );
                    let file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
                    file.set_len(complete as u64).await?;
                }
                info!("Replayed {} lessons from {:?}", lessons.len(), path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                debug!("Starting new lesson journal at {:?}", path);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            lessons: Arc::new(RwLock::new(lessons)),
            journal: Arc::new(Mutex::new(Some(path))),
        })
    }

    pub fn len(&self) -> usize {
        self.lessons.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.read().is_empty()
    }

    pub fn all(&self) -> Vec<Lesson> {
        self.lessons.read().clone()
    }

    async fn append_to_journal(path: &Path, lesson: &Lesson) -> Result<(), KnowledgeStoreError> {
        let mut line = serde_json::to_vec(lesson)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn write(&self, lesson: Lesson) -> Result<(), KnowledgeStoreError> {
        let journal = self.journal.lock().await;

        // one lesson per episode, however often extraction is retried
        if self
            .lessons
            .read()
            .iter()
            .any(|l| l.id() == lesson.id() || l.episode_id() == lesson.episode_id())
        {
            return Err(KnowledgeStoreError::Duplicate(lesson.id()));
        }
        if let Some(path) = journal.as_deref() {
            Self::append_to_journal(path, &lesson).await?;
        }
        self.lessons.write().push(lesson);
        Ok(())
    }

    async fn query(&self, task_description: &str, k: usize) -> Result<Vec<Lesson>, KnowledgeStoreError> {
        let query = tokens(task_description);
        let lessons = self.lessons.read();

        let mut scored: Vec<(f64, usize)> = lessons
            .iter()
            .enumerate()
            .map(|(i, lesson)| (relevance(&query, lesson), i))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        // highest score first; newer lesson wins a tie
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, i)| lessons[i].clone())
            .collect())
    }
}
