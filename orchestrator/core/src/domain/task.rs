// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file the user attached to the request (fixtures, sample inputs, specs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub name: String,
    pub content: String,
}

/// The user's request. Created once and never mutated; fields are only
/// reachable through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    description: String,
    #[serde(default)]
    reference_files: Vec<ReferenceFile>,
    created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_reference_files(description, Vec::new())
    }

    pub fn with_reference_files(description: impl Into<String>, reference_files: Vec<ReferenceFile>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            reference_files,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reference_files(&self) -> &[ReferenceFile] {
        &self.reference_files
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
