// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::cognition::CognitionError;

/// One generated candidate solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeArtifact {
    /// 0-based index of the loop iteration that produced this artifact.
    pub generation: u32,
    pub source: String,
    /// Number of reflections the generator was conditioned on, i.e. the
    /// prefix of the episode's reflection log visible at generation time.
    pub conditioned_on: usize,
    pub created_at: DateTime<Utc>,
}

impl CodeArtifact {
    pub fn new(generation: u32, source: impl Into<String>, conditioned_on: usize) -> Self {
        Self {
            generation,
            source: source.into(),
            conditioned_on,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("cognition returned no usable code: {0}")]
    Malformed(String),
    #[error("cognition unavailable: {0}")]
    Unavailable(String),
}

impl From<CognitionError> for GenerationError {
    fn from(err: CognitionError) -> Self {
        match err {
            CognitionError::Malformed(msg) => GenerationError::Malformed(msg),
            other => GenerationError::Unavailable(other.to_string()),
        }
    }
}
