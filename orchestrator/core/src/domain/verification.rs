// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Verification Pack
//!
//! The ordered set of executable assertions that objectively defines success
//! for a [`Task`](crate::domain::task::Task). A pack is built exactly once per
//! episode by the test synthesizer and is immutable afterwards: there is no
//! API to push, remove or replace assertions once constructed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::cognition::CognitionError;
use crate::domain::task::TaskId;

/// A single executable check, e.g. `assert reverse("abc") == "cba"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub index: usize,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPack {
    task_id: TaskId,
    assertions: Vec<Assertion>,
}

/// True when `source` is an `assert` statement. A bare expression runs
/// without raising whatever it evaluates to, so it can never fail a candidate.
pub fn is_assert_statement(source: &str) -> bool {
    source
        .trim_start()
        .strip_prefix("assert")
        .and_then(|rest| rest.chars().next())
        .map(|c| c.is_whitespace() || c == '(')
        .unwrap_or(false)
}

impl VerificationPack {
    /// Build a pack from raw assertion sources. Blank entries and anything
    /// that is not an `assert` statement are dropped, duplicates collapse onto
    /// their first occurrence, and a pack left with no assertions is rejected.
    pub fn new<I, S>(task_id: TaskId, sources: I) -> Result<Self, SynthesisError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut assertions: Vec<Assertion> = Vec::new();
        for source in sources {
            let source = source.into().trim().to_string();
            if !is_assert_statement(&source) || assertions.iter().any(|a| a.source == source) {
                continue;
            }
            assertions.push(Assertion { index: assertions.len(), source });
        }

        if assertions.is_empty() {
            return Err(SynthesisError::Empty);
        }

        Ok(Self { task_id, assertions })
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    pub fn sources(&self) -> Vec<String> {
        self.assertions.iter().map(|a| a.source.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no verifiable assertion could be derived from the task")]
    Empty,
    #[error("task is not verifiable: {0}")]
    Unverifiable(String),
    #[error("cognition failed during test synthesis: {0}")]
    Cognition(#[from] CognitionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_drops_blank_and_duplicate_assertions() {
        let pack = VerificationPack::new(
            TaskId::new(),
            vec!["assert f(1) == 2", "  ", "assert f(1) == 2", "assert f(2) == 3"],
        )
        .unwrap();

        assert_eq!(pack.len(), 2);
        assert_eq!(pack.assertions()[1].index, 1);
        assert_eq!(pack.assertions()[1].source, "assert f(2) == 3");
    }

    #[test]
    fn test_empty_pack_is_rejected() {
        let result = VerificationPack::new(TaskId::new(), Vec::<String>::new());
        assert!(matches!(result, Err(SynthesisError::Empty)));

        let result = VerificationPack::new(TaskId::new(), vec!["", "\n"]);
        assert!(matches!(result, Err(SynthesisError::Empty)));
    }

    #[test]
    fn test_bare_expressions_are_not_assertions() {
        let result = VerificationPack::new(TaskId::new(), vec!["reverse('ab') == 'ba'", "reverse('') == ''"]);
        assert!(matches!(result, Err(SynthesisError::Empty)));

        let pack = VerificationPack::new(
            TaskId::new(),
            vec!["f(1) == 2", "assert(f(2) == 3)", "assertion_helper()", "assert f(3) == 4, 'three'"],
        )
        .unwrap();
        assert_eq!(pack.sources(), vec!["assert(f(2) == 3)", "assert f(3) == 4, 'three'"]);
        assert_eq!(pack.assertions()[1].index, 1);
    }
}
