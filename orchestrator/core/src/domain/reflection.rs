// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reflection
//!
//! Natural-language critique of one failed execution, and the append-only
//! log those critiques accumulate into.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Carry diagnosis context from one attempt into the next

use std::fmt;

use im::Vector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    Syntax,
    Runtime,
    AssertionFailure,
    Timeout,
    ResourceLimit,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Syntax => "syntax",
            ErrorClass::Runtime => "runtime",
            ErrorClass::AssertionFailure => "assertion-failure",
            ErrorClass::Timeout => "timeout",
            ErrorClass::ResourceLimit => "resource-limit",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    /// Iteration whose execution result this reflection critiques.
    pub iteration: u32,
    pub error_class: ErrorClass,
    pub diagnosis: String,
    pub suggested_fix: String,
}

/// Ordered, append-only history of reflections.
///
/// Backed by a persistent vector: `appended` returns a new log sharing
/// structure with the old one, so each generator call receives its own
/// snapshot by value and nothing downstream can rewrite history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionLog(Vector<Reflection>);

impl ReflectionLog {
    pub fn new() -> Self {
        Self(Vector::new())
    }

    #[must_use]
    pub fn appended(&self, reflection: Reflection) -> Self {
        let mut next = self.0.clone();
        next.push_back(reflection);
        Self(next)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Reflection> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reflection> {
        self.0.iter()
    }

    /// Distinct error classes in first-seen order.
    pub fn error_classes(&self) -> Vec<ErrorClass> {
        let mut seen = Vec::new();
        for reflection in self.0.iter() {
            if !seen.contains(&reflection.error_class) {
                seen.push(reflection.error_class);
            }
        }
        seen
    }

    /// Numbered, prompt-ready rendering of the whole history.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "{}. [attempt {} | {}] {}\n   Suggested fix: {}",
                    i + 1,
                    r.iteration,
                    r.error_class,
                    r.diagnosis,
                    r.suggested_fix
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
