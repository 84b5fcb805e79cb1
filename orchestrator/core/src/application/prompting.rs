// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared plumbing for the cognition-backed services: bounded completion
//! calls, best-effort lesson retrieval, and parsing of model output into
//! code or assertion lists.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::cognition::{Cognition, CognitionError, PromptContext};
use crate::domain::lesson::KnowledgeStore;
use crate::domain::verification::is_assert_statement;

/// Verdict a model can return instead of assertions when the task has no
/// checkable outcome.
pub const UNVERIFIABLE_VERDICT: &str = "UNVERIFIABLE";

/// Run one completion under a hard deadline. The in-flight request is
/// dropped (and with it the HTTP call) when the deadline passes.
pub async fn complete_within(
    cognition: &dyn Cognition,
    prompt: &PromptContext,
    timeout: Duration,
) -> Result<String, CognitionError> {
    debug!(
        provider = cognition.provider(),
        purpose = prompt.purpose.as_str(),
        "Requesting completion"
    );
    match tokio::time::timeout(timeout, cognition.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(CognitionError::Timeout(timeout.as_secs())),
    }
}

/// Render up to `k` relevant past lessons as one prompt section body.
/// Retrieval is enrichment only: any store failure yields an empty string.
pub async fn past_lessons(
    store: Option<&Arc<dyn KnowledgeStore>>,
    task_description: &str,
    k: usize,
) -> String {
    let Some(store) = store else {
        return String::new();
    };
    if k == 0 {
        return String::new();
    }
    match store.query(task_description, k).await {
        Ok(lessons) => lessons
            .iter()
            .enumerate()
            .map(|(i, lesson)| format!("{}. {}", i + 1, lesson.render()))
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            warn!("Lesson retrieval failed, continuing without past lessons: {}", e);
            String::new()
        }
    }
}

/// A fenced block in model output: its info-string language and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    pub language: String,
    pub body: String,
}

/// All ``` fenced blocks in order. An unterminated trailing fence runs to
/// the end of the text.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let language = info.trim().to_lowercase();
                    current = Some((language, Vec::new()));
                }
            }
            Some((language, mut body)) => {
                if trimmed.starts_with("```") {
                    blocks.push(FencedBlock { language, body: body.join("\n") });
                } else {
                    body.push(line);
                    current = Some((language, body));
                }
            }
        }
    }

    if let Some((language, body)) = current {
        blocks.push(FencedBlock { language, body: body.join("\n") });
    }
    blocks
}

/// Pull source code out of a completion. A python-tagged fence wins, then
/// the first fence of any kind, then the raw text. `None` if nothing but
/// whitespace is left.
pub fn extract_code(text: &str) -> Option<String> {
    let blocks = fenced_blocks(text);
    let chosen = blocks
        .iter()
        .find(|b| matches!(b.language.as_str(), "python" | "py" | "python3"))
        .or_else(|| blocks.first())
        .map(|b| b.body.as_str())
        .unwrap_or(text);

    let code = chosen.trim_matches('\n').trim_end();
    if code.trim().is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAssertions {
    Assertions(Vec<String>),
    Unverifiable(String),
}

/// Interpret a synthesis completion. Accepts, in order: an
/// `UNVERIFIABLE: reason` verdict, a JSON array of strings (fenced or bare),
/// or `assert` statements one per line.
pub fn parse_assertions(text: &str) -> ParsedAssertions {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix(UNVERIFIABLE_VERDICT) {
        let reason = rest.trim_start_matches([':', '-', ' ']).trim();
        return ParsedAssertions::Unverifiable(if reason.is_empty() {
            "no checkable outcome".to_string()
        } else {
            reason.to_string()
        });
    }

    let blocks = fenced_blocks(trimmed);
    let candidates: Vec<&str> = if blocks.is_empty() {
        vec![trimmed]
    } else {
        blocks.iter().map(|b| b.body.as_str()).collect()
    };

    for candidate in &candidates {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(candidate.trim()) {
            return ParsedAssertions::Assertions(list);
        }
    }

    let lines = candidates
        .iter()
        .flat_map(|c| c.lines())
        .map(str::trim)
        .filter(|l| is_assert_statement(l))
        .map(str::to_string)
        .collect();
    ParsedAssertions::Assertions(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_prefers_python_fence() {
        let text = "Here you go:\n```text\nnot this\n```\n```python\ndef f():\n    return 1\n```\nDone.";
        assert_eq!(extract_code(text).unwrap(), "def f():\n    return 1");
    }

    #[test]
    fn test_extract_code_falls_back_to_raw_text() {
        assert_eq!(extract_code("def f(): return 2\n").unwrap(), "def f(): return 2");
        assert_eq!(extract_code("```python\n\n```"), None);
        assert_eq!(extract_code("   \n"), None);
    }

    #[test]
    fn test_unterminated_fence_is_kept() {
        let blocks = fenced_blocks("```py\nx = 1\ny = 2");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].body, "x = 1\ny = 2");
    }

    #[test]
    fn test_parse_assertions_json_array() {
        let text = "```json\n[\"assert f(1) == 1\", \"assert f(2) == 4\"]\n```";
        assert_eq!(
            parse_assertions(text),
            ParsedAssertions::Assertions(vec![
                "assert f(1) == 1".to_string(),
                "assert f(2) == 4".to_string()
            ])
        );
    }

    #[test]
    fn test_parse_assertions_line_form_skips_prose() {
        let text = "Tests:\nassert reverse('abc') == 'cba'\nThis one checks empties:\nassert reverse('') == ''";
        assert_eq!(
            parse_assertions(text),
            ParsedAssertions::Assertions(vec![
                "assert reverse('abc') == 'cba'".to_string(),
                "assert reverse('') == ''".to_string()
            ])
        );
    }

    #[test]
    fn test_parse_unverifiable_verdict() {
        assert_eq!(
            parse_assertions("UNVERIFIABLE: output depends on the current time"),
            ParsedAssertions::Unverifiable("output depends on the current time".to_string())
        );
        assert_eq!(
            parse_assertions("UNVERIFIABLE"),
            ParsedAssertions::Unverifiable("no checkable outcome".to_string())
        );
    }
}
