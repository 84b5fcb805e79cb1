// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reflector
//!
//! Turns a failed [`ExecutionResult`] into a [`Reflection`]: an error class,
//! a diagnosis that names the failing line or assertion when stderr reveals
//! it, and a suggested correction direction.
//!
//! ## Classification (first match wins)
//! | Signal | Class |
//! |--------|-------|
//! | status `Timeout` | `timeout` |
//! | status `Crash`, `MemoryError`, or a kill message | `resource-limit` |
//! | non-zero exit, and an assertion raised, or a stack trace with no failed-assertion marker | `syntax` if a parse-time error is named, else `runtime` |
//! | failed-assertion marker in stderr | `assertion-failure` |
//! | anything else | `unknown` |
//!
//! An assertion that raised (`ASSERTION ERRORED`) means the candidate crashed
//! while being checked, so it outranks plain failed assertions from the same
//! run. The syntax/runtime split reads stderr text and is therefore heuristic.
//! [`ErrorClassifier`] is the seam for swapping it; the known blind spots of
//! [`HeuristicClassifier`] are pinned down in its tests.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::application::prompting;
use crate::domain::artifact::CodeArtifact;
use crate::domain::cognition::{Cognition, PromptContext, PromptPurpose};
use crate::domain::execution::{
    tail_chars, ExecutionResult, ExecutionStatus, ASSERTION_MARKER, SOLUTION_FILE,
};
use crate::domain::reflection::{ErrorClass, Reflection};

const PARSE_ERROR_NAMES: [&str; 3] = ["SyntaxError", "IndentationError", "TabError"];
const MAX_LISTED_ASSERTIONS: usize = 3;
const MAX_SUGGESTION_CHARS: usize = 600;

static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "([^"]+)", line (\d+)(?:, in ([^\s]+))?"#).expect("frame pattern is valid")
});

static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt)):?[ \t]*(.*)$")
        .expect("exception pattern is valid")
});

static ASSERTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^ASSERTION FAILED \[(\d+)\] (.*)$").expect("assertion pattern is valid")
});

static ERRORED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^ASSERTION ERRORED \[(\d+)\] (.*)$").expect("errored pattern is valid")
});

/// One `File "...", line N, in fn` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub line: usize,
    pub function: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAssertion {
    pub index: usize,
    /// `<source>: <detail>` as written by the harness.
    pub text: String,
}

/// Everything the heuristics read out of stderr, scanned once.
#[derive(Debug, Clone, Default)]
pub struct StderrSignals {
    pub has_traceback: bool,
    pub frames: Vec<Frame>,
    /// Last exception line: (type name, message).
    pub exception: Option<(String, String)>,
    pub failed_assertions: Vec<FailedAssertion>,
    /// Assertions whose evaluation raised instead of passing or failing.
    pub errored_assertions: Vec<FailedAssertion>,
    pub memory_exhausted: bool,
}

impl StderrSignals {
    pub fn scan(stderr: &str) -> Self {
        let frames = FRAME
            .captures_iter(stderr)
            .filter_map(|c| {
                Some(Frame {
                    file: c.get(1)?.as_str().to_string(),
                    line: c.get(2)?.as_str().parse().ok()?,
                    function: c.get(3).map(|m| m.as_str().to_string()),
                })
            })
            .collect::<Vec<_>>();

        let exception = EXCEPTION_LINE
            .captures_iter(stderr)
            .filter(|c| !c[0].starts_with(ASSERTION_MARKER))
            .last()
            .map(|c| (c[1].to_string(), c[2].trim().to_string()));

        let markers = |pattern: &Regex| {
            pattern
                .captures_iter(stderr)
                .filter_map(|c| {
                    Some(FailedAssertion {
                        index: c.get(1)?.as_str().parse().ok()?,
                        text: c.get(2)?.as_str().trim().to_string(),
                    })
                })
                .collect::<Vec<_>>()
        };
        let failed_assertions = markers(&*ASSERTION_LINE);
        let errored_assertions = markers(&*ERRORED_LINE);

        let memory_exhausted = stderr.contains("MemoryError")
            || stderr.lines().any(|l| l.trim() == "Killed");

        Self {
            has_traceback: stderr.contains("Traceback (most recent call last)"),
            frames,
            exception,
            failed_assertions,
            errored_assertions,
            memory_exhausted,
        }
    }

    pub fn is_stack_trace(&self) -> bool {
        self.has_traceback || (!self.frames.is_empty() && self.exception.is_some())
    }

    pub fn has_assertion_marker(&self) -> bool {
        !self.failed_assertions.is_empty()
    }

    pub fn is_parse_error(&self) -> bool {
        self.exception
            .as_ref()
            .map(|(name, _)| PARSE_ERROR_NAMES.contains(&name.as_str()))
            .unwrap_or(false)
    }

    /// Innermost frame inside the candidate, or the innermost frame overall.
    pub fn solution_frame(&self) -> Option<&Frame> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.file == SOLUTION_FILE)
            .or_else(|| self.frames.last())
    }
}

/// Strategy for mapping a failed result onto an [`ErrorClass`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, result: &ExecutionResult, signals: &StderrSignals) -> ErrorClass;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl ErrorClassifier for HeuristicClassifier {
    fn classify(&self, result: &ExecutionResult, signals: &StderrSignals) -> ErrorClass {
        if result.status == ExecutionStatus::Timeout {
            return ErrorClass::Timeout;
        }
        if result.status == ExecutionStatus::Crash || signals.memory_exhausted {
            return ErrorClass::ResourceLimit;
        }
        let non_zero_exit = result.exit_code.map(|c| c != 0).unwrap_or(true);
        let crashed = !signals.errored_assertions.is_empty()
            || (signals.is_stack_trace() && !signals.has_assertion_marker());
        if non_zero_exit && crashed {
            return if signals.is_parse_error() {
                ErrorClass::Syntax
            } else {
                ErrorClass::Runtime
            };
        }
        if signals.has_assertion_marker() {
            return ErrorClass::AssertionFailure;
        }
        ErrorClass::Unknown
    }
}

#[async_trait]
pub trait Reflector: Send + Sync {
    /// Critique a non-success result produced by `artifact`.
    async fn reflect(&self, artifact: &CodeArtifact, result: &ExecutionResult) -> Reflection;
}

pub struct StandardReflector {
    classifier: Arc<dyn ErrorClassifier>,
    cognition: Option<Arc<dyn Cognition>>,
    timeout: Duration,
}

impl StandardReflector {
    pub fn new(classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            classifier,
            cognition: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Ask `cognition` for the suggested correction, keeping the heuristic
    /// suggestion as fallback.
    pub fn with_cognition(mut self, cognition: Arc<dyn Cognition>, timeout: Duration) -> Self {
        self.cognition = Some(cognition);
        self.timeout = timeout;
        self
    }

    fn source_line(source: &str, line: usize) -> Option<&str> {
        line.checked_sub(1)
            .and_then(|i| source.lines().nth(i))
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    fn location(frame: Option<&Frame>, source: &str) -> String {
        let Some(frame) = frame else {
            return String::new();
        };
        let mut out = match &frame.function {
            Some(f) if f != "<module>" => format!(" in {}() at {} line {}", f, frame.file, frame.line),
            _ => format!(" at {} line {}", frame.file, frame.line),
        };
        if frame.file == SOLUTION_FILE {
            if let Some(code) = Self::source_line(source, frame.line) {
                out.push_str(&format!(": `{}`", code));
            }
        }
        out
    }

    /// ` while checking [i] <assertion>` for the first assertion that raised,
    /// plus a count of any that failed outright in the same run.
    fn while_checking(signals: &StderrSignals) -> String {
        let Some(first) = signals.errored_assertions.first() else {
            return String::new();
        };
        let source = first.text.rsplit_once(": raised ").map(|(src, _)| src).unwrap_or(&first.text);
        let mut out = format!(" while checking [{}] {}", first.index, source);
        let raised = signals.errored_assertions.len();
        if raised > 1 {
            out.push_str(&format!(" ({} assertions raised)", raised));
        }
        let failed = signals.failed_assertions.len();
        if failed > 0 {
            out.push_str(&format!("; {failed} other assertion(s) failed"));
        }
        out
    }

    fn last_line(text: &str) -> Option<&str> {
        text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
    }

    pub fn diagnose(
        class: ErrorClass,
        signals: &StderrSignals,
        artifact: &CodeArtifact,
        result: &ExecutionResult,
    ) -> (String, String) {
        let frame = signals.solution_frame();
        let line = frame.map(|f| f.line);
        let location = Self::location(frame, &artifact.source);
        let exception = signals
            .exception
            .as_ref()
            .map(|(name, msg)| if msg.is_empty() { name.clone() } else { format!("{name}: {msg}") });

        match class {
            ErrorClass::Timeout => {
                let tail = Self::last_line(&result.stderr)
                    .map(|l| format!(" Last output: {l}"))
                    .unwrap_or_default();
                (
                    format!(
                        "Execution did not finish within the time limit ({} ms elapsed).{tail}",
                        result.duration_ms
                    ),
                    "Remove unbounded loops, blocking reads and any network or file access; the sandbox has no network."
                        .to_string(),
                )
            }
            ErrorClass::ResourceLimit => (
                format!(
                    "Process was stopped for exceeding sandbox resource limits (exit code {}){}.",
                    result.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
                    exception.map(|e| format!(": {e}")).unwrap_or_default()
                ),
                "Reduce memory use: avoid materialising large collections and deep recursion.".to_string(),
            ),
            ErrorClass::Syntax => (
                format!(
                    "{}{}",
                    exception.unwrap_or_else(|| "Syntax error".to_string()),
                    location
                ),
                match line {
                    Some(n) => format!("Fix the syntax on line {n} first: check colons, brackets, quotes and indentation."),
                    None => "Fix the syntax first: check colons, brackets, quotes and indentation.".to_string(),
                },
            ),
            ErrorClass::Runtime => {
                let name = signals
                    .exception
                    .as_ref()
                    .map(|(n, _)| n.clone())
                    .unwrap_or_else(|| "exception".to_string());
                (
                    format!(
                        "{}{}{}",
                        exception.unwrap_or_else(|| "Uncaught exception".to_string()),
                        location,
                        Self::while_checking(signals)
                    ),
                    format!(
                        "Prevent the {name}: check the names, types and edge-case inputs that reach that line."
                    ),
                )
            }
            ErrorClass::AssertionFailure => {
                let failed = &signals.failed_assertions;
                let listed = failed
                    .iter()
                    .take(MAX_LISTED_ASSERTIONS)
                    .map(|a| format!("[{}] {}", a.index, a.text))
                    .collect::<Vec<_>>()
                    .join("; ");
                let more = failed.len().saturating_sub(MAX_LISTED_ASSERTIONS);
                let suffix = if more > 0 { format!(" (+{more} more)") } else { String::new() };
                (
                    format!("{} assertion(s) failed: {listed}{suffix}", failed.len()),
                    "The code runs but returns wrong results; change the logic so the listed assertions hold."
                        .to_string(),
                )
            }
            ErrorClass::Unknown => {
                let detail = Self::last_line(&result.stderr)
                    .or_else(|| Self::last_line(&result.stdout))
                    .map(|l| format!(": {l}"))
                    .unwrap_or_default();
                (
                    format!(
                        "Execution failed with exit code {}{detail}",
                        result.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
                    ),
                    "Make the module import cleanly and define every function the assertions call.".to_string(),
                )
            }
        }
    }

    async fn suggest(
        &self,
        class: ErrorClass,
        diagnosis: &str,
        artifact: &CodeArtifact,
        result: &ExecutionResult,
    ) -> Option<String> {
        let cognition = self.cognition.as_ref()?;
        let prompt = PromptContext::new(
            PromptPurpose::Reflect,
            "A Python solution failed its checks. In at most three sentences, say what to change in the \
             next attempt. Be specific to the code; do not restate that it failed.",
        )
        .section("error class", class.as_str())
        .section("diagnosis", diagnosis)
        .section("stderr", tail_chars(result.stderr.trim(), 2000))
        .section("code", artifact.source.as_str());

        match prompting::complete_within(cognition.as_ref(), &prompt, self.timeout).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(text.chars().take(MAX_SUGGESTION_CHARS).collect())
                }
            }
            Err(e) => {
                warn!("Reflection enrichment failed, using heuristic suggestion: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Reflector for StandardReflector {
    async fn reflect(&self, artifact: &CodeArtifact, result: &ExecutionResult) -> Reflection {
        let signals = StderrSignals::scan(&result.stderr);
        let error_class = self.classifier.classify(result, &signals);
        let (diagnosis, heuristic_fix) = Self::diagnose(error_class, &signals, artifact, result);

        let suggested_fix = self
            .suggest(error_class, &diagnosis, artifact, result)
            .await
            .unwrap_or(heuristic_fix);

        metrics::counter!("reflexion_reflections_total", "error_class" => error_class.as_str()).increment(1);
        debug!(generation = artifact.generation, error_class = %error_class, "{}", diagnosis);

        Reflection {
            iteration: artifact.generation,
            error_class,
            diagnosis,
            suggested_fix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cognition::CognitionError;

    fn failed(status: ExecutionStatus, exit_code: Option<i64>, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            status,
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 40,
        }
    }

    fn classify(result: &ExecutionResult) -> ErrorClass {
        HeuristicClassifier.classify(result, &StderrSignals::scan(&result.stderr))
    }

    const SYNTAX_TRACE: &str = "Traceback (most recent call last):\n  File \"<string>\", line 9, in <module>\n  File \"solution.py\", line 1\n    def reverse(s) return s[::-1]\n                   ^^^^^^\nSyntaxError: expected ':'\n";

    // stderr as the harness writes it when the candidate raises inside an assertion
    const RUNTIME_TRACE: &str = "Traceback (most recent call last):\n  File \"<string>\", line 44, in <module>\n  File \"<assertion 0>\", line 1, in <module>\n  File \"solution.py\", line 2, in reverse\nNameError: name 'x' is not defined\nASSERTION ERRORED [0] assert reverse('ab') == 'ba': raised NameError\n";

    // the candidate fails while being imported, before any assertion runs
    const IMPORT_TRACE: &str = "Traceback (most recent call last):\n  File \"<string>\", line 18, in <module>\n  File \"solution.py\", line 3, in <module>\nZeroDivisionError: division by zero\n";

    #[test]
    fn test_priority_order() {
        // timeout wins even over a syntax trace
        assert_eq!(classify(&failed(ExecutionStatus::Timeout, None, SYNTAX_TRACE)), ErrorClass::Timeout);
        assert_eq!(classify(&failed(ExecutionStatus::Crash, Some(137), "")), ErrorClass::ResourceLimit);
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), SYNTAX_TRACE)), ErrorClass::Syntax);
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), RUNTIME_TRACE)), ErrorClass::Runtime);
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), IMPORT_TRACE)), ErrorClass::Runtime);
        assert_eq!(
            classify(&failed(ExecutionStatus::Failure, Some(1), "ASSERTION FAILED [0] assert f() == 1: left=2 right=1\n")),
            ErrorClass::AssertionFailure
        );
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(2), "something odd")), ErrorClass::Unknown);
    }

    #[test]
    fn test_raised_assertion_outranks_failed_ones() {
        let stderr = format!("{RUNTIME_TRACE}ASSERTION FAILED [1] assert reverse('') == '': left=None right=''\n");
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), &stderr)), ErrorClass::Runtime);

        let signals = StderrSignals::scan(&stderr);
        assert_eq!(signals.failed_assertions.len(), 1);
        assert_eq!(signals.errored_assertions[0].index, 0);
        assert_eq!(
            signals.exception,
            Some(("NameError".to_string(), "name 'x' is not defined".to_string()))
        );
    }

    #[test]
    fn test_syntax_error_inside_an_assertion_is_syntax() {
        let stderr = "Traceback (most recent call last):\n  File \"<string>\", line 44, in <module>\n  File \"<assertion 1>\", line 1\n    assert f(1 == 1\n            ^\nSyntaxError: '(' was never closed\nASSERTION ERRORED [1] assert f(1 == 1: raised SyntaxError\n";
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), stderr)), ErrorClass::Syntax);
    }

    #[test]
    fn test_memory_error_is_resource_limit() {
        let stderr = "Traceback (most recent call last):\n  File \"solution.py\", line 1, in <module>\nMemoryError\n";
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), stderr)), ErrorClass::ResourceLimit);
    }

    // Known false positive: a SyntaxError raised at runtime by exec()/eval()
    // inside otherwise valid code is classed as syntax, although the
    // candidate itself parsed fine.
    #[test]
    fn test_runtime_syntax_error_misclassified_as_syntax() {
        let stderr = "Traceback (most recent call last):\n  File \"solution.py\", line 3, in run\n  File \"<string>\", line 1\n    1 +\n      ^\nSyntaxError: invalid syntax\n";
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), stderr)), ErrorClass::Syntax);
    }

    // Known false negative: an exception printed without the traceback
    // header or any frame is not recognised as runtime.
    #[test]
    fn test_bare_exception_line_is_unknown() {
        let stderr = "ValueError: bad input\n";
        assert_eq!(classify(&failed(ExecutionStatus::Failure, Some(1), stderr)), ErrorClass::Unknown);
    }

    #[tokio::test]
    async fn test_syntax_diagnosis_names_line_and_code() {
        let artifact = CodeArtifact::new(0, "def reverse(s) return s[::-1]\n", 0);
        let reflector = StandardReflector::new(Arc::new(HeuristicClassifier));

        let reflection = reflector
            .reflect(&artifact, &failed(ExecutionStatus::Failure, Some(1), SYNTAX_TRACE))
            .await;

        assert_eq!(reflection.error_class, ErrorClass::Syntax);
        assert_eq!(reflection.iteration, 0);
        assert_eq!(
            reflection.diagnosis,
            "SyntaxError: expected ':' at solution.py line 1: `def reverse(s) return s[::-1]`"
        );
        assert!(reflection.suggested_fix.contains("line 1"));
    }

    #[tokio::test]
    async fn test_runtime_diagnosis_names_function() {
        let artifact = CodeArtifact::new(2, "def reverse(s):\n    return x[::-1]\n", 2);
        let reflector = StandardReflector::new(Arc::new(HeuristicClassifier));

        let reflection = reflector
            .reflect(&artifact, &failed(ExecutionStatus::Failure, Some(1), RUNTIME_TRACE))
            .await;

        assert_eq!(reflection.error_class, ErrorClass::Runtime);
        assert_eq!(
            reflection.diagnosis,
            "NameError: name 'x' is not defined in reverse() at solution.py line 2: `return x[::-1]` \
             while checking [0] assert reverse('ab') == 'ba'"
        );
        assert!(reflection.suggested_fix.contains("NameError"));
    }

    #[tokio::test]
    async fn test_import_failure_diagnosis_has_no_assertion() {
        let artifact = CodeArtifact::new(0, "def reverse(s):\n    return s[::-1]\nRATIO = 1 / 0\n", 0);
        let reflector = StandardReflector::new(Arc::new(HeuristicClassifier));

        let reflection = reflector
            .reflect(&artifact, &failed(ExecutionStatus::Failure, Some(1), IMPORT_TRACE))
            .await;

        assert_eq!(reflection.error_class, ErrorClass::Runtime);
        assert_eq!(
            reflection.diagnosis,
            "ZeroDivisionError: division by zero at solution.py line 3: `RATIO = 1 / 0`"
        );
    }

    #[tokio::test]
    async fn test_assertion_diagnosis_lists_failures() {
        let artifact = CodeArtifact::new(1, "def f(x):\n    return x\n", 1);
        let stderr = "ASSERTION FAILED [0] assert f(2) == 4: left=2 right=4\nASSERTION FAILED [2] assert f(3) == 9: left=3 right=9\n";
        let reflector = StandardReflector::new(Arc::new(HeuristicClassifier));

        let reflection = reflector
            .reflect(&artifact, &failed(ExecutionStatus::Failure, Some(1), stderr))
            .await;

        assert_eq!(
            reflection.diagnosis,
            "2 assertion(s) failed: [0] assert f(2) == 4: left=2 right=4; [2] assert f(3) == 9: left=3 right=9"
        );
    }

    struct FailingCognition;

    #[async_trait]
    impl Cognition for FailingCognition {
        async fn complete(&self, _prompt: &PromptContext) -> Result<String, CognitionError> {
            Err(CognitionError::Network("down".to_string()))
        }

        fn provider(&self) -> &str {
            "failing"
        }
    }

    struct FixedCognition(&'static str);

    #[async_trait]
    impl Cognition for FixedCognition {
        async fn complete(&self, _prompt: &PromptContext) -> Result<String, CognitionError> {
            Ok(self.0.to_string())
        }

        fn provider(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_enrichment_and_fallback() {
        let artifact = CodeArtifact::new(0, "while True: pass", 0);
        let result = failed(ExecutionStatus::Timeout, None, "");

        let enriched = StandardReflector::new(Arc::new(HeuristicClassifier))
            .with_cognition(Arc::new(FixedCognition("  Replace the busy loop with a return.  ")), Duration::from_secs(1))
            .reflect(&artifact, &result)
            .await;
        assert_eq!(enriched.suggested_fix, "Replace the busy loop with a return.");

        let fallback = StandardReflector::new(Arc::new(HeuristicClassifier))
            .with_cognition(Arc::new(FailingCognition), Duration::from_secs(1))
            .reflect(&artifact, &result)
            .await;
        assert_eq!(fallback.error_class, ErrorClass::Timeout);
        assert!(fallback.suggested_fix.contains("network"));
    }
}
