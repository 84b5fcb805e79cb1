// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Execution Adapter
//!
//! Submits a candidate plus the verification pack to the [`Executor`] as one
//! unit and maps the raw sandbox output onto a typed [`ExecutionResult`].
//!
//! The executor enforces the timeout itself and reports partial output. The
//! adapter adds an outer deadline of `timeout + grace` so that a sandbox
//! which ignores its own limit still cannot hang the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::artifact::CodeArtifact;
use crate::domain::execution::{
    AdapterError, ExecutionResult, ExecutionStatus, Executor, ExecutorOutput, ExecutorRequest,
};
use crate::domain::verification::VerificationPack;

/// SIGKILL / SIGSEGV as reported through a shell-style exit status.
const KILLED_EXIT_CODES: [i64; 2] = [137, 139];

#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Code-level failures come back as `Ok` with a non-success status.
    /// `Err` means the sandbox itself could not be used.
    async fn run(
        &self,
        artifact: &CodeArtifact,
        pack: &VerificationPack,
        timeout: Duration,
    ) -> Result<ExecutionResult, AdapterError>;
}

pub struct StandardExecutionAdapter {
    executor: Arc<dyn Executor>,
    grace: Duration,
}

impl StandardExecutionAdapter {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            grace: Duration::from_secs(5),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn classify(output: &ExecutorOutput) -> ExecutionStatus {
        if output.timed_out {
            return ExecutionStatus::Timeout;
        }
        if output.oom_killed {
            return ExecutionStatus::Crash;
        }
        match output.exit_code {
            Some(0) => ExecutionStatus::Success,
            Some(code) if code < 0 || KILLED_EXIT_CODES.contains(&code) => ExecutionStatus::Crash,
            Some(_) => ExecutionStatus::Failure,
            None => ExecutionStatus::Crash,
        }
    }
}

#[async_trait]
impl ExecutionAdapter for StandardExecutionAdapter {
    async fn run(
        &self,
        artifact: &CodeArtifact,
        pack: &VerificationPack,
        timeout: Duration,
    ) -> Result<ExecutionResult, AdapterError> {
        let request = ExecutorRequest {
            source: artifact.source.clone(),
            assertions: pack.sources(),
            timeout,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout + self.grace, self.executor.run(request)).await;

        let output = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    generation = artifact.generation,
                    "Executor overran its deadline by more than {:?}, treating as timeout",
                    self.grace
                );
                ExecutorOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("execution exceeded the {}s wall-clock limit", timeout.as_secs()),
                    duration_ms: started.elapsed().as_millis() as u64,
                    timed_out: true,
                    oom_killed: false,
                }
            }
        };

        let status = Self::classify(&output);
        debug!(
            generation = artifact.generation,
            status = ?status,
            exit_code = ?output.exit_code,
            duration_ms = output.duration_ms,
            "Execution finished"
        );

        Ok(ExecutionResult {
            status,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::ExecutorError;
    use crate::domain::task::TaskId;
    use tokio::sync::Mutex;

    struct MockExecutor {
        outputs: Mutex<Vec<Result<ExecutorOutput, ExecutorError>>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn run(&self, _request: ExecutorRequest) -> Result<ExecutorOutput, ExecutorError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outputs.lock().await.remove(0)
        }
    }

    fn adapter(outputs: Vec<Result<ExecutorOutput, ExecutorError>>) -> StandardExecutionAdapter {
        StandardExecutionAdapter::new(Arc::new(MockExecutor {
            outputs: Mutex::new(outputs),
            delay: None,
        }))
    }

    fn fixtures() -> (CodeArtifact, VerificationPack) {
        (
            CodeArtifact::new(0, "def f():\n    return 1", 0),
            VerificationPack::new(TaskId::new(), vec!["assert f() == 1"]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (artifact, pack) = fixtures();
        let adapter = adapter(vec![
            Ok(ExecutorOutput { exit_code: Some(0), ..Default::default() }),
            Ok(ExecutorOutput {
                exit_code: Some(1),
                stderr: "ASSERTION FAILED [0] assert f() == 1: ".to_string(),
                ..Default::default()
            }),
            Ok(ExecutorOutput { exit_code: Some(137), oom_killed: true, ..Default::default() }),
            Ok(ExecutorOutput {
                exit_code: None,
                stderr: "partial".to_string(),
                timed_out: true,
                ..Default::default()
            }),
        ]);

        let timeout = Duration::from_secs(1);
        let statuses = [
            adapter.run(&artifact, &pack, timeout).await.unwrap(),
            adapter.run(&artifact, &pack, timeout).await.unwrap(),
            adapter.run(&artifact, &pack, timeout).await.unwrap(),
            adapter.run(&artifact, &pack, timeout).await.unwrap(),
        ];

        assert_eq!(statuses[0].status, ExecutionStatus::Success);
        assert_eq!(statuses[1].status, ExecutionStatus::Failure);
        assert!(statuses[1].stderr.contains("ASSERTION FAILED"));
        assert_eq!(statuses[2].status, ExecutionStatus::Crash);
        assert_eq!(statuses[3].status, ExecutionStatus::Timeout);
        assert_eq!(statuses[3].stderr, "partial");
    }

    #[tokio::test]
    async fn test_passing_artifact_passes_every_time() {
        let (artifact, pack) = fixtures();
        let adapter = adapter(
            (0..3)
                .map(|_| Ok(ExecutorOutput { exit_code: Some(0), ..Default::default() }))
                .collect(),
        );

        for _ in 0..3 {
            let result = adapter.run(&artifact, &pack, Duration::from_secs(1)).await.unwrap();
            assert!(result.is_success());
        }
    }

    #[tokio::test]
    async fn test_unavailable_sandbox_is_an_error() {
        let (artifact, pack) = fixtures();
        let adapter = adapter(vec![Err(ExecutorError::Unavailable("docker socket missing".to_string()))]);

        let err = adapter.run(&artifact, &pack, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(msg) if msg.contains("docker socket missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_executor_becomes_timeout() {
        let (artifact, pack) = fixtures();
        let adapter = StandardExecutionAdapter::new(Arc::new(MockExecutor {
            outputs: Mutex::new(vec![Ok(ExecutorOutput { exit_code: Some(0), ..Default::default() })]),
            delay: Some(Duration::from_secs(3600)),
        }))
        .with_grace(Duration::from_millis(100));

        let result = adapter.run(&artifact, &pack, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.stderr.contains("1s wall-clock limit"));
    }
}
