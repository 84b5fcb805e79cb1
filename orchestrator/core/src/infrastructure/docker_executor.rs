// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::domain::config::ExecutorConfig;
use crate::domain::execution::{Executor, ExecutorError, ExecutorOutput, ExecutorRequest};
use crate::infrastructure::harness;

/// Per-stream cap on captured output; anything past it is dropped.
const MAX_STREAM_BYTES: usize = 1024 * 1024;

/// Runs each request in a throwaway container: no network, capped memory,
/// CPU and process count, all capabilities dropped.
pub struct DockerExecutor {
    docker: Docker,
    config: ExecutorConfig,
}

impl DockerExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let docker = if let Some(path) = config.docker_socket.as_deref() {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| {
                ExecutorError::Unavailable(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                ExecutorError::Unavailable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - On Linux: Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self { docker, config })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), ExecutorError> {
        self.docker.ping().await.map_err(|e| {
            ExecutorError::Unavailable(format!(
                "Cannot connect to Docker daemon: {}\n\nVerify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn run(&self, request: ExecutorRequest) -> Result<ExecutorOutput, ExecutorError> {
        let docker = self.docker.clone();
        let config = self.config.clone();

        // The spawned task owns the container from create to remove, so the
        // container is cleaned up even if this future is dropped.
        tokio::spawn(async move { run_in_container(docker, config, request).await })
            .await
            .map_err(|e| ExecutorError::Internal(format!("sandbox task failed: {}", e)))?
    }
}

async fn ensure_image(docker: &Docker, config: &ExecutorConfig) -> Result<(), ExecutorError> {
    let image = &config.image;
    if docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }
    if !config.autopull {
        return Err(ExecutorError::Unavailable(format!(
            "Image {} not found locally and autopull is disabled",
            image
        )));
    }

    info!("Pulling image: {}", image);
    let options = Some(CreateImageOptions {
        from_image: image.clone(),
        ..Default::default()
    });
    let mut stream = docker.create_image(options, None, None);
    while let Some(result) = stream.next().await {
        if let Err(e) = result {
            return Err(ExecutorError::Unavailable(format!(
                "Failed to pull image {}: {}\n\nTry manually: docker pull {}",
                image, e, image
            )));
        }
    }
    info!("Successfully pulled image: {}", image);
    Ok(())
}

fn host_config(config: &ExecutorConfig) -> bollard::service::HostConfig {
    bollard::service::HostConfig {
        memory: Some(config.memory_bytes),
        // equal to memory: no swap headroom
        memory_swap: Some(config.memory_bytes),
        // 1 milli CPU = 1e6 nano CPUs
        nano_cpus: Some(config.cpu_millis * 1_000_000),
        pids_limit: Some(config.pids_limit),
        network_mode: Some(config.network_mode.clone()),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        readonly_rootfs: Some(true),
        tmpfs: Some(HashMap::from([(
            "/tmp".to_string(),
            "rw,noexec,size=16m".to_string(),
        )])),
        ..Default::default()
    }
}

fn container_config(config: &ExecutorConfig, request: &ExecutorRequest) -> Config<String> {
    Config {
        image: Some(config.image.clone()),
        cmd: Some(harness::command(request)),
        tty: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(config.network_mode == "none"),
        working_dir: Some("/tmp".to_string()),
        env: Some(vec![
            "PYTHONDONTWRITEBYTECODE=1".to_string(),
            "PYTHONHASHSEED=0".to_string(),
        ]),
        host_config: Some(host_config(config)),
        ..Default::default()
    }
}

/// Append at most what still fits under `MAX_STREAM_BYTES`, cut on a char
/// boundary.
fn append_capped(buffer: &mut String, bytes: &[u8]) {
    let room = MAX_STREAM_BYTES.saturating_sub(buffer.len());
    if room == 0 {
        return;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut end = text.len().min(room);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    buffer.push_str(&text[..end]);
}

async fn run_in_container(
    docker: Docker,
    config: ExecutorConfig,
    request: ExecutorRequest,
) -> Result<ExecutorOutput, ExecutorError> {
    ensure_image(&docker, &config).await?;

    let options = CreateContainerOptions {
        name: format!("reflexion-sandbox-{}", uuid::Uuid::new_v4()),
        platform: None,
    };
    let created = docker
        .create_container(Some(options), container_config(&config, &request))
        .await
        .map_err(|e| ExecutorError::Unavailable(format!("Failed to create sandbox: {}", e)))?;
    let id = created.id;
    debug!("Created sandbox container: {}", id);

    let outcome = drive(&docker, &id, &request).await;

    let remove = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(&id, Some(remove)).await {
        warn!("Failed to remove sandbox container {}: {}", id, e);
    } else {
        debug!("Removed sandbox container: {}", id);
    }

    outcome
}

async fn drive(
    docker: &Docker,
    id: &str,
    request: &ExecutorRequest,
) -> Result<ExecutorOutput, ExecutorError> {
    docker
        .start_container(id, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| ExecutorError::Unavailable(format!("Failed to start sandbox: {}", e)))?;
    let started = Instant::now();

    let mut stdout = String::new();
    let mut stderr = String::new();

    // Buffers live outside the future so output produced before a timeout
    // is kept.
    let collect = async {
        let mut logs = docker.logs(
            id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => append_capped(&mut stdout, &message),
                Ok(LogOutput::StdErr { message }) => append_capped(&mut stderr, &message),
                Ok(_) => {}
                Err(e) => {
                    return Err(ExecutorError::Internal(format!("log stream failed: {}", e)))
                }
            }
        }

        // non-zero exits surface as an error item here; the code is read
        // from inspect below
        let mut wait = docker.wait_container(id, Some(WaitContainerOptions { condition: "not-running" }));
        let _ = wait.next().await;
        Ok::<(), ExecutorError>(())
    };

    let timed_out = match tokio::time::timeout(request.timeout, collect).await {
        Ok(result) => {
            result?;
            false
        }
        Err(_) => true,
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    if timed_out {
        debug!("Sandbox {} exceeded {:?}", id, request.timeout);
        return Ok(ExecutorOutput {
            exit_code: None,
            stdout,
            stderr,
            duration_ms,
            timed_out: true,
            oom_killed: false,
        });
    }

    let inspect = docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await
        .map_err(|e| ExecutorError::Internal(format!("Failed to inspect sandbox: {}", e)))?;
    let state = inspect.state.unwrap_or_default();

    Ok(ExecutorOutput {
        exit_code: state.exit_code,
        stdout,
        stderr,
        duration_ms,
        timed_out: false,
        oom_killed: state.oom_killed.unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> ExecutorRequest {
        ExecutorRequest {
            source: "def add(a, b):\n    return a + b\n".to_string(),
            assertions: vec!["assert add(1, 2) == 3".to_string()],
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_container_is_locked_down() {
        let config = ExecutorConfig::default();
        let container = container_config(&config, &request());
        let host = container.host_config.unwrap();

        assert_eq!(container.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(1_000_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(container.cmd.unwrap()[0], "python3");
    }

    #[test]
    fn test_output_is_capped() {
        let mut buffer = "x".repeat(MAX_STREAM_BYTES);
        append_capped(&mut buffer, b"more");
        assert_eq!(buffer.len(), MAX_STREAM_BYTES);

        let mut buffer = "x".repeat(MAX_STREAM_BYTES - 3);
        append_capped(&mut buffer, "a large chunk".as_bytes());
        assert_eq!(buffer.len(), MAX_STREAM_BYTES);
        assert!(buffer.ends_with("xa l"));
    }

    #[test]
    fn test_cap_never_splits_a_char() {
        let mut buffer = "x".repeat(MAX_STREAM_BYTES - 2);
        append_capped(&mut buffer, "héllo".as_bytes());
        assert_eq!(buffer.len(), MAX_STREAM_BYTES - 1);
        assert!(buffer.ends_with('h'));
    }

    // Requires a running Docker daemon and the python:3.12-slim image
    #[tokio::test]
    #[ignore]
    async fn test_real_sandbox_round() {
        let executor = DockerExecutor::new(ExecutorConfig::default()).unwrap();
        executor.healthcheck().await.unwrap();

        let output = executor.run(request()).await.unwrap();
        assert_eq!(output.exit_code, Some(0), "stderr: {}", output.stderr);

        let mut failing = request();
        failing.assertions = vec!["assert add(1, 2) == 4".to_string()];
        let output = executor.run(failing).await.unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert!(output.stderr.contains("ASSERTION FAILED [0]"));
        assert!(output.stderr.contains("left=3 right=4"));

        let mut raising = request();
        raising.source = "def add(a, b):\n    return a + c\n".to_string();
        let output = executor.run(raising).await.unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert!(output.stderr.contains("NameError"));
        assert!(output.stderr.contains("ASSERTION ERRORED [0] assert add(1, 2) == 3: raised NameError"));
        assert!(!output.stderr.contains("ASSERTION FAILED"));

        let mut hanging = request();
        hanging.source = "while True:\n    pass\n".to_string();
        hanging.timeout = Duration::from_secs(2);
        let output = executor.run(hanging).await.unwrap();
        assert!(output.timed_out);
    }
}
