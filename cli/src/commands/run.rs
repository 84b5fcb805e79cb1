// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `reflexion run`: start a new episode and stream it to completion.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::warn;

use reflexion_core::domain::config::ReflexionConfigManifest;
use reflexion_core::domain::events::EpisodeEvent;
use reflexion_core::domain::task::{ReferenceFile, Task};

use super::output::{print_event, print_recovery, print_verdict, stream_events};
use crate::embedded::EmbeddedLoop;

#[derive(Args)]
pub struct RunArgs {
    /// Natural-language description of the function to write
    #[arg(value_name = "TASK")]
    pub task: String,

    /// Reference file to attach (repeatable)
    #[arg(short, long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Override spec.loop.max_iterations
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<u32>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RunArgs, mut config: ReflexionConfigManifest) -> Result<()> {
    if let Some(n) = args.max_iterations {
        anyhow::ensure!(n >= 1, "--max-iterations must be at least 1");
        config.spec.loop_config.max_iterations = n;
    }

    let reference_files = read_reference_files(&args.files)?;
    let task = Task::with_reference_files(args.task, reference_files);

    let embedded = EmbeddedLoop::new(&config).await?;
    let orchestrator = embedded.orchestrator();

    let episode = orchestrator.start(task).await.context("Failed to start episode")?;
    if !args.json {
        println!("Running episode {}", episode.id.to_string().bold());
        if !embedded.persistent_checkpoints() {
            println!(
                "{}",
                "Checkpoints are in memory only; set spec.storage.checkpoint_dir to enable resume.".dimmed()
            );
        }
    }
    // the Init event was published before anyone could subscribe
    print_event(
        &EpisodeEvent::from_episode(&episode, config.spec.loop_config.stderr_snippet_chars),
        args.json,
    );
    let printer = stream_events(embedded.event_bus().subscribe_episode(episode.id), args.json);

    let episode = match orchestrator.drive(episode).await {
        Ok(episode) => episode,
        Err(e) => {
            printer.abort();
            return Err(e).context("Episode stopped before terminating; resume it once the cause is fixed");
        }
    };
    let recovery = embedded.shutdown();
    if let Err(e) = printer.await {
        warn!("Event printer stopped abnormally: {}", e);
    }

    if !args.json {
        print_verdict(&episode);
        print_recovery(recovery);
    }
    Ok(())
}

fn read_reference_files(paths: &[PathBuf]) -> Result<Vec<ReferenceFile>> {
    paths
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read reference file {:?}", path))?;
            Ok(ReferenceFile {
                name: display_name(path),
                content,
            })
        })
        .collect()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_files_are_named_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let files = read_reference_files(&[path]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "sample.csv");
        assert_eq!(files[0].content, "a,b\n1,2\n");
    }

    #[test]
    fn test_missing_reference_file_is_an_error() {
        let err = read_reference_files(&[PathBuf::from("/nonexistent/input.txt")]).unwrap_err();
        assert!(err.to_string().contains("input.txt"));
    }
}
