// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `reflexion resume`: continue an episode from its last checkpoint.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::warn;

use reflexion_core::domain::config::ReflexionConfigManifest;
use reflexion_core::domain::episode::EpisodeId;

use super::output::{print_recovery, print_verdict, stream_events};
use crate::embedded::EmbeddedLoop;

#[derive(Args)]
pub struct ResumeArgs {
    /// Episode to resume
    #[arg(value_name = "EPISODE_ID")]
    pub episode_id: String,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ResumeArgs, config: ReflexionConfigManifest) -> Result<()> {
    let id = EpisodeId::parse(&args.episode_id)
        .with_context(|| format!("Invalid episode id '{}'", args.episode_id))?;

    anyhow::ensure!(
        config.spec.storage.checkpoint_dir.is_some(),
        "No checkpoint directory configured; set spec.storage.checkpoint_dir to resume episodes"
    );

    let embedded = EmbeddedLoop::new(&config).await?;
    if !args.json {
        println!("Resuming episode {}", id.to_string().bold());
    }
    let printer = stream_events(embedded.event_bus().subscribe_episode(id), args.json);

    let episode = match embedded.orchestrator().resume(id).await {
        Ok(episode) => episode,
        Err(e) => {
            printer.abort();
            return Err(e).context("Resume failed");
        }
    };
    // An already-terminal checkpoint publishes nothing; closing the bus lets
    // the printer drain what was sent and stop.
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
