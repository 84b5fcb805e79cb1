// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Terminal rendering shared by `run` and `resume`.

use colored::Colorize;
use tokio::task::JoinHandle;

use reflexion_core::domain::episode::{Episode, EpisodeOutcome, EpisodeState};
use reflexion_core::domain::events::EpisodeEvent;
use reflexion_core::domain::recovery::RecoveryMetric;
use reflexion_core::infrastructure::event_bus::{EpisodeEventReceiver, EventBusError};

/// Print episode events until the terminal one arrives or the bus closes.
pub(crate) fn stream_events(mut receiver: EpisodeEventReceiver, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    print_event(&event, json);
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(EventBusError::Lagged(n)) => {
                    eprintln!("{}", format!("({} events dropped)", n).dimmed());
                }
                Err(_) => break,
            }
        }
    })
}

pub(crate) fn print_event(event: &EpisodeEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("{}", format!("Failed to encode event: {}", e).red()),
        }
        return;
    }

    println!(
        "{} {} {}",
        event.timestamp.format("%H:%M:%S").to_string().dimmed(),
        format_state(event.state),
        format!("iteration {}", event.iteration).dimmed()
    );
    if let Some(snippet) = &event.last_stderr_snippet {
        if matches!(event.state, EpisodeState::Reflecting | EpisodeState::Exhausted) {
            for line in snippet.lines() {
                println!("    {}", line.dimmed());
            }
        }
    }
}

fn format_state(state: EpisodeState) -> colored::ColoredString {
    let padded = format!("{:<18}", state.as_str());
    let label = padded.as_str();
    match state {
        EpisodeState::Succeeded => label.green().bold(),
        EpisodeState::Exhausted => label.yellow().bold(),
        EpisodeState::Aborted => label.red().bold(),
        EpisodeState::Reflecting => label.yellow(),
        _ => label.cyan(),
    }
}

pub(crate) fn print_verdict(episode: &Episode) {
    println!();
    println!("Episode {}", episode.id);
    println!("  Attempts: {}", episode.attempts().len());
    if episode.generation_failures() > 0 {
        println!("  Generation retries: {}", episode.generation_failures());
    }

    match episode.outcome() {
        Some(EpisodeOutcome::Succeeded) => {
            println!("  Verdict: {}", "succeeded".green().bold());
            if let Some(artifact) = episode.last_artifact() {
                println!();
                println!("{}", "Solution:".bold());
                println!("{}", artifact.source);
            }
        }
        Some(EpisodeOutcome::Exhausted { last_diagnosis }) => {
            println!("  Verdict: {}", "exhausted".yellow().bold());
            println!("  Last diagnosis: {}", last_diagnosis);
        }
        Some(EpisodeOutcome::Aborted { reason }) => {
            println!("  Verdict: {}", "aborted".red().bold());
            println!("  Reason: {}", reason);
        }
        None => println!("  Verdict: {}", "(not terminated)".dimmed()),
    }

    if let Some(lesson_id) = episode.lesson_id() {
        println!("  Lesson: {}", lesson_id);
    }
}

pub(crate) fn print_recovery(metric: RecoveryMetric) {
    let rate = metric
        .rate()
        .map(|r| format!("{:.0}%", r * 100.0))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "  Recovery: {}/{} failed first attempts recovered ({})",
        metric.recovered, metric.initial_failures, rate
    );
}
