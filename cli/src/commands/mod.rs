// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for Reflexion CLI

pub mod config;
pub mod resume;
pub mod run;

mod output;

pub use self::config::ConfigCommand;
pub use self::resume::ResumeArgs;
pub use self::run::RunArgs;
