// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reflexion Core
//!
//! Autonomous code-repair loop: synthesize tests, generate, execute in a
//! sandbox, reflect on the failure, and try again within a fixed budget.
//!
//! # Architecture
//!
//! - **Layer:** Core System

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
