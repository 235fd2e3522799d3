//! # appbox-runtime
//!
//! Container lifecycle on top of a pluggable backend: creation and
//! scaling of application containers, lookup by identity, command
//! execution with multiplexed output, and resource metrics.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod container;
pub mod engine;
pub mod exec;
pub mod logs;
pub mod metrics;
pub mod process;
pub mod registry;
pub mod state;
pub mod stdcopy;
