//! # appbox-core
//!
//! Host-level isolation for appbox containers.
//!
//! This crate provides:
//! - **Cgroups**: per-container groups in every configured v1 subsystem,
//!   kept in sync with the libcgroup `cgconfig.conf`/`cgrules.conf` files.
//! - **Container plugins**: one OS user per container with its home,
//!   environment, SSH keys, and loopback address block.
//!
//! Host files are rewritten through a swap file and an atomic rename.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod fsutil;
pub mod plugin;
