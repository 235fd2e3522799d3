//! # appbox-broker
//!
//! Orchestration across the independently failing resources behind one
//! user-facing operation:
//! - the user database ([`userdb::UserDatabase`]),
//! - the source-control provider ([`scm::ScmClient`]),
//! - the plugin hub ([`hub::PluginHub`]),
//! - and the container engine from `appbox-runtime`.
//!
//! [`broker::Broker`] handles user-level operations; per-user application
//! operations go through [`application::UserBroker`].
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod application;
mod archive;
pub mod broker;
pub mod hub;
pub mod scm;
pub mod userdb;
