//! Plugin for other Unix systems, managing users with `pw(8)`.
//!
//! No resource limits are applied.

use std::time::Duration;

use appbox_common::error::{Errors, Result};

use super::command;
use super::{ContainerPlugin, Sandbox};

/// Plugin for BSD-style hosts.
#[derive(Debug)]
pub struct UnixPlugin {
    sandbox: Sandbox,
}

impl UnixPlugin {
    /// Creates the plugin for one container.
    #[must_use]
    pub const fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

impl ContainerPlugin for UnixPlugin {
    fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    fn create_user(&self) -> Result<()> {
        let sandbox = &self.sandbox;
        let mut args = vec![
            "useradd".to_string(),
            "-n".into(),
            sandbox.id.clone(),
            "-d".into(),
            sandbox.home.to_string_lossy().into_owned(),
            "-s".into(),
            sandbox.shell.clone(),
            "-c".into(),
            "appbox container".into(),
        ];
        if let Some(uid) = sandbox.uid {
            args.extend(["-u".to_string(), uid.to_string()]);
        }
        let _ = command::run("pw", &args)?;
        tracing::info!(id = %sandbox.id, "container user created");
        Ok(())
    }

    fn delete_user(&self) -> Result<()> {
        let mut errors = Errors::new();
        if command::user_exists(&self.sandbox.id) {
            errors.add(command::run("pw", ["userdel", "-n", self.sandbox.id.as_str()]));
        }
        errors.add(command::remove_home(&self.sandbox.home));
        errors.into_result()
    }

    fn kill_procs(&self, term_delay: Option<Duration>) -> Result<()> {
        command::pkill_user(&self.sandbox.id, term_delay)
    }
}
