//! macOS container plugin backed by Directory Services.
//!
//! There is no cgroup equivalent; containers run without resource limits.

use std::time::Duration;

use appbox_common::error::{Errors, Result};

use super::command;
use super::{ContainerPlugin, Sandbox};

/// Lowest uid handed out when the sandbox does not request one.
const FIRST_UID: u32 = 1000;

/// Group `staff`.
const PRIMARY_GROUP: &str = "20";

/// Plugin for macOS hosts.
#[derive(Debug)]
pub struct MacOsPlugin {
    sandbox: Sandbox,
}

impl MacOsPlugin {
    /// Creates the plugin for one container.
    #[must_use]
    pub const fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    fn record(&self) -> String {
        format!("/Users/{}", self.sandbox.id)
    }

    fn dscl_create(&self, key: Option<&str>, value: Option<&str>) -> Result<()> {
        let record = self.record();
        let mut args = vec![".", "-create", record.as_str()];
        args.extend(key);
        args.extend(value);
        command::run("dscl", &args).map(|_| ())
    }
}

/// Next uid above every uid listed by `dscl . -list /Users UniqueID`.
fn next_uid(listing: &str) -> u32 {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1)?.parse::<u32>().ok())
        .map(|uid| uid.saturating_add(1))
        .fold(FIRST_UID, u32::max)
}

impl ContainerPlugin for MacOsPlugin {
    fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    fn create_user(&self) -> Result<()> {
        let uid = match self.sandbox.uid {
            Some(uid) => uid,
            None => next_uid(&command::run("dscl", [".", "-list", "/Users", "UniqueID"])?),
        };
        let uid = uid.to_string();
        let home = self.sandbox.home.to_string_lossy().into_owned();

        self.dscl_create(None, None)?;
        self.dscl_create(Some("UserShell"), Some(&self.sandbox.shell))?;
        self.dscl_create(Some("RealName"), Some("appbox container"))?;
        self.dscl_create(Some("UniqueID"), Some(&uid))?;
        self.dscl_create(Some("PrimaryGroupID"), Some(PRIMARY_GROUP))?;
        self.dscl_create(Some("NFSHomeDirectory"), Some(&home))?;
        tracing::info!(id = %self.sandbox.id, uid = %uid, "container user created");
        Ok(())
    }

    fn delete_user(&self) -> Result<()> {
        let mut errors = Errors::new();
        if command::user_exists(&self.sandbox.id) {
            errors.add(command::run("dscl", [".", "-delete", self.record().as_str()]));
        }
        errors.add(command::remove_home(&self.sandbox.home));
        errors.into_result()
    }

    fn kill_procs(&self, term_delay: Option<Duration>) -> Result<()> {
        command::pkill_user(&self.sandbox.id, term_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_uid_skips_taken_ids() {
        let listing = "_www 70\nroot 0\nalice 501\nc0ffee 1004\n";
        assert_eq!(next_uid(listing), 1005);
        assert_eq!(next_uid("root 0\n"), FIRST_UID);
    }
}
