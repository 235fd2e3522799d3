//! `abx start` — Start containers.

use appbox_common::config::AppboxConfig;
use appbox_common::error::Errors;
use clap::Args;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container ids or `name-namespace` identities.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Executes the `start` command. Every container is attempted.
///
/// # Errors
///
/// Returns an error if a target is unknown or any container fails to start.
pub fn execute(config: &AppboxConfig, args: &StartArgs) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let mut errors = Errors::new();
    for c in super::resolve(&engine, &args.containers)? {
        match c.start() {
            Ok(()) => println!("{}", c.id()),
            Err(e) => errors.push(e),
        }
    }
    Ok(errors.into_result()?)
}
