//! `abx destroy` — Destroy containers and everything they own.

use appbox_common::config::AppboxConfig;
use appbox_common::error::Errors;
use clap::Args;

/// Arguments for the `destroy` command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Container ids or `name-namespace` identities.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Executes the `destroy` command. Every container is attempted.
///
/// # Errors
///
/// Returns an error if a target is unknown or any container cannot be
/// destroyed.
pub fn execute(config: &AppboxConfig, args: &DestroyArgs) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let mut errors = Errors::new();
    for c in super::resolve(&engine, &args.containers)? {
        match c.destroy() {
            Ok(()) => println!("{}", c.id()),
            Err(e) => errors.push(e),
        }
    }
    Ok(errors.into_result()?)
}
