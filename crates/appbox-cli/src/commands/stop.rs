//! `abx stop` — Stop containers.

use std::sync::Arc;
use std::time::Duration;

use appbox_common::config::AppboxConfig;
use appbox_common::error::Errors;
use appbox_runtime::container::Container;
use clap::Args;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container ids or `name-namespace` identities.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Seconds to wait for processes to exit before killing them.
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Executes the `stop` command. Every container is attempted.
///
/// # Errors
///
/// Returns an error if a target is unknown or any container fails to stop.
pub fn execute(config: &AppboxConfig, args: &StopArgs) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let mut errors = Errors::new();
    for c in super::resolve(&engine, &args.containers)? {
        let c = match args.timeout {
            Some(secs) => Container::new(Arc::clone(engine.backend()), c.info().clone(), Duration::from_secs(secs)),
            None => c,
        };
        match c.stop() {
            Ok(()) => println!("{}", c.id()),
            Err(e) => errors.push(e),
        }
    }
    Ok(errors.into_result()?)
}
