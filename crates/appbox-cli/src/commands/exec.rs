//! `abx exec` — Run a command inside a container.

use std::io;

use appbox_common::config::AppboxConfig;
use appbox_common::error::AppboxError;
use appbox_runtime::exec::ExecIo;
use clap::Args;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container id or `name-namespace` identity.
    pub container: String,

    /// Run as this user instead of the container user (`root` only).
    #[arg(short, long)]
    pub user: Option<String>,

    /// Forward standard input to the command.
    #[arg(short, long)]
    pub interactive: bool,

    /// Command to execute.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Output is streamed as it arrives. Ctrl-C stops waiting for the
/// command; the command itself keeps running. The process exits with the
/// command's exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be found or the command
/// cannot be started.
pub fn execute(config: &AppboxConfig, args: ExecArgs) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let containers = super::resolve(&engine, std::slice::from_ref(&args.container))?;
    let Some(container) = containers.first() else {
        anyhow::bail!("no such container: {}", args.container);
    };
    if containers.len() > 1 {
        tracing::info!(replicas = containers.len(), id = %container.id(), "running in the first replica");
    }

    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = cancel_tx.try_send(());
    })?;

    let io = ExecIo {
        stdin: args.interactive.then(|| Box::new(io::stdin()) as Box<dyn io::Read + Send>),
        stdout: Some(Box::new(io::stdout())),
        stderr: Some(Box::new(io::stderr())),
        cancel: Some(cancel_rx),
    };
    let cmd: Vec<&str> = args.command.iter().map(String::as_str).collect();
    match container.exec(args.user.as_deref(), io, &cmd) {
        Ok(()) => Ok(()),
        Err(AppboxError::Status { code, .. }) => std::process::exit(code),
        Err(e) => Err(e.into()),
    }
}
