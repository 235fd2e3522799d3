//! CLI command definitions and dispatch.

pub mod destroy;
pub mod exec;
pub mod ip;
pub mod ps;
pub mod start;
pub mod stop;

use std::path::PathBuf;

use anyhow::Context;
use appbox_common::config::AppboxConfig;
use appbox_runtime::container::Container;
use appbox_runtime::engine::Engine;
use clap::{Parser, Subcommand};

/// appbox — per-user application containers.
#[derive(Parser, Debug)]
#[command(name = "abx", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file; defaults plus `APPBOX_*` overrides without one.
    #[arg(long, global = true, env = "APPBOX_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List application containers.
    Ps(ps::PsArgs),
    /// Run a command inside a container.
    Exec(exec::ExecArgs),
    /// Start containers.
    Start(start::StartArgs),
    /// Stop containers.
    Stop(stop::StopArgs),
    /// Destroy containers and everything they own.
    Destroy(destroy::DestroyArgs),
    /// Print the address assigned to a container user.
    Ip(ip::IpArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Ps(args) => ps::execute(&config, &args),
        Command::Exec(args) => exec::execute(&config, args),
        Command::Start(args) => start::execute(&config, &args),
        Command::Stop(args) => stop::execute(&config, &args),
        Command::Destroy(args) => destroy::execute(&config, &args),
        Command::Ip(args) => ip::execute(&config, &args),
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppboxConfig> {
    match path {
        Some(path) => AppboxConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(AppboxConfig::from_env()?),
    }
}

/// Opens the engine the configuration selects.
pub(crate) fn engine(config: &AppboxConfig) -> anyhow::Result<Engine> {
    let engine = Engine::from_config(config).context("initializing container backend")?;
    if !engine.is_available() {
        tracing::warn!(backend = ?config.backend, "container backend is not fully available on this host");
    }
    Ok(engine)
}

/// Resolves container ids or `name-namespace` identities; each target
/// must match at least one container.
pub(crate) fn resolve(engine: &Engine, targets: &[String]) -> anyhow::Result<Vec<Container>> {
    let mut found = Vec::new();
    for target in targets {
        let matched = engine.registry().find(target)?;
        anyhow::ensure!(!matched.is_empty(), "no such container: {target}");
        found.extend(matched);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_keeps_arguments_after_separator() {
        let cli = Cli::try_parse_from(["abx", "exec", "blog-acme", "--", "ls", "-la"]).unwrap();
        let Command::Exec(args) = cli.command else {
            unreachable!("parsed another subcommand");
        };
        assert_eq!(args.container, "blog-acme");
        assert_eq!(args.command, vec!["ls", "-la"]);
    }

    #[test]
    fn resolve_rejects_unknown_targets() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppboxConfig {
            data_dir: dir.path().to_path_buf(),
            backend: appbox_common::config::BackendKind::Memory,
            ..AppboxConfig::default()
        };
        let engine = engine(&config).unwrap();
        let err = resolve(&engine, &["ghost-acme".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "no such container: ghost-acme");
    }
}
