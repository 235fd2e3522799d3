//! `abx ip` — Print the loopback address of a container user.

use appbox_common::config::AppboxConfig;
use appbox_core::plugin::network;
use clap::Args;

/// Arguments for the `ip` command.
#[derive(Args, Debug)]
pub struct IpArgs {
    /// Numeric uid of the container user.
    pub uid: u32,

    /// Host slot inside the user's address block (1 to 127).
    #[arg(long, default_value_t = 1)]
    pub host_id: u32,
}

/// Executes the `ip` command.
///
/// # Errors
///
/// Returns an error if the host id is out of range.
pub fn execute(config: &AppboxConfig, args: &IpArgs) -> anyhow::Result<()> {
    let ip = network::ip_address(args.uid, args.host_id, &config.network)?;
    println!("{ip}");
    Ok(())
}
