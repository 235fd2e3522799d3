//! Deterministic loopback addresses for container users.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use appbox_common::config::NetworkConfig;
use appbox_common::constants::LOOPBACK_START;
use appbox_common::error::{AppboxError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Address of host `host_id` inside the 128-address block owned by `uid`.
///
/// Uids below the wraparound always map without offset; so does any
/// offset of 1000 or more.
///
/// # Errors
///
/// Returns [`AppboxError::InvalidInput`] if `uid` does not fit a signed
/// 32-bit value, `host_id` is outside `1..=127`, or the wraparound is zero.
pub fn ip_address(uid: u32, host_id: u32, network: &NetworkConfig) -> Result<Ipv4Addr> {
    if i32::try_from(uid).is_err() {
        return Err(AppboxError::invalid(format!(
            "user uid {uid} must be an unsigned 31 bit integer"
        )));
    }
    if !(1..=127).contains(&host_id) {
        return Err(AppboxError::invalid(format!(
            "supplied host identifier {host_id} must be between 1 and 127"
        )));
    }
    if network.uid_wraparound == 0 {
        return Err(AppboxError::invalid("uid wraparound must be positive"));
    }

    let mut offset = u64::from(network.ip_offset);
    if offset >= 1000 || uid < network.uid_wraparound {
        offset = 0;
    }
    let block = (u64::from(uid % network.uid_wraparound) + offset) << 7;
    let ip = u64::from(LOOPBACK_START) + block + u64::from(host_id);
    let ip = u32::try_from(ip)
        .map_err(|_| AppboxError::invalid(format!("uid {uid} maps outside the address space")))?;
    Ok(Ipv4Addr::from(ip))
}

/// Returns `true` if something accepts TCP connections on `ip:port`.
#[must_use]
pub fn is_address_in_use(ip: Ipv4Addr, port: u16) -> bool {
    TcpStream::connect_timeout(&SocketAddr::from((ip, port)), CONNECT_TIMEOUT).is_ok()
}
