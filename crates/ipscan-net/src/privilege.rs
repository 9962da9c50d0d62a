//! Privilege checks for the raw ICMPv6 socket
//!
//! Opening a raw ICMPv6 socket requires root or CAP_NET_RAW. The binary
//! checks at startup so a missing capability is logged once, with its
//! remedy, instead of being discovered one failed socket open per probe.

use ipscan_core::{Error, Result};

/// Check whether the current process can open raw sockets
///
/// On unix this tests for an effective UID of 0. A process granted only
/// CAP_NET_RAW will pass the subsequent socket open even though this
/// check returns false, so callers should treat `false` as advisory and
/// the socket open itself as authoritative.
pub fn has_raw_socket_capability() -> bool {
    #[cfg(unix)]
    {
        let root = nix::unistd::Uid::effective().is_root();
        tracing::debug!("effective UID is {}root", if root { "" } else { "not " });
        root
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Error out unless raw socket access looks available
pub fn check_privileges() -> Result<()> {
    if !has_raw_socket_capability() {
        return Err(Error::Privilege(
            "raw ICMPv6 socket requires root or CAP_NET_RAW \
             (grant with: setcap cap_net_raw+eip <binary>)"
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_matches_capability() {
        if has_raw_socket_capability() {
            assert!(check_privileges().is_ok());
        } else {
            assert!(matches!(check_privileges(), Err(Error::Privilege(_))));
        }
    }
}
