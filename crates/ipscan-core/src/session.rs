//! Session tuple identifying one test run
//!
//! A test is keyed by `(host_msb, host_lsb, start_time, session)`: the
//! client's 128-bit IPv6 address split big-endian into two 64-bit halves,
//! the Unix second the test started, and a pseudo-random 64-bit session
//! value. In javascript mode the client generates `start_time` and
//! `session`; in text mode the server does.

use rand::Rng;
use std::fmt;
use std::net::Ipv6Addr;

/// Primary key of one test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host_msb: u64,
    pub host_lsb: u64,
    pub start_time: u64,
    pub session: u64,
}

impl SessionKey {
    pub fn new(host: Ipv6Addr, start_time: u64, session: u64) -> Self {
        let (host_msb, host_lsb) = host_halves(host);
        Self {
            host_msb,
            host_lsb,
            start_time,
            session,
        }
    }

    /// Reassemble the client address
    pub fn host(&self) -> Ipv6Addr {
        let bits = (u128::from(self.host_msb) << 64) | u128::from(self.host_lsb);
        Ipv6Addr::from(bits)
    }
}

impl fmt::Display for SessionKey {
    /// Log-safe rendering: only the /48 prefix of the client address, in
    /// the spirit of RFC 6302.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}:{:x}:{:x}:: time {} session {}",
            (self.host_msb >> 48) & 0xFFFF,
            (self.host_msb >> 32) & 0xFFFF,
            (self.host_msb >> 16) & 0xFFFF,
            self.start_time,
            self.session
        )
    }
}

/// Split an IPv6 address big-endian into `(msb, lsb)` halves
pub fn host_halves(host: Ipv6Addr) -> (u64, u64) {
    let bits = u128::from(host);
    ((bits >> 64) as u64, bits as u64)
}

/// Generate a server-side session value (text mode)
pub fn generate_session() -> u64 {
    // Zero is reserved as "no session"
    rand::thread_rng().gen_range(1..u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_halves_big_endian() {
        let addr: Ipv6Addr = "2001:db8:1:2:3:4:5:6".parse().unwrap();
        let (msb, lsb) = host_halves(addr);
        assert_eq!(msb, 0x2001_0db8_0001_0002);
        assert_eq!(lsb, 0x0003_0004_0005_0006);
    }

    #[test]
    fn test_host_round_trip() {
        let addr: Ipv6Addr = "fe80::dead:beef".parse().unwrap();
        let key = SessionKey::new(addr, 1_700_000_000, 42);
        assert_eq!(key.host(), addr);
    }

    #[test]
    fn test_loopback_halves() {
        let (msb, lsb) = host_halves(Ipv6Addr::LOCALHOST);
        assert_eq!(msb, 0);
        assert_eq!(lsb, 1);
    }

    #[test]
    fn test_display_truncates_to_prefix() {
        let addr: Ipv6Addr = "2001:db8:42:99::1".parse().unwrap();
        let key = SessionKey::new(addr, 1_700_000_000, 7);
        let shown = key.to_string();
        assert!(shown.starts_with("2001:db8:42::"));
        // The interface identifier must not leak into logs
        assert!(!shown.contains("99"));
    }

    #[test]
    fn test_generate_session_nonzero() {
        for _ in 0..32 {
            assert_ne!(generate_session(), 0);
        }
    }
}
