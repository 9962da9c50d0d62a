//! Port catalog and composite port key
//!
//! The catalog supplies the default TCP and UDP port lists, the merge of
//! user-supplied custom ports, and the 32-bit composite key used as the
//! result store's port dimension:
//!
//! ```text
//! bits  0..15  port number
//! bits 16..19  special index (masked to 4 bits)
//! bits 20..23  protocol tag
//! ```
//!
//! `special` distinguishes multiple semantic probes against the same
//! numeric port (e.g. two DNS payload variants against port 53).

use std::fmt;

/// Maximum number of user-defined custom port slots
pub const NUM_USER_DEF_PORTS: usize = 4;
/// Lowest acceptable custom port number
pub const MIN_VALID_PORT: u16 = 1;
/// Highest acceptable custom port number
pub const MAX_VALID_PORT: u16 = 65535;
/// Magic value the client must pass as `beginscan` to initiate a scan
pub const MAGIC_BEGIN: i64 = 123456;

const SPECIAL_SHIFT: u32 = 16;
const SPECIAL_MASK: u32 = 0xF;
const PROTO_SHIFT: u32 = 20;
const PROTO_MASK: u32 = 0xF;

/// Protocol tag carried in bits 20..23 of the port key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Protocol {
    Tcp = 0,
    Icmpv6 = 1,
    Udp = 2,
    /// Pseudo-protocol for the per-session test-state row
    TestState = 3,
}

impl Protocol {
    /// Recover a protocol from its key tag
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Protocol::Tcp),
            1 => Some(Protocol::Icmpv6),
            2 => Some(Protocol::Udp),
            3 => Some(Protocol::TestState),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Icmpv6 => write!(f, "ICMPv6"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::TestState => write!(f, "TESTSTATE"),
        }
    }
}

/// One catalog entry: a port, its special index, and a description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub port: u16,
    pub special: u8,
    pub desc: String,
}

impl PortEntry {
    fn new(port: u16, special: u8, desc: &str) -> Self {
        Self {
            port,
            special,
            desc: desc.to_string(),
        }
    }
}

/// Compose the 32-bit store key for `(port, special, protocol)`
///
/// Injective over valid inputs: every distinct triple maps to a distinct
/// key, since the three fields occupy disjoint bit ranges.
pub fn encode_port_key(port: u16, special: u8, proto: Protocol) -> u32 {
    u32::from(port)
        | ((u32::from(special) & SPECIAL_MASK) << SPECIAL_SHIFT)
        | ((proto as u32) << PROTO_SHIFT)
}

/// Split a store key back into `(port, special, protocol)`
pub fn decode_port_key(key: u32) -> (u16, u8, Option<Protocol>) {
    let port = (key & 0xFFFF) as u16;
    let special = ((key >> SPECIAL_SHIFT) & SPECIAL_MASK) as u8;
    let proto = Protocol::from_tag((key >> PROTO_SHIFT) & PROTO_MASK);
    (port, special, proto)
}

// Default lists as compact tuples; expanded to owned entries on demand so
// custom ports can share the same type.
static DEFAULT_TCP: &[(u16, u8, &str)] = &[
    (21, 0, "FTP"),
    (22, 0, "SSH"),
    (23, 0, "Telnet"),
    (25, 0, "SMTP"),
    (53, 0, "DNS"),
    (80, 0, "HTTP"),
    (110, 0, "POP3"),
    (111, 0, "SunRPC portmapper"),
    (135, 0, "Microsoft RPC endpoint mapper"),
    (139, 0, "NetBIOS session service"),
    (143, 0, "IMAP"),
    (443, 0, "HTTPS"),
    (445, 0, "Microsoft SMB"),
    (465, 0, "SMTP over TLS"),
    (587, 0, "SMTP submission"),
    (993, 0, "IMAP over TLS"),
    (995, 0, "POP3 over TLS"),
    (1433, 0, "Microsoft SQL Server"),
    (3306, 0, "MySQL"),
    (3389, 0, "Microsoft RDP"),
    (5432, 0, "PostgreSQL"),
    (5900, 0, "VNC"),
    (8080, 0, "HTTP alternate"),
    (8443, 0, "HTTPS alternate"),
    (11211, 1, "memcached (version probe)"),
];

static DEFAULT_UDP: &[(u16, u8, &str)] = &[
    (53, 0, "DNS query"),
    (53, 1, "DNS version.bind query"),
    (69, 0, "TFTP"),
    (111, 0, "SunRPC portmapper"),
    (123, 0, "NTP"),
    (137, 0, "NetBIOS name service"),
    (161, 0, "SNMPv1 GetRequest"),
    (161, 1, "SNMPv2c GetRequest"),
    (500, 0, "IKE"),
    (1900, 0, "SSDP"),
    (5353, 0, "mDNS"),
    (5355, 0, "LLMNR"),
];

/// Default TCP port list
pub fn default_tcp_ports() -> Vec<PortEntry> {
    DEFAULT_TCP
        .iter()
        .map(|&(p, s, d)| PortEntry::new(p, s, d))
        .collect()
}

/// Default UDP port list
pub fn default_udp_ports() -> Vec<PortEntry> {
    DEFAULT_UDP
        .iter()
        .map(|&(p, s, d)| PortEntry::new(p, s, d))
        .collect()
}

/// Merge user-supplied custom ports with the default TCP list
///
/// `include_existing` = +1 appends the custom ports to the defaults; -1
/// replaces the defaults with only the custom ports. A custom port is
/// skipped when out of range or when its port number is already in the
/// list being built.
pub fn build_port_list(include_existing: i32, custom_ports: &[u16]) -> Vec<PortEntry> {
    let mut list = if include_existing == 1 {
        default_tcp_ports()
    } else {
        Vec::new()
    };

    for &port in custom_ports {
        if !(MIN_VALID_PORT..=MAX_VALID_PORT).contains(&port) {
            continue;
        }
        if list.iter().any(|entry| entry.port == port) {
            continue;
        }
        list.push(PortEntry {
            port,
            special: 0,
            desc: format!("User-specified: {}", port),
        });
    }

    list
}
