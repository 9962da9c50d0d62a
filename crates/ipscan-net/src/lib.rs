//! ipscan network support
//!
//! Low-level building blocks for the probe engine: ICMPv6 echo request
//! construction and response parsing, protocol-aware UDP probe payloads,
//! and raw-socket privilege checks.

pub mod icmpv6;
pub mod payloads;
pub mod privilege;

pub use icmpv6::{EchoRequestBuilder, Icmpv6Response};
pub use payloads::udp_payload;
pub use privilege::{check_privileges, has_raw_socket_capability};
