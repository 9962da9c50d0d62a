//! ipscan Core Library
//!
//! This crate provides the core types for the HTTP-initiated IPv6 port
//! scanner: the result taxonomy, the port catalog and composite port key,
//! the session tuple, the test-state bitfield, and configuration.
//!
//! # Examples
//!
//! ```
//! use ipscan_core::{encode_port_key, Config, Protocol, ResultCode};
//!
//! // Compose a store key for TCP port 443
//! let key = encode_port_key(443, 0, Protocol::Tcp);
//! assert_eq!(key & 0xFFFF, 443);
//!
//! // Result codes carry stable raw values
//! assert_eq!(ResultCode::PortOpen.as_raw(), 0);
//!
//! // Default configuration validates
//! let config = Config::default();
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod error;
pub mod portlist;
pub mod results;
pub mod session;
pub mod teststate;

// Re-export commonly used types
pub use config::{Config, Mode};
pub use error::{Error, Result};
pub use portlist::{
    build_port_list, decode_port_key, default_tcp_ports, default_udp_ports, encode_port_key,
    PortEntry, Protocol, MAGIC_BEGIN, MAX_VALID_PORT, MIN_VALID_PORT, NUM_USER_DEF_PORTS,
};
pub use results::{
    classify_connect_errno, classify_icmpv6_error, is_indirect, lookup_result, strip_indirect,
    ResultCode, ResultInfo, INDIRECT_RESPONSE_OFFSET, RESULTS_TABLE,
};
pub use session::{generate_session, host_halves, SessionKey};
pub use teststate::{FetchEvent, TestState, MAX_FETCHNUM, SUCCESSFUL_COMPLETION};
