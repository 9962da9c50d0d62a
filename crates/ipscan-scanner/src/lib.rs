//! ipscan Probe Engine
//!
//! This crate implements the server side of a scan: the per-port TCP,
//! UDP, and ICMPv6 probe state machines, the bounded parallel supervisor
//! that fans the port list out over workers, the SQLite result store the
//! workers write into, and the engine that ties them together for one
//! session.
//!
//! # Architecture
//!
//! - [`tcp_probe`]: non-blocking TCP connect probe with special-case
//!   protocol exchanges
//! - [`udp_probe`]: application-aware UDP datagram probe
//! - [`icmpv6_probe`]: raw-socket ICMPv6 echo exchange
//! - [`supervisor`]: bounded chunked fan-out over a port list
//! - [`storage`]: session-keyed result rows in SQLite
//! - [`engine`]: one-call orchestration of a full scan
//!
//! # Example
//!
//! ```no_run
//! use ipscan_core::{default_tcp_ports, default_udp_ports, Config, SessionKey};
//! use ipscan_scanner::{ScanEngine, ScanStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> ipscan_core::Result<()> {
//! let store = Arc::new(ScanStore::new(":memory:").await?);
//! let engine = ScanEngine::new(Config::default(), Arc::clone(&store));
//!
//! let target = "2001:db8::1".parse().unwrap();
//! let key = SessionKey::new(target, 1_700_000_000, 42);
//! let rc = engine
//!     .run(target, key, default_tcp_ports(), default_udp_ports())
//!     .await;
//! assert_eq!(rc, 0);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod icmpv6_probe;
pub mod storage;
pub mod supervisor;
pub mod tcp_probe;
pub mod udp_probe;

pub use engine::ScanEngine;
pub use icmpv6_probe::Icmpv6Prober;
pub use storage::{ScanStore, StoredRow};
pub use supervisor::run_parallel;
pub use tcp_probe::TcpProber;
pub use udp_probe::UdpProber;
