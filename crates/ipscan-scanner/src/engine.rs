//! One-session scan orchestration
//!
//! Runs the three probe families for a session in the order the
//! presentation expects them to appear: the ICMPv6 echo first, then the
//! UDP ports, then the TCP ports, each written to the store under the
//! session tuple as results complete.

use crate::icmpv6_probe::Icmpv6Prober;
use crate::storage::ScanStore;
use crate::supervisor::run_parallel;
use crate::tcp_probe::TcpProber;
use crate::udp_probe::UdpProber;
use ipscan_core::{encode_port_key, Config, PortEntry, Protocol, SessionKey};
use std::net::Ipv6Addr;
use std::sync::Arc;
use tracing::{info, warn};

/// Worker status bit for a failed store write
const STATUS_STORE_WRITE: i32 = 0x1;

/// Scan engine: probes one target and records results in the store
pub struct ScanEngine {
    config: Config,
    store: Arc<ScanStore>,
}

impl ScanEngine {
    pub fn new(config: Config, store: Arc<ScanStore>) -> Self {
        Self { config, store }
    }

    /// Run a complete scan for one session
    ///
    /// Returns the OR of all worker status codes. A non-zero return means
    /// some rows may be missing, but every port was attempted.
    pub async fn run(
        &self,
        target: Ipv6Addr,
        key: SessionKey,
        tcp_ports: Vec<PortEntry>,
        udp_ports: Vec<PortEntry>,
    ) -> i32 {
        let mut rc = 0;

        rc |= self.run_icmpv6(target, key).await;
        rc |= self.run_udp(target, key, udp_ports).await;
        rc |= self.run_tcp(target, key, tcp_ports).await;

        info!("scan finished for {} with status {:#x}", key, rc);
        rc
    }

    async fn run_icmpv6(&self, target: Ipv6Addr, key: SessionKey) -> i32 {
        let prober = Icmpv6Prober::new(self.config.icmpv6_timeout());
        let (raw, responder) = prober.probe(target, &key).await;
        info!("ICMPv6 echo of {} returned {}", key, raw);

        let portid = encode_port_key(0, 0, Protocol::Icmpv6);
        match self
            .store
            .write(&key, portid, raw, responder.as_deref().unwrap_or(""))
            .await
        {
            Ok(()) => 0,
            Err(e) => {
                warn!("echo result write failed for {}: {}", key, e);
                STATUS_STORE_WRITE
            }
        }
    }

    async fn run_udp(&self, target: Ipv6Addr, key: SessionKey, ports: Vec<PortEntry>) -> i32 {
        info!("beginning scan of {} UDP ports for {}", ports.len(), key);
        let store = Arc::clone(&self.store);
        let timeout = self.config.udp_timeout();

        let worker = move |chunk: Vec<PortEntry>| {
            let store = Arc::clone(&store);
            let prober = UdpProber::new(timeout);
            async move {
                let mut status = 0;
                for entry in chunk {
                    let code = prober.probe(target, entry.port, entry.special).await;
                    let portid = encode_port_key(entry.port, entry.special, Protocol::Udp);
                    if let Err(e) = store.write(&key, portid, code.as_raw(), "").await {
                        warn!("UDP result write failed for port {}: {}", entry.port, e);
                        status |= STATUS_STORE_WRITE;
                    }
                }
                status
            }
        };

        run_parallel(
            ports,
            self.config.max_udp_children,
            self.config.max_udp_ports_per_child,
            worker,
        )
        .await
    }

    async fn run_tcp(&self, target: Ipv6Addr, key: SessionKey, ports: Vec<PortEntry>) -> i32 {
        info!("beginning scan of {} TCP ports for {}", ports.len(), key);
        let store = Arc::clone(&self.store);
        let timeout = self.config.tcp_timeout();

        let worker = move |chunk: Vec<PortEntry>| {
            let store = Arc::clone(&store);
            let prober = TcpProber::new(timeout);
            async move {
                let mut status = 0;
                for entry in chunk {
                    let code = prober.probe(target, entry.port, entry.special).await;
                    let portid = encode_port_key(entry.port, entry.special, Protocol::Tcp);
                    if let Err(e) = store.write(&key, portid, code.as_raw(), "").await {
                        warn!("TCP result write failed for port {}: {}", entry.port, e);
                        status |= STATUS_STORE_WRITE;
                    }
                }
                status
            }
        };

        run_parallel(
            ports,
            self.config.max_tcp_children,
            self.config.max_tcp_ports_per_child,
            worker,
        )
        .await
    }
}
