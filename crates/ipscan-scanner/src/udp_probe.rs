//! UDP application-aware probe
//!
//! UDP is connectionless, so a probe sends a protocol-native request
//! payload and classifies what comes back:
//!
//! - a datagram response means the service answered (`UdpOpen`)
//! - an ICMPv6 error is delivered by the kernel as an errno on the
//!   connected socket and maps through the errno table
//! - silence until the deadline is the stealth outcome (`UdpStealth`)
//!
//! Payloads come from the `(port, special)` catalog; a port without a
//! crafted payload gets an empty datagram, which still draws ICMPv6
//! errors from closed ports.

use ipscan_core::{classify_connect_errno, ResultCode};
use ipscan_net::udp_payload;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// UDP datagram prober
#[derive(Debug, Clone)]
pub struct UdpProber {
    timeout: Duration,
}

impl UdpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe one UDP port, returning its classified result
    ///
    /// Each probe binds its own ephemeral source port; concurrent probes
    /// share no socket state and the socket closes when dropped.
    pub async fn probe(&self, target: Ipv6Addr, port: u16, special: u8) -> ResultCode {
        let socket = match UdpSocket::bind("[::]:0").await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("UDP probe could not bind a source socket: {}", e);
                return ResultCode::PortInterror;
            }
        };

        let addr = SocketAddr::new(IpAddr::V6(target), port);
        if let Err(e) = socket.connect(addr).await {
            return self.classify_io_error(&e, target, port);
        }

        let payload = udp_payload(port, special).unwrap_or_default();
        trace!("UDP probe {} ({} payload bytes)", addr, payload.len());
        if let Err(e) = socket.send(&payload).await {
            return self.classify_io_error(&e, target, port);
        }

        let mut buf = [0u8; 1500];
        match timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                debug!("UDP port {} on {} answered with {} bytes", port, target, n);
                ResultCode::UdpOpen
            }
            Ok(Err(e)) => self.classify_io_error(&e, target, port),
            Err(_elapsed) => {
                trace!("UDP port {} on {} gave no response", port, target);
                ResultCode::UdpStealth
            }
        }
    }

    fn classify_io_error(&self, e: &std::io::Error, target: Ipv6Addr, port: u16) -> ResultCode {
        let code = match e.raw_os_error() {
            Some(errno) => classify_connect_errno(errno),
            None => ResultCode::PortUnexpected,
        };
        debug!("UDP port {} on {} classified {} ({})", port, target, code, e);
        code
    }
}
